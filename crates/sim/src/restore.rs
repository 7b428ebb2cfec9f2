//! Applying a persisted player record to a live player.
//!
//! Blobs arrive as JSON from the persistence layer. Skills are decoded into
//! a typed map; the other sections are validated for shape and kept as
//! opaque values for the gameplay systems that own them.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Item template ids known to the content pipeline.
pub type KnownTemplates = BTreeSet<String>;

/// A persisted player record as stored between sessions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    pub pos: DVec3,
    pub logins: u32,
    pub updated_unix_ms: u64,
    pub version: i64,
    pub inventory_data: Option<Value>,
    pub equipment_data: Option<Value>,
    pub skills_data: Option<Value>,
    pub cooldown_timers: Option<Value>,
    pub encumbrance_config: Option<Value>,
}

/// Gameplay state restored onto a player.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Loadout {
    pub inventory: Option<Value>,
    pub equipment: Option<Value>,
    pub skills: BTreeMap<String, i64>,
    pub cooldowns: Option<Value>,
    pub encumbrance: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("player {0} not found")]
    UnknownPlayer(String),
    #[error("malformed {section} data: {source}")]
    Malformed {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("inventory references unknown item template {0:?}")]
    UnknownTemplate(String),
}

#[derive(Deserialize)]
struct InventoryBlob {
    #[serde(default)]
    items: Vec<InventoryEntry>,
}

#[derive(Deserialize)]
struct InventoryEntry {
    instance: ItemInstance,
}

#[derive(Deserialize)]
struct ItemInstance {
    template_id: String,
}

fn malformed(section: &'static str) -> impl FnOnce(serde_json::Error) -> RestoreError {
    move |source| RestoreError::Malformed { section, source }
}

/// Decode and check every section of `state`. Nothing is applied unless the
/// whole record is valid.
pub(crate) fn build_loadout(
    state: &PlayerState,
    templates: &KnownTemplates,
) -> Result<Loadout, RestoreError> {
    if let Some(blob) = &state.inventory_data {
        let inventory =
            InventoryBlob::deserialize(blob).map_err(malformed("inventory"))?;
        if let Some(unknown) = inventory
            .items
            .iter()
            .map(|entry| &entry.instance.template_id)
            .find(|id| !templates.contains(id.as_str()))
        {
            return Err(RestoreError::UnknownTemplate(unknown.clone()));
        }
    }

    let skills = match &state.skills_data {
        Some(blob) => BTreeMap::<String, i64>::deserialize(blob).map_err(malformed("skills"))?,
        None => BTreeMap::new(),
    };

    for (section, blob) in [
        ("equipment", &state.equipment_data),
        ("cooldown", &state.cooldown_timers),
        ("encumbrance", &state.encumbrance_config),
    ] {
        if let Some(value) = blob {
            if !value.is_object() {
                return Err(RestoreError::Malformed {
                    section,
                    source: serde::de::Error::custom("expected a JSON object"),
                });
            }
        }
    }

    Ok(Loadout {
        inventory: state.inventory_data.clone(),
        equipment: state.equipment_data.clone(),
        skills,
        cooldowns: state.cooldown_timers.clone(),
        encumbrance: state.encumbrance_config.clone(),
    })
}
