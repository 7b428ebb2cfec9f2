use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Unique identifier for an entity in the world.
///
/// Player ids are issued by the join layer; bots receive sequential `bot-N` ids
/// from the engine that spawned them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What kind of actor an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Bot,
}

/// Build a point on the simulation plane. The world is partitioned on X/Z;
/// Y is carried for rendering clients but never read by the simulation.
pub fn planar(x: f64, z: f64) -> DVec3 {
    DVec3::new(x, 0.0, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn entity_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(EntityId::from("p1"), 7);
        assert_eq!(map.get("p1"), Some(&7));
        assert_eq!(map.get("p2"), None);
    }

    #[test]
    fn entity_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&EntityId::new("bot-3")).unwrap();
        assert_eq!(json, "\"bot-3\"");
    }

    #[test]
    fn planar_points_sit_at_zero_height() {
        let p = planar(3.0, -4.0);
        assert_eq!(p, DVec3::new(3.0, 0.0, -4.0));
    }
}
