use glam::DVec3;
use serde::Serialize;
use shardworld_common::{EntityId, EntityKind};
use shardworld_spatial::CellKey;
use std::time::Instant;

use crate::cross_node::{CrossNodeHandoverState, PlayerData};
use crate::restore::Loadout;

/// Kinematic state shared by every simulated actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub(crate) id: EntityId,
    pub(crate) kind: EntityKind,
    pub(crate) pos: DVec3,
    pub(crate) vel: DVec3,
    pub(crate) yaw: f64,
    pub(crate) name: String,
}

impl Entity {
    pub(crate) fn new(id: EntityId, kind: EntityKind, name: String, pos: DVec3, vel: DVec3) -> Self {
        Self {
            id,
            kind,
            pos,
            vel,
            yaw: 0.0,
            name,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn position(&self) -> DVec3 {
        self.pos
    }

    pub fn velocity(&self) -> DVec3 {
        self.vel
    }

    /// Facing around the vertical axis, in radians.
    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A connected player: an [`Entity`] plus ownership and session bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Player {
    #[serde(flatten)]
    pub(crate) entity: Entity,
    pub(crate) owned_cell: CellKey,
    pub(crate) prev_cell: Option<CellKey>,
    #[serde(skip)]
    pub(crate) handover_at: Option<Instant>,
    pub(crate) cross_node: Option<CrossNodeHandoverState>,
    pub(crate) conn_id: Option<String>,
    pub(crate) last_seq: u64,
    pub(crate) loadout: Loadout,
}

impl Player {
    pub(crate) fn new(entity: Entity, owned_cell: CellKey) -> Self {
        Self {
            entity,
            owned_cell,
            prev_cell: None,
            handover_at: None,
            cross_node: None,
            conn_id: None,
            last_seq: 0,
            loadout: Loadout::default(),
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn id(&self) -> &EntityId {
        &self.entity.id
    }

    pub fn position(&self) -> DVec3 {
        self.entity.pos
    }

    pub fn velocity(&self) -> DVec3 {
        self.entity.vel
    }

    pub fn owned_cell(&self) -> CellKey {
        self.owned_cell
    }

    /// The cell owned before the most recent handover.
    pub fn prev_cell(&self) -> Option<CellKey> {
        self.prev_cell
    }

    /// When the most recent handover was detected.
    pub fn handover_at(&self) -> Option<Instant> {
        self.handover_at
    }

    pub fn cross_node(&self) -> Option<&CrossNodeHandoverState> {
        self.cross_node.as_ref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.conn_id.as_deref()
    }

    /// Highest input sequence number acknowledged for this player.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn loadout(&self) -> &Loadout {
        &self.loadout
    }

    /// The state that travels with this player on a cross-node handover.
    pub fn to_player_data(&self) -> PlayerData {
        PlayerData {
            id: self.entity.id.clone(),
            name: self.entity.name.clone(),
            pos: self.entity.pos,
            vel: self.entity.vel,
            yaw: self.entity.yaw,
            owned_cell: self.owned_cell,
            prev_cell: self.prev_cell,
            last_seq: self.last_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardworld_common::planar;

    #[test]
    fn new_player_has_no_handover_history() {
        let e = Entity::new(
            EntityId::from("p1"),
            EntityKind::Player,
            "Ada".into(),
            planar(1.0, 2.0),
            DVec3::ZERO,
        );
        let p = Player::new(e, CellKey::new(0, 0));
        assert_eq!(p.prev_cell(), None);
        assert!(p.handover_at().is_none());
        assert!(p.cross_node().is_none());
        assert_eq!(p.entity().kind(), EntityKind::Player);
    }

    #[test]
    fn player_data_carries_kinematics_and_cells() {
        let e = Entity::new(
            EntityId::from("p1"),
            EntityKind::Player,
            "Ada".into(),
            planar(12.0, 2.0),
            planar(1.0, 0.0),
        );
        let mut p = Player::new(e, CellKey::new(1, 0));
        p.prev_cell = Some(CellKey::new(0, 0));
        p.last_seq = 9;
        let data = p.to_player_data();
        assert_eq!(data.id.as_str(), "p1");
        assert_eq!(data.owned_cell, CellKey::new(1, 0));
        assert_eq!(data.prev_cell, Some(CellKey::new(0, 0)));
        assert_eq!(data.last_seq, 9);
        assert_eq!(data.vel, planar(1.0, 0.0));
    }

    #[test]
    fn player_serializes_flat() {
        let e = Entity::new(
            EntityId::from("p1"),
            EntityKind::Player,
            "Ada".into(),
            planar(1.0, 2.0),
            DVec3::ZERO,
        );
        let json = serde_json::to_value(Player::new(e, CellKey::new(0, 0))).unwrap();
        assert_eq!(json["id"], "p1");
        assert_eq!(json["kind"], "player");
        assert_eq!(json["owned_cell"]["cx"], 0);
        assert!(json.get("handover_at").is_none());
    }
}
