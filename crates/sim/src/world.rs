use glam::DVec3;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use shardworld_common::{EntityId, EntityKind};
use shardworld_spatial::{CellKey, CellStore, position_to_cell};
use std::collections::{BTreeMap, VecDeque};

use crate::bots::Bot;
use crate::entity::{Entity, Player};
use crate::handover::HandoverEvent;

/// Handover events kept for [`crate::Engine::drain_handover_events`].
const EVENT_LOG_CAPACITY: usize = 1024;

/// Everything guarded by the engine's state lock.
///
/// Records live in the `players` and `bots` arenas; `cells` indexes them by
/// id only. Every arena entry appears in exactly one cell and that cell is
/// the record's `owned_cell`.
#[derive(Debug)]
pub(crate) struct WorldState {
    pub(crate) players: BTreeMap<EntityId, Player>,
    pub(crate) bots: BTreeMap<EntityId, Bot>,
    pub(crate) cells: CellStore,
    pub(crate) rng: SmallRng,
    pub(crate) tick: u64,
    pub(crate) bot_seq: u64,
    pub(crate) density_acc: f64,
    pub(crate) events: VecDeque<HandoverEvent>,
}

impl WorldState {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            players: BTreeMap::new(),
            bots: BTreeMap::new(),
            cells: CellStore::new(),
            rng,
            tick: 0,
            bot_seq: 0,
            density_acc: 0.0,
            events: VecDeque::new(),
        }
    }

    pub(crate) fn entity(&self, id: &str) -> Option<&Entity> {
        self.players
            .get(id)
            .map(|p| &p.entity)
            .or_else(|| self.bots.get(id).map(|b| &b.entity))
    }

    /// Insert a player or overwrite its kinematics. The player is always
    /// re-bucketed into the cell containing `pos`.
    pub(crate) fn upsert_player(
        &mut self,
        id: EntityId,
        name: String,
        pos: DVec3,
        vel: DVec3,
        cell_size: f64,
    ) -> &mut Player {
        let cell = position_to_cell(pos, cell_size);
        match self.players.entry(id) {
            std::collections::btree_map::Entry::Occupied(slot) => {
                let player = slot.into_mut();
                player.entity.name = name;
                player.entity.pos = pos;
                player.entity.vel = vel;
                self.cells.relocate(&player.entity.id, player.owned_cell, cell);
                player.owned_cell = cell;
                player
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                let id = slot.key().clone();
                self.cells.insert(cell, id.clone());
                tracing::debug!(player = %id, %cell, "player joined");
                let entity = Entity::new(id, EntityKind::Player, name, pos, vel);
                slot.insert(Player::new(entity, cell))
            }
        }
    }

    /// Move a player to `pos` and re-bucket it. Returns false for unknown ids.
    pub(crate) fn place_player(&mut self, id: &str, pos: DVec3, cell_size: f64) -> bool {
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };
        let cell = position_to_cell(pos, cell_size);
        player.entity.pos = pos;
        self.cells.relocate(&player.entity.id, player.owned_cell, cell);
        player.owned_cell = cell;
        true
    }

    pub(crate) fn integrate_players(&mut self, dt: f64) {
        for player in self.players.values_mut() {
            player.entity.pos += player.entity.vel * dt;
        }
    }

    /// (players, bots) currently bucketed in `cell`.
    pub(crate) fn population(&self, cell: CellKey) -> (usize, usize) {
        let Some(cell) = self.cells.get(cell) else {
            return (0, 0);
        };
        cell.members().fold((0, 0), |(players, bots), id| {
            if self.players.contains_key(id.as_str()) {
                (players + 1, bots)
            } else if self.bots.contains_key(id.as_str()) {
                (players, bots + 1)
            } else {
                (players, bots)
            }
        })
    }

    pub(crate) fn record_event(&mut self, event: HandoverEvent) {
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}
