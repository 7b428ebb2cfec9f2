//! Hysteresis-gated cell ownership transfer.
//!
//! # Invariants
//! - Ownership moves only after the position is at least `h` meters past the
//!   shared border with the target cell.
//! - `h` doubles when the target is the cell the player just left.
//! - A committed transition is applied exactly once: the player's
//!   `owned_cell` becomes the target in the same step that re-buckets it.
//! - A failed cross-node attempt never rolls back the local relocation.
//! - A cross-node record left in flight longer than [`TOKEN_TTL`] is marked
//!   failed, so it cannot block later transfers.

use glam::DVec3;
use serde::Serialize;
use shardworld_common::EntityId;
use shardworld_spatial::{CellBounds, CellKey, position_to_cell};
use std::time::{Instant, SystemTime};

use crate::cross_node::{CrossNodeHandover, CrossNodeHandoverState, HandoverStatus};
use crate::handover_service::TOKEN_TTL;
use crate::node_registry::NodeRegistry;
use crate::world::WorldState;

/// Border the player must cross to go from one cell to a neighbor.
/// The X axis is checked first, so diagonal moves are gated on X.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    East,
    West,
    North,
    South,
}

pub fn crossing(from: CellKey, to: CellKey) -> Option<Crossing> {
    use std::cmp::Ordering::*;
    match (to.cx.cmp(&from.cx), to.cz.cmp(&from.cz)) {
        (Greater, _) => Some(Crossing::East),
        (Less, _) => Some(Crossing::West),
        (Equal, Greater) => Some(Crossing::North),
        (Equal, Less) => Some(Crossing::South),
        (Equal, Equal) => None,
    }
}

/// True once `pos` is at least `h` past the border of `from` facing `to`.
/// Same-cell input is never a crossing.
pub fn crossed_beyond_hysteresis(
    pos: DVec3,
    from: CellKey,
    to: CellKey,
    cell_size: f64,
    h: f64,
) -> bool {
    let b = CellBounds::of(from, cell_size);
    match crossing(from, to) {
        Some(Crossing::East) => pos.x >= b.max_x + h,
        Some(Crossing::West) => pos.x <= b.min_x - h,
        Some(Crossing::North) => pos.z >= b.max_z + h,
        Some(Crossing::South) => pos.z <= b.min_z - h,
        None => false,
    }
}

/// Hysteresis to apply when moving toward `target`; doubled for an
/// immediate return to the previous cell.
pub fn effective_hysteresis(target: CellKey, prev_cell: Option<CellKey>, h: f64) -> f64 {
    if prev_cell == Some(target) { 2.0 * h } else { h }
}

/// How a committed handover was routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum HandoverRoute {
    /// Target cell is owned by this node.
    Local,
    /// Target is remote but no cross-node service is configured.
    Fallback { owner: String },
    /// A cross-node transfer was initiated (or was already in flight).
    CrossNode {
        target_node: String,
        status: HandoverStatus,
    },
}

/// One committed ownership transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoverEvent {
    pub player_id: EntityId,
    pub from: CellKey,
    pub to: CellKey,
    pub tick: u64,
    #[serde(flatten)]
    pub route: HandoverRoute,
}

impl HandoverEvent {
    pub fn local(player_id: EntityId, from: CellKey, to: CellKey, tick: u64) -> Self {
        Self {
            player_id,
            from,
            to,
            tick,
            route: HandoverRoute::Local,
        }
    }
}

/// Read-only inputs to one handover pass.
pub(crate) struct HandoverContext<'a> {
    pub cell_size: f64,
    pub hysteresis: f64,
    pub registry: &'a NodeRegistry,
    pub service: Option<&'a dyn CrossNodeHandover>,
    pub now: SystemTime,
}

/// Fail an in-flight record whose token can no longer be redeemed.
/// Returns true when the record was expired by this call.
pub(crate) fn expire_stale(record: &mut CrossNodeHandoverState, now: SystemTime) -> bool {
    let stale = record.is_in_flight()
        && now
            .duration_since(record.initiated_at)
            .is_ok_and(|age| age > TOKEN_TTL);
    if stale {
        record.status = HandoverStatus::Failed;
        record.error = Some("expired".to_owned());
    }
    stale
}

impl WorldState {
    /// Evaluate every player and commit the handovers that are due.
    /// Returns the number of committed transitions.
    pub(crate) fn evaluate_handovers(&mut self, ctx: &HandoverContext<'_>) -> u64 {
        let ids: Vec<EntityId> = self.players.keys().cloned().collect();
        let mut committed = 0;
        for id in ids {
            if let Some(event) = self.check_and_handover(&id, ctx) {
                self.record_event(event);
                committed += 1;
            }
        }
        committed
    }

    pub(crate) fn check_and_handover(
        &mut self,
        id: &EntityId,
        ctx: &HandoverContext<'_>,
    ) -> Option<HandoverEvent> {
        let player = self.players.get_mut(id)?;
        if let Some(record) = player.cross_node.as_mut() {
            if expire_stale(record, ctx.now) {
                tracing::warn!(player = %id, target_node = %record.target_node, "cross-node handover expired unanswered");
            }
        }
        let from = player.owned_cell;
        let target = position_to_cell(player.entity.pos, ctx.cell_size);
        if target == from {
            return None;
        }
        let h = effective_hysteresis(target, player.prev_cell, ctx.hysteresis);
        if !crossed_beyond_hysteresis(player.entity.pos, from, target, ctx.cell_size, h) {
            return None;
        }

        player.handover_at = Some(Instant::now());
        let owner = ctx.registry.cell_owner(target);
        let route = if owner == ctx.registry.local_node_id() {
            HandoverRoute::Local
        } else if let Some(service) = ctx.service {
            let in_flight = player
                .cross_node
                .as_ref()
                .is_some_and(CrossNodeHandoverState::is_in_flight);
            if in_flight {
                tracing::debug!(player = %id, target_node = %owner, "cross-node handover already in flight");
            } else {
                let data = player.to_player_data();
                let mut state = CrossNodeHandoverState {
                    target_node: owner.clone(),
                    from_cell: from,
                    to_cell: target,
                    status: HandoverStatus::InProgress,
                    initiated_at: ctx.now,
                    token: None,
                    error: None,
                };
                match service.initiate_handover(&data, &owner, target) {
                    Ok(issued) => state.token = Some(issued.token),
                    Err(err) => {
                        tracing::warn!(player = %id, target_node = %owner, error = %err, "cross-node handover initiation failed");
                        state.status = HandoverStatus::Failed;
                        state.error = Some(err.to_string());
                    }
                }
                player.cross_node = Some(state);
            }
            let status = player
                .cross_node
                .as_ref()
                .map_or(HandoverStatus::InProgress, |s| s.status);
            HandoverRoute::CrossNode {
                target_node: owner,
                status,
            }
        } else {
            tracing::debug!(player = %id, %owner, "no cross-node service, handing over locally");
            HandoverRoute::Fallback { owner }
        };

        player.prev_cell = Some(from);
        player.owned_cell = target;
        self.cells.relocate(id, from, target);
        tracing::debug!(player = %id, %from, to = %target, ?route, "handover");

        Some(HandoverEvent {
            player_id: id.clone(),
            from,
            to: target,
            tick: self.tick,
            route,
        })
    }
}
