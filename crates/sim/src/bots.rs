//! Ambient bots: per-cell density control and wander steering.
//!
//! # Invariants
//! - A bot never leaves the cell it was spawned in; it reflects off the
//!   cell's borders.
//! - Steering reads a start-of-tick snapshot of positions, so results do
//!   not depend on update order.
//! - Bot speed is constant at [`BOT_SPEED`].
//! - The global bot count never exceeds the configured cap.

use glam::DVec3;
use rand::Rng;
use serde::Serialize;
use shardworld_common::{EntityId, EntityKind};
use shardworld_spatial::{CellBounds, CellKey, dist2};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::entity::Entity;
use crate::world::WorldState;

/// Bot walking speed in m/s.
pub const BOT_SPEED: f64 = 1.5;
/// Bots closer than this push each other apart.
pub const SEPARATION_DISTANCE: f64 = 2.0;
/// Range, in seconds of simulated time, between heading changes.
pub const RETARGET_SECS: (f64, f64) = (3.0, 7.0);
/// Simulated time between density passes.
pub const DENSITY_INTERVAL: Duration = Duration::from_secs(1);

const HEADING_WEIGHT: f64 = 0.7;
const SEPARATION_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone)]
pub(crate) struct Bot {
    pub(crate) entity: Entity,
    pub(crate) owned_cell: CellKey,
    /// Unit heading on the X/Z plane.
    heading: DVec3,
    /// Simulated seconds until the next random heading.
    retarget_in: f64,
}

/// Occupancy thresholds derived from a per-cell target `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DensityBand {
    /// floor(0.8 T)
    pub low: usize,
    /// max(low, ceil(1.2 T))
    pub high: usize,
    /// Most bots added or removed in one cell per pass: max(1, ceil(T / 10)).
    pub ramp: usize,
}

impl DensityBand {
    pub fn for_target(target: u32) -> Self {
        let t = target as usize;
        let low = 8 * t / 10;
        let high = (12 * t).div_ceil(10).max(low);
        let ramp = t.max(1).div_ceil(10).max(1);
        Self { low, high, ramp }
    }
}

/// What a density pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DensityReport {
    pub spawned: usize,
    pub despawned: usize,
}

fn random_heading(rng: &mut impl Rng) -> DVec3 {
    let angle = rng.random_range(0.0..std::f64::consts::TAU);
    DVec3::new(angle.cos(), 0.0, angle.sin())
}

fn random_retarget(rng: &mut impl Rng) -> f64 {
    rng.random_range(RETARGET_SECS.0..=RETARGET_SECS.1)
}

fn yaw_of(heading: DVec3) -> f64 {
    heading.z.atan2(heading.x)
}

impl WorldState {
    /// Spawn one bot at a random point inside `cell`, unless the cap is reached.
    pub(crate) fn spawn_bot(&mut self, cell: CellKey, cell_size: f64, max_bots: i64) -> Option<EntityId> {
        if max_bots >= 0 && self.bots.len() as i64 >= max_bots {
            return None;
        }
        self.bot_seq += 1;
        let id = EntityId::new(format!("bot-{}", self.bot_seq));
        let b = CellBounds::of(cell, cell_size);
        let pos = DVec3::new(
            self.rng.random_range(b.min_x..b.max_x),
            0.0,
            self.rng.random_range(b.min_z..b.max_z),
        );
        let heading = random_heading(&mut self.rng);
        let mut entity = Entity::new(
            id.clone(),
            EntityKind::Bot,
            id.to_string(),
            pos,
            heading * BOT_SPEED,
        );
        entity.yaw = yaw_of(heading);
        let retarget_in = random_retarget(&mut self.rng);
        self.cells.insert(cell, id.clone());
        self.bots.insert(
            id.clone(),
            Bot {
                entity,
                owned_cell: cell,
                heading,
                retarget_in,
            },
        );
        tracing::trace!(bot = %id, %cell, "spawned bot");
        Some(id)
    }

    /// Remove one bot from `cell`. Returns false when the cell holds none.
    pub(crate) fn despawn_bot_in(&mut self, cell: CellKey) -> bool {
        let victim = self
            .cells
            .get(cell)
            .and_then(|c| c.members().find(|id| self.bots.contains_key(id.as_str())))
            .cloned();
        let Some(id) = victim else {
            return false;
        };
        self.cells.remove(cell, id.as_str());
        self.bots.remove(id.as_str());
        tracing::trace!(bot = %id, %cell, "despawned bot");
        true
    }

    /// One density pass over every occupied cell, in cell order.
    pub(crate) fn maintain_density(&mut self, target: u32, max_bots: i64, cell_size: f64) -> DensityReport {
        let mut report = DensityReport::default();
        if target == 0 || max_bots < 0 {
            return report;
        }
        let band = DensityBand::for_target(target);

        for cell in self.cells.keys() {
            let (players, bots) = self.population(cell);
            let population = players + bots;
            if population == 0 {
                continue;
            }
            if population < band.low {
                let headroom = (max_bots - self.bots.len() as i64).max(0) as usize;
                let want = (band.low - population).min(band.ramp).min(headroom);
                for _ in 0..want {
                    if self.spawn_bot(cell, cell_size, max_bots).is_none() {
                        break;
                    }
                    report.spawned += 1;
                }
            } else if population > band.high {
                let excess = (population - band.high).min(band.ramp).min(bots);
                for _ in 0..excess {
                    if !self.despawn_bot_in(cell) {
                        break;
                    }
                    report.despawned += 1;
                }
            }
        }

        if report != DensityReport::default() {
            tracing::debug!(
                spawned = report.spawned,
                despawned = report.despawned,
                total_bots = self.bots.len(),
                "density pass"
            );
        }
        report
    }

    /// Steer and move every bot by `dt` seconds.
    pub(crate) fn update_bots(&mut self, dt: f64, cell_size: f64) {
        if self.bots.is_empty() {
            return;
        }

        // start-of-tick positions, grouped by cell
        let mut snapshot: BTreeMap<CellKey, Vec<(EntityId, DVec3)>> = BTreeMap::new();
        for bot in self.bots.values() {
            snapshot
                .entry(bot.owned_cell)
                .or_default()
                .push((bot.entity.id.clone(), bot.entity.pos));
        }

        let sep2 = SEPARATION_DISTANCE * SEPARATION_DISTANCE;
        for bot in self.bots.values_mut() {
            bot.retarget_in -= dt;
            if bot.retarget_in <= 0.0 {
                bot.heading = random_heading(&mut self.rng);
                bot.retarget_in = random_retarget(&mut self.rng);
            }

            let mut push = DVec3::ZERO;
            for (other, pos) in snapshot.get(&bot.owned_cell).into_iter().flatten() {
                if *other == bot.entity.id || dist2(bot.entity.pos, *pos) >= sep2 {
                    continue;
                }
                let away = DVec3::new(bot.entity.pos.x - pos.x, 0.0, bot.entity.pos.z - pos.z);
                push += away.normalize_or_zero();
            }
            let push = push.normalize_or_zero();
            if push != DVec3::ZERO {
                let blended = (bot.heading * HEADING_WEIGHT + push * SEPARATION_WEIGHT).normalize_or_zero();
                if blended != DVec3::ZERO {
                    bot.heading = blended;
                }
            }
            bot.entity.vel = bot.heading * BOT_SPEED;
            bot.entity.yaw = yaw_of(bot.heading);
        }

        for bot in self.bots.values_mut() {
            bot.entity.pos += bot.entity.vel * dt;
            bot.confine(cell_size);
        }
    }
}

impl Bot {
    /// Clamp into the owned cell, reflecting the heading off any border hit.
    fn confine(&mut self, cell_size: f64) {
        let b = CellBounds::of(self.owned_cell, cell_size);
        let pos = &mut self.entity.pos;
        if pos.x < b.min_x {
            pos.x = b.min_x;
            self.heading.x = self.heading.x.abs();
        } else if pos.x > b.max_x {
            pos.x = b.max_x;
            self.heading.x = -self.heading.x.abs();
        }
        if pos.z < b.min_z {
            pos.z = b.min_z;
            self.heading.z = self.heading.z.abs();
        } else if pos.z > b.max_z {
            pos.z = b.max_z;
            self.heading.z = -self.heading.z.abs();
        }
        self.entity.vel = self.heading * BOT_SPEED;
        self.entity.yaw = yaw_of(self.heading);
    }
}
