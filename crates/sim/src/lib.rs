//! Authoritative world simulation for one shard node.
//!
//! The world is a flat X/Z plane partitioned into square cells. Players and
//! bots live in an arena owned by the [`Engine`]; cells index them by id.
//! A fixed-rate tick integrates motion, moves bots, and transfers cell
//! ownership once a player is far enough past a border.
//!
//! # Invariants
//! - Every entity is a member of exactly one cell, and that cell is the
//!   entity's owned cell.
//! - Handover requires overshooting the border by the hysteresis distance,
//!   doubled when returning to the cell just left.
//! - Each committed handover increments the handover counter exactly once.
//! - AOI results are exactly the entities in the 3x3 neighborhood within
//!   the radius (plus a 1e-9 squared-distance slack), minus the excluded id.
//! - The global bot count never exceeds `max_bots`.
//! - `start` and `stop` are idempotent; a stopped engine stays stopped.

pub mod bots;
pub mod config;
pub mod cross_node;
pub mod engine;
pub mod entity;
pub mod handover;
pub mod handover_service;
pub mod metrics;
pub mod node_registry;
pub mod restore;
pub mod task;
mod world;

pub use bots::{BOT_SPEED, DensityBand, DensityReport};
pub use config::{ConfigError, EngineConfig, HandoverMode};
pub use cross_node::{
    CrossNodeError, CrossNodeHandover, CrossNodeHandoverState, HandoverRequest, HandoverResponse,
    HandoverStatus, HandoverToken, IssuedToken, PlayerData, TokenRejection,
};
pub use engine::{Engine, WorldSummary};
pub use entity::{Entity, Player};
pub use handover::{HandoverEvent, HandoverRoute, crossed_beyond_hysteresis, effective_hysteresis};
pub use handover_service::{HandoverService, HttpReply, TOKEN_CLEANUP_INTERVAL, TOKEN_TTL};
pub use metrics::MetricsSnapshot;
pub use node_registry::{NodeInfo, NodeRegistry};
pub use restore::{KnownTemplates, Loadout, PlayerState, RestoreError};
pub use task::PeriodicTask;
