//! Shared types for the shardworld crates: entity identity and planar helpers.

mod types;

pub use types::{EntityId, EntityKind, planar};
