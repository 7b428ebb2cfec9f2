//! Spatial partitioning: world-to-cell mapping, 3x3 neighborhoods, cell membership.
//!
//! # Invariants
//! - Cell mapping uses floor division; negative coordinates map to negative cells.
//! - An entity id is a member of at most one cell at a time.
//! - Cells are created lazily and never removed.

mod grid;
mod store;

pub use grid::{
    CellBounds, CellKey, dist2, inside_cell, neighbors_3x3, position_to_cell, world_to_cell,
};
pub use store::{Cell, CellStore};
