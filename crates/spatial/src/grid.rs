use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 2D cell coordinate in the world grid (the Y axis is ignored for partitioning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub cx: i32,
    pub cz: i32,
}

impl CellKey {
    pub fn new(cx: i32, cz: i32) -> Self {
        Self { cx, cz }
    }

    /// The 3x3 neighborhood centered on this cell, center included.
    pub fn neighbors_3x3(self) -> impl Iterator<Item = CellKey> {
        neighbors_3x3(self)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.cx, self.cz)
    }
}

/// Map world X/Z coordinates onto the grid using floor division, so that
/// negative coordinates land in negative cells (-0.1 -> -1, not 0).
pub fn world_to_cell(x: f64, z: f64, cell_size: f64) -> CellKey {
    CellKey {
        cx: (x / cell_size).floor() as i32,
        cz: (z / cell_size).floor() as i32,
    }
}

/// Cell containing a world position.
pub fn position_to_cell(pos: DVec3, cell_size: f64) -> CellKey {
    world_to_cell(pos.x, pos.z, cell_size)
}

/// Half-open bounds of a cell on the X/Z plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl CellBounds {
    pub fn of(key: CellKey, cell_size: f64) -> Self {
        Self {
            min_x: f64::from(key.cx) * cell_size,
            max_x: (f64::from(key.cx) + 1.0) * cell_size,
            min_z: f64::from(key.cz) * cell_size,
            max_z: (f64::from(key.cz) + 1.0) * cell_size,
        }
    }

    /// Inclusive min, exclusive max.
    pub fn contains(&self, pos: DVec3) -> bool {
        pos.x >= self.min_x && pos.x < self.max_x && pos.z >= self.min_z && pos.z < self.max_z
    }
}

/// True if `pos` lies inside `key` under half-open bounds.
pub fn inside_cell(pos: DVec3, key: CellKey, cell_size: f64) -> bool {
    CellBounds::of(key, cell_size).contains(pos)
}

/// The 3x3 neighborhood centered at `center` (including the center), row by
/// row. Keys that would fall outside the `i32` grid are skipped, so a center
/// on the grid edge yields fewer than nine cells.
pub fn neighbors_3x3(center: CellKey) -> impl Iterator<Item = CellKey> {
    (-1..=1).flat_map(move |dz| {
        (-1..=1).filter_map(move |dx| {
            Some(CellKey::new(center.cx.checked_add(dx)?, center.cz.checked_add(dz)?))
        })
    })
}

/// Squared distance on the X/Z plane. No sqrt, so boundary comparisons
/// against a squared radius stay exact.
pub fn dist2(a: DVec3, b: DVec3) -> f64 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    dx * dx + dz * dz
}
