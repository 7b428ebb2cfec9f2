use std::collections::{BTreeMap, BTreeSet};

use shardworld_common::EntityId;

use crate::grid::CellKey;

/// A grid cell and the ids of the entities currently located in it.
///
/// Cells hold ids only. The records themselves live in the engine's arena,
/// so membership is a view over that state and can never diverge from it.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    members: BTreeSet<EntityId>,
}

impl Cell {
    pub fn members(&self) -> impl Iterator<Item = &EntityId> {
        self.members.iter()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Sparse cell store keyed by occupancy.
///
/// Cells are created on first reference and never removed; an emptied cell
/// stays in the map. BTreeMap keeps iteration order stable across runs.
#[derive(Debug, Clone, Default)]
pub struct CellStore {
    cells: BTreeMap<CellKey, Cell>,
}

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(&key)
    }

    pub fn get_or_create(&mut self, key: CellKey) -> &mut Cell {
        self.cells.entry(key).or_default()
    }

    /// Place `id` in `key`, creating the cell if needed.
    pub fn insert(&mut self, key: CellKey, id: EntityId) {
        self.get_or_create(key).members.insert(id);
    }

    /// Remove `id` from `key`. Returns false when it was not a member.
    pub fn remove(&mut self, key: CellKey, id: &str) -> bool {
        self.cells
            .get_mut(&key)
            .is_some_and(|cell| cell.members.remove(id))
    }

    /// Move `id` between cell buckets. A no-op when `from == to`.
    pub fn relocate(&mut self, id: &EntityId, from: CellKey, to: CellKey) {
        if from == to {
            return;
        }
        self.remove(from, id.as_str());
        self.insert(to, id.clone());
        tracing::trace!(%id, %from, %to, "relocated entity");
    }

    /// Keys of every cell ever created, in ascending order.
    pub fn keys(&self) -> Vec<CellKey> {
        self.cells.keys().copied().collect()
    }

    /// Ids in the 3x3 neighborhood around `center`. Each id appears once
    /// because an entity is a member of exactly one cell.
    pub fn neighborhood(&self, center: CellKey) -> impl Iterator<Item = &EntityId> {
        center
            .neighbors_3x3()
            .into_iter()
            .filter_map(|key| self.cells.get(&key))
            .flat_map(|cell| cell.members.iter())
    }

    /// Number of cells created so far, empty ones included.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Total number of entity placements across all cells.
    pub fn total_placements(&self) -> usize {
        self.cells.values().map(Cell::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::from(s)
    }

    #[test]
    fn cells_are_created_lazily() {
        let mut store = CellStore::new();
        assert!(store.get(CellKey::new(0, 0)).is_none());
        store.insert(CellKey::new(0, 0), id("a"));
        assert_eq!(store.cell_count(), 1);
        assert!(store.get(CellKey::new(0, 0)).unwrap().contains("a"));
    }

    #[test]
    fn emptied_cells_are_kept() {
        let mut store = CellStore::new();
        store.insert(CellKey::new(2, 2), id("a"));
        assert!(store.remove(CellKey::new(2, 2), "a"));
        assert!(!store.remove(CellKey::new(2, 2), "a"));
        assert_eq!(store.cell_count(), 1);
        assert!(store.get(CellKey::new(2, 2)).unwrap().is_empty());
    }

    #[test]
    fn relocate_moves_between_buckets() {
        let mut store = CellStore::new();
        let a = id("a");
        store.insert(CellKey::new(0, 0), a.clone());
        store.relocate(&a, CellKey::new(0, 0), CellKey::new(1, 0));
        assert!(!store.get(CellKey::new(0, 0)).unwrap().contains("a"));
        assert!(store.get(CellKey::new(1, 0)).unwrap().contains("a"));
        assert_eq!(store.total_placements(), 1);
    }

    #[test]
    fn relocate_to_same_cell_is_noop() {
        let mut store = CellStore::new();
        let a = id("a");
        store.insert(CellKey::new(0, 0), a.clone());
        store.relocate(&a, CellKey::new(0, 0), CellKey::new(0, 0));
        assert_eq!(store.total_placements(), 1);
        assert_eq!(store.cell_count(), 1);
    }

    #[test]
    fn neighborhood_collects_adjacent_cells_only() {
        let mut store = CellStore::new();
        store.insert(CellKey::new(0, 0), id("center"));
        store.insert(CellKey::new(1, 1), id("diag"));
        store.insert(CellKey::new(-1, 0), id("west"));
        store.insert(CellKey::new(2, 0), id("far"));

        let mut found: Vec<&str> = store
            .neighborhood(CellKey::new(0, 0))
            .map(EntityId::as_str)
            .collect();
        found.sort_unstable();
        assert_eq!(found, vec!["center", "diag", "west"]);
    }

    #[test]
    fn keys_are_sorted() {
        let mut store = CellStore::new();
        store.insert(CellKey::new(3, 0), id("a"));
        store.insert(CellKey::new(-1, 5), id("b"));
        store.insert(CellKey::new(0, 0), id("c"));
        let keys = store.keys();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
