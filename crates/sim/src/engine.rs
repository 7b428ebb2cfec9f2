use glam::DVec3;
use serde::Serialize;
use shardworld_common::{EntityId, EntityKind};
use shardworld_spatial::{CellKey, dist2, position_to_cell};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant, SystemTime};

use crate::bots::{DENSITY_INTERVAL, DensityReport};
use crate::config::{ConfigError, EngineConfig, HandoverMode};
use crate::cross_node::{CrossNodeHandover, HandoverResponse, HandoverStatus, PlayerData};
use crate::entity::{Entity, Player};
use crate::handover::{HandoverContext, HandoverEvent};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::node_registry::{NodeInfo, NodeRegistry};
use crate::restore::{KnownTemplates, PlayerState, RestoreError, build_loadout};
use crate::task::PeriodicTask;
use crate::world::WorldState;

/// Slack added to the squared AOI radius so boundary points are included
/// despite rounding.
const AOI_EPSILON: f64 = 1e-9;

/// Counts recorded at a snapshot boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorldSummary {
    pub tick: u64,
    pub players: usize,
    pub bots: usize,
    pub cells: usize,
}

/// The authoritative simulation for one node.
///
/// World state sits behind a single read/write lock. Queries take the read
/// side; ticks and mutations take the write side. The node registry and the
/// cross-node service have their own locks, and the service handle is
/// cloned out before the tick takes the state lock.
pub struct Engine {
    config: EngineConfig,
    state: RwLock<WorldState>,
    registry: NodeRegistry,
    cross_node: RwLock<Option<Arc<dyn CrossNodeHandover>>>,
    metrics: EngineMetrics,
    last_snapshot: Mutex<Option<WorldSummary>>,
    running: AtomicBool,
    stopped: AtomicBool,
    tick_task: OnceLock<PeriodicTask>,
}

impl Engine {
    /// Build an engine. The config is not validated; see [`Engine::try_new`].
    pub fn new(config: EngineConfig) -> Self {
        if config.handover_mode == HandoverMode::Tunnel {
            tracing::warn!("tunnel handover mode is not implemented; clients will reconnect");
        }
        Self {
            state: RwLock::new(WorldState::new(config.seed)),
            registry: NodeRegistry::new(config.node_id.clone()),
            cross_node: RwLock::new(None),
            metrics: EngineMetrics::default(),
            last_snapshot: Mutex::new(None),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            tick_task: OnceLock::new(),
            config,
        }
    }

    pub fn try_new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    fn read_state(&self) -> RwLockReadGuard<'_, WorldState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, WorldState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- lifecycle -------------------------------------------------------

    /// Start the fixed-rate tick loop on a background thread. Idempotent;
    /// a stopped engine does not restart.
    pub fn start(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::warn!("engine already stopped; ignoring start");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("engine already running");
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.config.tick_period();
        let snapshot_period = self.config.snapshot_period();
        let mut next_snapshot = Instant::now() + snapshot_period;
        let spawned = PeriodicTask::spawn("sim-tick", period, move || {
            let Some(engine) = weak.upgrade() else {
                return ControlFlow::Break(());
            };
            engine.step(period);
            let now = Instant::now();
            if now >= next_snapshot {
                engine.snapshot();
                next_snapshot += snapshot_period;
                if next_snapshot <= now {
                    next_snapshot = now + snapshot_period;
                }
            }
            ControlFlow::Continue(())
        });

        match spawned {
            Ok(task) => {
                let task = self.tick_task.get_or_init(|| task);
                tracing::info!(
                    node = %self.config.node_id,
                    tick_hz = self.config.tick_hz,
                    snapshot_hz = self.config.snapshot_hz,
                    "engine started"
                );
                // a stop that raced with this start saw no task to cancel
                if self.stopped.load(Ordering::SeqCst) {
                    task.cancel(Duration::ZERO);
                }
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                tracing::error!(error = %err, "failed to spawn tick loop");
            }
        }
    }

    /// Stop the tick loop, waiting up to `deadline` for it to exit. Returns
    /// whether the loop is known to have exited. Later calls return at once.
    pub fn stop(&self, deadline: Duration) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        let Some(task) = self.tick_task.get() else {
            return true;
        };
        if !first {
            return task.is_finished();
        }
        let exited = task.cancel(deadline);
        if exited {
            tracing::info!("engine stopped");
        } else {
            tracing::warn!(?deadline, "tick loop still running after stop deadline");
        }
        exited
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    // ---- simulation ------------------------------------------------------

    /// Advance the world by `dt`: integrate players, commit due handovers,
    /// move bots, and run density passes on their own one-second cadence.
    pub fn step(&self, dt: Duration) {
        let _span = tracing::info_span!("sim_step").entered();
        let started = Instant::now();
        let service = self.cross_node_service();
        let dt_secs = dt.as_secs_f64();
        let cell_size = self.config.cell_size;

        let mut state = self.write_state();
        state.tick += 1;
        state.integrate_players(dt_secs);

        let ctx = HandoverContext {
            cell_size,
            hysteresis: self.config.handover_hysteresis,
            registry: &self.registry,
            service: service.as_deref(),
            now: SystemTime::now(),
        };
        let committed = state.evaluate_handovers(&ctx);
        self.metrics.record_handovers(committed);

        state.update_bots(dt_secs, cell_size);

        let interval = DENSITY_INTERVAL.as_secs_f64();
        state.density_acc += dt_secs;
        while state.density_acc >= interval {
            state.density_acc -= interval;
            state.maintain_density(
                self.config.target_density_per_cell,
                self.config.max_bots,
                cell_size,
            );
        }

        tracing::trace!(tick = state.tick, elapsed = ?started.elapsed(), "step");
    }

    /// Run `n` steps of one tick period each.
    pub fn run_ticks(&self, n: u32) {
        let period = self.config.tick_period();
        for _ in 0..n {
            self.step(period);
        }
    }

    /// One density pass, outside the tick cadence.
    pub fn maintain_bot_density(&self) -> DensityReport {
        self.write_state().maintain_density(
            self.config.target_density_per_cell,
            self.config.max_bots,
            self.config.cell_size,
        )
    }

    /// Record the current world counts as the latest snapshot.
    pub fn snapshot(&self) -> WorldSummary {
        let summary = {
            let state = self.read_state();
            WorldSummary {
                tick: state.tick,
                players: state.players.len(),
                bots: state.bots.len(),
                cells: state.cells.cell_count(),
            }
        };
        if self.config.debug_snapshot && summary.players > 0 {
            tracing::info!(
                tick = summary.tick,
                players = summary.players,
                bots = summary.bots,
                cells = summary.cells,
                "snapshot"
            );
        }
        *self
            .last_snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(summary);
        summary
    }

    pub fn last_snapshot(&self) -> Option<WorldSummary> {
        *self
            .last_snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tick(&self) -> u64 {
        self.read_state().tick
    }

    // ---- players ---------------------------------------------------------

    /// Insert a player or overwrite its name and kinematics, re-bucketing it
    /// into the cell that contains `pos`.
    pub fn add_or_update_player(
        &self,
        id: impl Into<EntityId>,
        name: impl Into<String>,
        pos: DVec3,
        vel: DVec3,
    ) -> Player {
        self.write_state()
            .upsert_player(id.into(), name.into(), pos, vel, self.config.cell_size)
            .clone()
    }

    /// Add a stationary player; used by dev tooling.
    pub fn dev_spawn(&self, id: impl Into<EntityId>, name: impl Into<String>, pos: DVec3) -> Player {
        self.add_or_update_player(id, name, pos, DVec3::ZERO)
    }

    /// Remove a player. Returns false for unknown ids.
    pub fn remove_player(&self, id: &str) -> bool {
        let mut state = self.write_state();
        let state = &mut *state;
        let Some(player) = state.players.remove(id) else {
            return false;
        };
        state.cells.remove(player.owned_cell, id);
        tracing::debug!(player = id, cell = %player.owned_cell, "player removed");
        true
    }

    pub fn set_velocity(&self, id: &str, vel: DVec3) -> bool {
        match self.write_state().players.get_mut(id) {
            Some(player) => {
                player.entity.vel = vel;
                true
            }
            None => false,
        }
    }

    pub fn set_connection(&self, id: &str, conn_id: Option<String>) -> bool {
        match self.write_state().players.get_mut(id) {
            Some(player) => {
                player.conn_id = conn_id;
                true
            }
            None => false,
        }
    }

    /// Advance the acknowledged input sequence. Stale sequence numbers are
    /// ignored; returns whether `seq` was accepted.
    pub fn ack_input(&self, id: &str, seq: u64) -> bool {
        match self.write_state().players.get_mut(id) {
            Some(player) if seq > player.last_seq => {
                player.last_seq = seq;
                true
            }
            _ => false,
        }
    }

    pub fn get_player(&self, id: &str) -> Option<Player> {
        self.read_state().players.get(id).cloned()
    }

    pub fn player_ids(&self) -> Vec<EntityId> {
        self.read_state().players.keys().cloned().collect()
    }

    pub fn list_players(&self) -> Vec<Player> {
        self.read_state().players.values().cloned().collect()
    }

    /// Players then bots, each in id order.
    pub fn list_entities(&self) -> Vec<Entity> {
        let state = self.read_state();
        state
            .players
            .values()
            .map(|p| p.entity.clone())
            .chain(state.bots.values().map(|b| b.entity.clone()))
            .collect()
    }

    pub fn bot_count(&self) -> usize {
        self.read_state().bots.len()
    }

    /// (players, bots) bucketed in `cell`.
    pub fn cell_population(&self, cell: CellKey) -> (usize, usize) {
        self.read_state().population(cell)
    }

    /// Ids bucketed in `cell`, sorted.
    pub fn cell_members(&self, cell: CellKey) -> Vec<EntityId> {
        self.read_state()
            .cells
            .get(cell)
            .map(|c| c.members().cloned().collect())
            .unwrap_or_default()
    }

    /// Kind of the entity with `id`, if it exists.
    pub fn entity_kind(&self, id: &str) -> Option<EntityKind> {
        self.read_state().entity(id).map(Entity::kind)
    }

    // ---- area of interest ------------------------------------------------

    /// Entities within `radius` of `pos` on the X/Z plane, searched over the
    /// 3x3 cells around `pos`. `exclude` is left out of the result. A
    /// non-positive radius returns nothing.
    pub fn query_aoi(&self, pos: DVec3, radius: f64, exclude: &str) -> Vec<Entity> {
        if !(radius > 0.0) {
            return Vec::new();
        }
        let r2 = radius * radius + AOI_EPSILON;
        let found: Vec<Entity> = {
            let state = self.read_state();
            let center = position_to_cell(pos, self.config.cell_size);
            state
                .cells
                .neighborhood(center)
                .filter(|id| id.as_str() != exclude)
                .filter_map(|id| state.entity(id.as_str()))
                .filter(|e| dist2(e.pos, pos) <= r2)
                .cloned()
                .collect()
        };
        self.metrics.record_aoi_query(found.len());
        found
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Take every handover committed since the last drain, oldest first.
    pub fn drain_handover_events(&self) -> Vec<HandoverEvent> {
        self.write_state().events.drain(..).collect()
    }

    // ---- nodes -----------------------------------------------------------

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn local_node_id(&self) -> &str {
        self.registry.local_node_id()
    }

    pub fn register_node(&self, info: NodeInfo) {
        self.registry.register_node(info);
    }

    pub fn unregister_node(&self, node_id: &str) -> Option<usize> {
        self.registry.unregister_node(node_id)
    }

    pub fn assign_cell_to_node(&self, cell: CellKey, node_id: impl Into<String>) {
        self.registry.assign_cell(cell, node_id);
    }

    pub fn list_nodes(&self) -> Vec<NodeInfo> {
        self.registry.list_nodes()
    }

    pub fn set_cross_node_handover_service(&self, service: Arc<dyn CrossNodeHandover>) {
        *self
            .cross_node
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(service);
        tracing::info!("cross-node handover service installed");
    }

    fn cross_node_service(&self) -> Option<Arc<dyn CrossNodeHandover>> {
        self.cross_node
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Admit a player handed over from another node. The player lands in
    /// the cell containing its position with the origin cell as its previous
    /// cell, so an immediate return pays the doubled hysteresis.
    pub fn admit_transferred_player(&self, data: &PlayerData) -> Player {
        let mut state = self.write_state();
        let player = state.upsert_player(
            data.id.clone(),
            data.name.clone(),
            data.pos,
            data.vel,
            self.config.cell_size,
        );
        let cell = player.owned_cell;
        player.entity.yaw = data.yaw;
        player.last_seq = data.last_seq;
        player.prev_cell = Some(data.owned_cell).filter(|origin| *origin != cell);
        player.cross_node = None;
        tracing::info!(player = %data.id, %cell, from_cell = %data.owned_cell, "admitted transferred player");
        player.clone()
    }

    /// Record the destination's answer to a cross-node handover. Returns
    /// false when the player has no handover in flight.
    pub fn resolve_cross_node_handover(&self, id: &str, response: &HandoverResponse) -> bool {
        let mut state = self.write_state();
        let Some(record) = state
            .players
            .get_mut(id)
            .and_then(|p| p.cross_node.as_mut())
            .filter(|s| s.is_in_flight())
        else {
            return false;
        };
        if response.success {
            record.status = HandoverStatus::Completed;
            tracing::info!(player = id, target_node = %record.target_node, "cross-node handover completed");
        } else {
            record.status = HandoverStatus::Failed;
            record.error = Some(response.error.clone());
            tracing::warn!(player = id, target_node = %record.target_node, error = %response.error, "cross-node handover rejected");
        }
        true
    }

    // ---- persistence -----------------------------------------------------

    /// Apply a persisted record to a live player. The record is checked in
    /// full before anything is changed.
    pub fn restore_player_state(
        &self,
        id: &str,
        record: &PlayerState,
        templates: &KnownTemplates,
    ) -> Result<(), RestoreError> {
        let loadout = build_loadout(record, templates)?;
        let mut state = self.write_state();
        if !state.place_player(id, record.pos, self.config.cell_size) {
            return Err(RestoreError::UnknownPlayer(id.to_owned()));
        }
        if let Some(player) = state.players.get_mut(id) {
            player.loadout = loadout;
        }
        tracing::debug!(player = id, version = record.version, "restored player state");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(task) = self.tick_task.get() {
            task.cancel(Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardworld_common::planar;

    fn engine(cell_size: f64) -> Engine {
        Engine::new(EngineConfig {
            cell_size,
            handover_hysteresis: 2.0,
            target_density_per_cell: 0,
            seed: Some(1),
            ..EngineConfig::default()
        })
    }

    #[test]
    fn try_new_rejects_invalid_config() {
        let config = EngineConfig {
            tick_hz: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(Engine::try_new(config), Err(ConfigError::TickHz(0))));
    }

    #[test]
    fn add_places_player_in_containing_cell() {
        let e = engine(10.0);
        let p = e.add_or_update_player("p1", "Ada", planar(-0.5, 15.0), DVec3::ZERO);
        assert_eq!(p.owned_cell(), CellKey::new(-1, 1));
        assert_eq!(e.cell_members(CellKey::new(-1, 1)), vec![EntityId::from("p1")]);
    }

    #[test]
    fn update_teleport_moves_membership() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        e.add_or_update_player("p1", "Ada", planar(55.0, 1.0), DVec3::ZERO);
        assert!(e.cell_members(CellKey::new(0, 0)).is_empty());
        assert_eq!(e.get_player("p1").unwrap().owned_cell(), CellKey::new(5, 0));
    }

    #[test]
    fn aoi_includes_boundary_and_excludes_self() {
        let e = engine(10.0);
        e.add_or_update_player("me", "Me", planar(5.0, 5.0), DVec3::ZERO);
        e.add_or_update_player("edge", "Edge", planar(8.0, 9.0), DVec3::ZERO);
        e.add_or_update_player("out", "Out", planar(8.1, 9.0), DVec3::ZERO);

        let ids: Vec<String> = e
            .query_aoi(planar(5.0, 5.0), 5.0, "me")
            .into_iter()
            .map(|en| en.id().to_string())
            .collect();
        assert_eq!(ids, vec!["edge".to_string()]);
    }

    #[test]
    fn aoi_with_non_positive_radius_is_empty() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(5.0, 5.0), DVec3::ZERO);
        assert!(e.query_aoi(planar(5.0, 5.0), 0.0, "").is_empty());
        assert!(e.query_aoi(planar(5.0, 5.0), -1.0, "").is_empty());
        assert_eq!(e.metrics_snapshot().aoi_queries, 0);
    }

    #[test]
    fn aoi_counts_queries_and_entities() {
        let e = engine(10.0);
        e.add_or_update_player("a", "A", planar(5.0, 5.0), DVec3::ZERO);
        e.add_or_update_player("b", "B", planar(6.0, 5.0), DVec3::ZERO);
        assert_eq!(e.query_aoi(planar(5.0, 5.0), 3.0, "").len(), 2);
        assert_eq!(e.query_aoi(planar(5.0, 5.0), 3.0, "a").len(), 1);
        let m = e.metrics_snapshot();
        assert_eq!(m.aoi_queries, 2);
        assert_eq!(m.aoi_entities_total, 3);
    }

    #[test]
    fn remove_player_clears_membership() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        assert!(e.remove_player("p1"));
        assert!(!e.remove_player("p1"));
        assert!(e.cell_members(CellKey::new(0, 0)).is_empty());
        assert!(e.get_player("p1").is_none());
    }

    #[test]
    fn setters_ignore_unknown_players() {
        let e = engine(10.0);
        assert!(!e.set_velocity("ghost", planar(1.0, 0.0)));
        assert!(!e.set_connection("ghost", Some("c1".into())));
        assert!(!e.ack_input("ghost", 1));
    }

    #[test]
    fn connection_is_tracked_per_player() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        assert_eq!(e.get_player("p1").unwrap().connection_id(), None);
        assert!(e.set_connection("p1", Some("conn-7".into())));
        assert_eq!(e.get_player("p1").unwrap().connection_id(), Some("conn-7"));
        assert!(e.set_connection("p1", None));
        assert_eq!(e.get_player("p1").unwrap().connection_id(), None);
    }

    #[test]
    fn aoi_at_far_positions_does_not_overflow() {
        let e = engine(10.0);
        e.add_or_update_player("far", "Ada", planar(1e12, 0.0), DVec3::ZERO);
        e.add_or_update_player("near", "Bob", planar(1e12, 3.0), DVec3::ZERO);
        let found = e.query_aoi(planar(1e12, 0.0), 10.0, "far");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().as_str(), "near");
        e.step(Duration::from_millis(50));
        assert_eq!(e.metrics_snapshot().handovers, 0);
    }

    #[test]
    fn ack_input_is_monotonic() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        assert!(e.ack_input("p1", 5));
        assert!(!e.ack_input("p1", 3));
        assert_eq!(e.get_player("p1").unwrap().last_seq(), 5);
    }

    #[test]
    fn step_moves_players_and_counts_ticks() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), planar(2.0, 0.0));
        e.step(Duration::from_millis(500));
        assert_eq!(e.tick(), 1);
        assert_eq!(e.get_player("p1").unwrap().position(), planar(2.0, 1.0));
    }

    #[test]
    fn snapshot_records_counts() {
        let e = engine(10.0);
        assert!(e.last_snapshot().is_none());
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        e.run_ticks(3);
        let s = e.snapshot();
        assert_eq!(s.tick, 3);
        assert_eq!(s.players, 1);
        assert_eq!(e.last_snapshot(), Some(s));
    }

    #[test]
    fn admitted_player_remembers_origin_cell() {
        let e = engine(10.0);
        let data = PlayerData {
            id: "p1".into(),
            name: "Ada".into(),
            pos: planar(12.5, 3.0),
            vel: planar(1.0, 0.0),
            yaw: 0.5,
            owned_cell: CellKey::new(0, 0),
            prev_cell: None,
            last_seq: 17,
        };
        let p = e.admit_transferred_player(&data);
        assert_eq!(p.owned_cell(), CellKey::new(1, 0));
        assert_eq!(p.prev_cell(), Some(CellKey::new(0, 0)));
        assert_eq!(p.last_seq(), 17);
        assert_eq!(p.entity().yaw(), 0.5);
    }

    #[test]
    fn resolve_without_in_flight_handover_is_ignored() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        assert!(!e.resolve_cross_node_handover("p1", &HandoverResponse::rejected("x")));
        assert!(!e.resolve_cross_node_handover("ghost", &HandoverResponse::rejected("x")));
    }

    #[test]
    fn restore_applies_position_and_loadout() {
        let e = engine(10.0);
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        let record = PlayerState {
            pos: planar(31.0, 1.0),
            skills_data: Some(serde_json::json!({"mining": 4})),
            ..PlayerState::default()
        };
        e.restore_player_state("p1", &record, &KnownTemplates::new()).unwrap();
        let p = e.get_player("p1").unwrap();
        assert_eq!(p.position(), planar(31.0, 1.0));
        assert_eq!(p.owned_cell(), CellKey::new(3, 0));
        assert_eq!(p.loadout().skills.get("mining"), Some(&4));
        assert_eq!(e.cell_members(CellKey::new(3, 0)), vec![EntityId::from("p1")]);
    }

    #[test]
    fn restore_rejects_unknown_player_and_bad_data() {
        let e = engine(10.0);
        let err = e
            .restore_player_state("ghost", &PlayerState::default(), &KnownTemplates::new())
            .unwrap_err();
        assert!(matches!(err, RestoreError::UnknownPlayer(_)));

        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        let record = PlayerState {
            pos: planar(50.0, 1.0),
            skills_data: Some(serde_json::json!("not a map")),
            ..PlayerState::default()
        };
        assert!(e.restore_player_state("p1", &record, &KnownTemplates::new()).is_err());
        // nothing applied
        assert_eq!(e.get_player("p1").unwrap().position(), planar(1.0, 1.0));
    }

    #[test]
    fn list_entities_puts_players_first() {
        let e = Engine::new(EngineConfig {
            cell_size: 10.0,
            target_density_per_cell: 6,
            seed: Some(2),
            ..EngineConfig::default()
        });
        e.add_or_update_player("p1", "Ada", planar(1.0, 1.0), DVec3::ZERO);
        e.maintain_bot_density();
        let entities = e.list_entities();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].kind(), EntityKind::Player);
        assert_eq!(entities[1].kind(), EntityKind::Bot);
        assert_eq!(e.entity_kind("bot-1"), Some(EntityKind::Bot));
    }
}
