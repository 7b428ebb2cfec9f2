use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Errors from validating an [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("cell size must be > 0, got {0}")]
    CellSize(f64),
    #[error("AOI radius must be >= 0, got {0}")]
    AoiRadius(f64),
    #[error("tick rate must be >= 1 Hz, got {0}")]
    TickHz(u32),
    #[error("snapshot rate must be >= 1 Hz, got {0}")]
    SnapshotHz(u32),
    #[error("handover hysteresis must be >= 0, got {0}")]
    Hysteresis(f64),
    #[error("node id must not be empty")]
    EmptyNodeId,
    #[error("unknown handover mode {0:?} (expected \"reconnect\" or \"tunnel\")")]
    UnknownHandoverMode(String),
}

/// How a client follows its player across a node boundary.
///
/// Only `Reconnect` has defined behaviour; `Tunnel` is accepted for
/// configuration compatibility and currently behaves the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverMode {
    #[default]
    Reconnect,
    Tunnel,
}

impl FromStr for HandoverMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reconnect" => Ok(Self::Reconnect),
            "tunnel" => Ok(Self::Tunnel),
            other => Err(ConfigError::UnknownHandoverMode(other.to_owned())),
        }
    }
}

impl fmt::Display for HandoverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reconnect => "reconnect",
            Self::Tunnel => "tunnel",
        })
    }
}

/// Engine configuration. Immutable once the engine is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Edge length of a grid cell, in meters.
    pub cell_size: f64,
    /// Default AOI radius handed to clients, in meters.
    pub aoi_radius: f64,
    pub tick_hz: u32,
    pub snapshot_hz: u32,
    /// Overshoot past a cell border required before ownership moves, in meters.
    pub handover_hysteresis: f64,
    /// Desired actors (players + bots) per occupied cell. Zero disables bots.
    pub target_density_per_cell: u32,
    /// Global bot cap across all cells. Negative disables density control.
    pub max_bots: i64,
    pub node_id: String,
    pub handover_mode: HandoverMode,
    /// Seed for bot placement and wander. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Log a line at every snapshot boundary.
    pub debug_snapshot: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cell_size: 256.0,
            aoi_radius: 128.0,
            tick_hz: 20,
            snapshot_hz: 10,
            handover_hysteresis: 2.0,
            target_density_per_cell: 3,
            max_bots: 100,
            node_id: "local".to_owned(),
            handover_mode: HandoverMode::Reconnect,
            seed: None,
            debug_snapshot: false,
        }
    }
}

impl EngineConfig {
    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size > 0.0 && self.cell_size.is_finite()) {
            return Err(ConfigError::CellSize(self.cell_size));
        }
        if !(self.aoi_radius >= 0.0 && self.aoi_radius.is_finite()) {
            return Err(ConfigError::AoiRadius(self.aoi_radius));
        }
        if self.tick_hz < 1 {
            return Err(ConfigError::TickHz(self.tick_hz));
        }
        if self.snapshot_hz < 1 {
            return Err(ConfigError::SnapshotHz(self.snapshot_hz));
        }
        if !(self.handover_hysteresis >= 0.0 && self.handover_hysteresis.is_finite()) {
            return Err(ConfigError::Hysteresis(self.handover_hysteresis));
        }
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        Ok(())
    }

    /// Duration of one simulation step.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.tick_hz.max(1)
    }

    pub fn snapshot_period(&self) -> Duration {
        Duration::from_secs(1) / self.snapshot_hz.max(1)
    }

    /// Bot spawning is enabled when there is a target and the cap is not negative.
    pub fn density_control_enabled(&self) -> bool {
        self.target_density_per_cell > 0 && self.max_bots >= 0
    }
}
