//! Wire types and the service seam for moving a player between nodes.
//!
//! The engine only depends on [`CrossNodeHandover`]; the HTTP-backed
//! implementation lives in [`crate::handover_service`].

use glam::DVec3;
use serde::{Deserialize, Serialize};
use shardworld_common::EntityId;
use shardworld_spatial::CellKey;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Minimal replicated state that travels with a player to the next node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerData {
    pub id: EntityId,
    pub name: String,
    pub pos: DVec3,
    pub vel: DVec3,
    pub yaw: f64,
    pub owned_cell: CellKey,
    #[serde(default)]
    pub prev_cell: Option<CellKey>,
    #[serde(default)]
    pub last_seq: u64,
}

/// Single-use authorization minted by the origin node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverToken {
    pub player_id: EntityId,
    pub from_node: String,
    pub to_node: String,
    pub from_cell: CellKey,
    pub to_cell: CellKey,
    pub player_data: PlayerData,
    #[serde(with = "unix_millis")]
    pub issued_at: SystemTime,
    #[serde(with = "unix_millis")]
    pub expires_at: SystemTime,
}

impl HandoverToken {
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }
}

/// A freshly minted token and the record stored under it.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub record: HandoverToken,
}

/// Body of `POST /handover`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverRequest {
    pub token: String,
    pub player_data: PlayerData,
}

/// Reply to a handover request. A failed acceptance is still a well-formed
/// response with `success == false` and a reason in `error`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HandoverResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_ws_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resume_token: String,
}

impl HandoverResponse {
    pub fn accepted(target_ws_url: String, resume_token: String) -> Self {
        Self {
            success: true,
            target_ws_url,
            resume_token,
            ..Self::default()
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverStatus {
    InProgress,
    Completed,
    Failed,
}

/// Progress of a player's cross-node transfer, kept on the origin node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossNodeHandoverState {
    pub target_node: String,
    pub from_cell: CellKey,
    pub to_cell: CellKey,
    pub status: HandoverStatus,
    #[serde(with = "unix_millis")]
    pub initiated_at: SystemTime,
    pub token: Option<String>,
    pub error: Option<String>,
}

impl CrossNodeHandoverState {
    pub fn is_in_flight(&self) -> bool {
        self.status == HandoverStatus::InProgress
    }
}

/// Why a presented token was not honoured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("token not found")]
    NotFound,
    #[error("token expired")]
    Expired,
    #[error("token issued for node {expected}, presented to {actual}")]
    WrongNode { expected: String, actual: String },
}

/// Errors from the cross-node handover service.
#[derive(Debug, thiserror::Error)]
pub enum CrossNodeError {
    #[error("generating random token: {0}")]
    TokenGeneration(String),
    #[error("building HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("sending handover request to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("handover request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("decoding handover response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// The engine's view of a cross-node handover implementation.
pub trait CrossNodeHandover: Send + Sync {
    /// Mint and store a token for moving `player` to `target_cell` on `target_node`.
    fn initiate_handover(
        &self,
        player: &PlayerData,
        target_node: &str,
        target_cell: CellKey,
    ) -> Result<IssuedToken, CrossNodeError>;

    /// Validate and consume the request's token. Expected failures come back
    /// as a rejected response; `Err` is reserved for local faults.
    fn accept_handover(&self, request: &HandoverRequest) -> Result<HandoverResponse, CrossNodeError>;

    fn validate_handover_token(&self, token: &str) -> Result<HandoverToken, TokenRejection>;
}

/// Serialize `SystemTime` as integer milliseconds since the Unix epoch.
pub(crate) mod unix_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let ms = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_millis(ms))
    }
}
