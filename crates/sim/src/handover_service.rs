//! HTTP-backed [`CrossNodeHandover`]: mints tokens on the origin node,
//! redeems them on the destination node, and carries requests between the two.

use rand::TryRngCore;
use rand::rngs::OsRng;
use shardworld_spatial::CellKey;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use crate::cross_node::{
    CrossNodeError, CrossNodeHandover, HandoverRequest, HandoverResponse, HandoverToken,
    IssuedToken, PlayerData, TokenRejection,
};
use crate::node_registry::NodeInfo;

/// How long a minted token stays redeemable.
pub const TOKEN_TTL: Duration = Duration::from_secs(30);
/// Timeout for the outbound handover request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
/// How often the host should call [`HandoverService::cleanup_expired_tokens`].
pub const TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

const TOKEN_BYTES: usize = 16;

/// A plain HTTP reply, independent of the server library that sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    pub fn json<T: serde::Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => Self::text(500, format!("encoding response: {err}")),
        }
    }
}

/// Cross-node handover over HTTP with an in-memory token store.
pub struct HandoverService {
    node_id: String,
    public_host: String,
    port: u16,
    tokens: Mutex<HashMap<String, HandoverToken>>,
    http: reqwest::blocking::Client,
}

impl HandoverService {
    pub fn new(node_id: impl Into<String>, port: u16) -> Result<Self, CrossNodeError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(CrossNodeError::Client)?;
        Ok(Self {
            node_id: node_id.into(),
            public_host: "localhost".to_owned(),
            port,
            tokens: Mutex::new(HashMap::new()),
            http,
        })
    }

    /// Host name placed in the reconnect URL handed to clients.
    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn reconnect_url(&self) -> String {
        format!("ws://{}:{}/ws", self.public_host, self.port)
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, HandoverToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tokens currently held.
    pub fn token_count(&self) -> usize {
        self.tokens().len()
    }

    pub fn initiate_handover_at(
        &self,
        player: &PlayerData,
        target_node: &str,
        target_cell: CellKey,
        now: SystemTime,
    ) -> Result<IssuedToken, CrossNodeError> {
        let token = random_hex_token()?;
        let record = HandoverToken {
            player_id: player.id.clone(),
            from_node: self.node_id.clone(),
            to_node: target_node.to_owned(),
            from_cell: player.owned_cell,
            to_cell: target_cell,
            player_data: player.clone(),
            issued_at: now,
            expires_at: now + TOKEN_TTL,
        };
        self.tokens().insert(token.clone(), record.clone());
        tracing::info!(
            player = %player.id,
            to_node = target_node,
            from_cell = %player.owned_cell,
            to_cell = %target_cell,
            "issued handover token"
        );
        Ok(IssuedToken { token, record })
    }

    /// Look up `token` and check it against this node at `now`. An expired
    /// token is purged on sight.
    pub fn validate_handover_token_at(
        &self,
        token: &str,
        now: SystemTime,
    ) -> Result<HandoverToken, TokenRejection> {
        self.check_token(&mut self.tokens(), token, now)
    }

    fn check_token(
        &self,
        tokens: &mut HashMap<String, HandoverToken>,
        token: &str,
        now: SystemTime,
    ) -> Result<HandoverToken, TokenRejection> {
        let record = tokens.get(token).ok_or(TokenRejection::NotFound)?;
        if record.is_expired_at(now) {
            tokens.remove(token);
            return Err(TokenRejection::Expired);
        }
        if record.to_node != self.node_id {
            return Err(TokenRejection::WrongNode {
                expected: record.to_node.clone(),
                actual: self.node_id.clone(),
            });
        }
        Ok(record.clone())
    }

    /// Redeem a token. Success consumes it, so each token admits one player once.
    pub fn accept_handover_at(
        &self,
        request: &HandoverRequest,
        now: SystemTime,
    ) -> Result<HandoverResponse, CrossNodeError> {
        let resume_token = random_hex_token()?;
        // check and consume under one lock
        let checked = {
            let mut tokens = self.tokens();
            let checked = self.check_token(&mut tokens, &request.token, now);
            if let Ok(record) = &checked {
                if record.player_id == request.player_data.id {
                    tokens.remove(&request.token);
                }
            }
            checked
        };

        let record = match checked {
            Ok(record) => record,
            Err(TokenRejection::WrongNode { .. }) => {
                tracing::warn!(player = %request.player_data.id, "handover token for another node");
                return Ok(HandoverResponse::rejected(
                    "handover token not intended for this node",
                ));
            }
            Err(rejection) => {
                tracing::warn!(player = %request.player_data.id, %rejection, "rejected handover");
                return Ok(HandoverResponse::rejected(format!(
                    "invalid handover token: {rejection}"
                )));
            }
        };
        if record.player_id != request.player_data.id {
            tracing::warn!(
                token_player = %record.player_id,
                request_player = %request.player_data.id,
                "handover token presented for a different player"
            );
            return Ok(HandoverResponse::rejected(
                "invalid handover token: issued for a different player",
            ));
        }

        tracing::info!(
            player = %record.player_id,
            from_node = %record.from_node,
            to_cell = %record.to_cell,
            "accepted handover"
        );
        Ok(HandoverResponse::accepted(self.reconnect_url(), resume_token))
    }

    /// Drop every token past its expiry. Returns how many were removed.
    pub fn cleanup_expired_tokens_at(&self, now: SystemTime) -> usize {
        let mut tokens = self.tokens();
        let before = tokens.len();
        tokens.retain(|_, record| !record.is_expired_at(now));
        let removed = before - tokens.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = tokens.len(), "cleaned up expired handover tokens");
        }
        removed
    }

    pub fn cleanup_expired_tokens(&self) -> usize {
        self.cleanup_expired_tokens_at(SystemTime::now())
    }

    /// POST the player and token to `target`'s handover endpoint.
    pub fn request_handover(
        &self,
        target: &NodeInfo,
        player: &PlayerData,
        token: &str,
    ) -> Result<HandoverResponse, CrossNodeError> {
        let url = target.handover_url();
        let body = HandoverRequest {
            token: token.to_owned(),
            player_data: player.clone(),
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|source| CrossNodeError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrossNodeError::Status {
                url,
                status: status.as_u16(),
            });
        }
        response
            .json::<HandoverResponse>()
            .map_err(|source| CrossNodeError::Decode { url, source })
    }

    /// Serve one request to the handover endpoint. `on_accept` runs with the
    /// transferred player after its token has been redeemed.
    pub fn handle_http(
        &self,
        method: &str,
        body: &[u8],
        on_accept: impl FnOnce(&PlayerData),
    ) -> HttpReply {
        if !method.eq_ignore_ascii_case("POST") {
            return HttpReply::text(405, "method not allowed");
        }
        let request: HandoverRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => return HttpReply::text(400, format!("invalid request body: {err}")),
        };
        match self.accept_handover_at(&request, SystemTime::now()) {
            Ok(response) => {
                if response.success {
                    on_accept(&request.player_data);
                }
                HttpReply::json(200, &response)
            }
            Err(err) => {
                tracing::error!(error = %err, "handover acceptance failed");
                HttpReply::text(500, err.to_string())
            }
        }
    }
}

impl CrossNodeHandover for HandoverService {
    fn initiate_handover(
        &self,
        player: &PlayerData,
        target_node: &str,
        target_cell: CellKey,
    ) -> Result<IssuedToken, CrossNodeError> {
        self.initiate_handover_at(player, target_node, target_cell, SystemTime::now())
    }

    fn accept_handover(&self, request: &HandoverRequest) -> Result<HandoverResponse, CrossNodeError> {
        self.accept_handover_at(request, SystemTime::now())
    }

    fn validate_handover_token(&self, token: &str) -> Result<HandoverToken, TokenRejection> {
        self.validate_handover_token_at(token, SystemTime::now())
    }
}

fn random_hex_token() -> Result<String, CrossNodeError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CrossNodeError::TokenGeneration(e.to_string()))?;
    let mut out = String::with_capacity(TOKEN_BYTES * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardworld_common::{EntityId, planar};

    fn player(id: &str) -> PlayerData {
        PlayerData {
            id: EntityId::from(id),
            name: id.to_owned(),
            pos: planar(9.0, 1.0),
            vel: planar(1.0, 0.0),
            yaw: 0.0,
            owned_cell: CellKey::new(0, 0),
            prev_cell: None,
            last_seq: 0,
        }
    }

    fn service(node: &str) -> HandoverService {
        HandoverService::new(node, 8082).unwrap()
    }

    #[test]
    fn tokens_are_32_hex_chars_and_unique() {
        let a = random_hex_token().unwrap();
        let b = random_hex_token().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn issued_token_records_origin_and_expiry() {
        let svc = service("node-a");
        let now = SystemTime::now();
        let issued = svc
            .initiate_handover_at(&player("p1"), "node-b", CellKey::new(1, 0), now)
            .unwrap();
        assert_eq!(issued.record.from_node, "node-a");
        assert_eq!(issued.record.to_node, "node-b");
        assert_eq!(issued.record.from_cell, CellKey::new(0, 0));
        assert_eq!(issued.record.to_cell, CellKey::new(1, 0));
        assert_eq!(issued.record.expires_at, now + TOKEN_TTL);
        assert_eq!(svc.token_count(), 1);
    }

    #[test]
    fn validation_is_scoped_to_destination_node() {
        let svc = service("node-a");
        let now = SystemTime::now();
        let issued = svc
            .initiate_handover_at(&player("p1"), "node-b", CellKey::new(1, 0), now)
            .unwrap();
        assert_eq!(
            svc.validate_handover_token_at(&issued.token, now),
            Err(TokenRejection::WrongNode {
                expected: "node-b".into(),
                actual: "node-a".into()
            })
        );
        assert_eq!(
            svc.validate_handover_token_at("missing", now),
            Err(TokenRejection::NotFound)
        );
    }

    #[test]
    fn expired_token_is_rejected_and_purged() {
        let svc = service("node-b");
        let now = SystemTime::now();
        let issued = svc
            .initiate_handover_at(&player("p1"), "node-b", CellKey::new(1, 0), now)
            .unwrap();
        let later = now + TOKEN_TTL + Duration::from_secs(1);
        assert_eq!(
            svc.validate_handover_token_at(&issued.token, later),
            Err(TokenRejection::Expired)
        );
        assert_eq!(svc.token_count(), 0);
    }

    #[test]
    fn accept_consumes_token() {
        let svc = service("node-b");
        let now = SystemTime::now();
        let issued = svc
            .initiate_handover_at(&player("p1"), "node-b", CellKey::new(1, 0), now)
            .unwrap();
        let request = HandoverRequest {
            token: issued.token.clone(),
            player_data: player("p1"),
        };

        let first = svc.accept_handover_at(&request, now).unwrap();
        assert!(first.success);
        assert_eq!(first.target_ws_url, "ws://localhost:8082/ws");
        assert_eq!(first.resume_token.len(), 32);

        let second = svc.accept_handover_at(&request, now).unwrap();
        assert!(!second.success);
        assert!(second.error.starts_with("invalid handover token"));
    }

    #[test]
    fn accept_rejects_wrong_node_with_fixed_message() {
        let svc = service("node-a");
        let now = SystemTime::now();
        let issued = svc
            .initiate_handover_at(&player("p1"), "node-b", CellKey::new(1, 0), now)
            .unwrap();
        let response = svc
            .accept_handover_at(
                &HandoverRequest {
                    token: issued.token,
                    player_data: player("p1"),
                },
                now,
            )
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error, "handover token not intended for this node");
    }

    #[test]
    fn accept_rejects_token_for_another_player() {
        let svc = service("node-b");
        let now = SystemTime::now();
        let issued = svc
            .initiate_handover_at(&player("p1"), "node-b", CellKey::new(1, 0), now)
            .unwrap();
        let response = svc
            .accept_handover_at(
                &HandoverRequest {
                    token: issued.token,
                    player_data: player("intruder"),
                },
                now,
            )
            .unwrap();
        assert!(!response.success);
        assert_eq!(svc.token_count(), 1);
    }

    #[test]
    fn cleanup_removes_only_expired_tokens() {
        let svc = service("node-b");
        let t0 = SystemTime::now();
        svc.initiate_handover_at(&player("old"), "node-b", CellKey::new(1, 0), t0)
            .unwrap();
        svc.initiate_handover_at(
            &player("new"),
            "node-b",
            CellKey::new(1, 0),
            t0 + Duration::from_secs(20),
        )
        .unwrap();
        assert_eq!(svc.cleanup_expired_tokens_at(t0 + Duration::from_secs(31)), 1);
        assert_eq!(svc.token_count(), 1);
    }

    #[test]
    fn http_rejects_non_post_and_bad_bodies() {
        let svc = service("node-b");
        let reply = svc.handle_http("GET", b"", |_| panic!("must not admit"));
        assert_eq!(reply.status, 405);
        let reply = svc.handle_http("POST", b"{not json", |_| panic!("must not admit"));
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn http_accept_admits_player_and_returns_json() {
        let svc = service("node-b");
        let issued = svc
            .initiate_handover(&player("p1"), "node-b", CellKey::new(1, 0))
            .unwrap();
        let body = serde_json::to_vec(&HandoverRequest {
            token: issued.token,
            player_data: player("p1"),
        })
        .unwrap();

        let mut admitted = None;
        let reply = svc.handle_http("POST", &body, |data| admitted = Some(data.id.clone()));
        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type, "application/json");
        let response: HandoverResponse = serde_json::from_slice(&reply.body).unwrap();
        assert!(response.success);
        assert_eq!(admitted.as_ref().map(EntityId::as_str), Some("p1"));
    }

    #[test]
    fn http_rejection_is_still_200() {
        let svc = service("node-b");
        let body = serde_json::to_vec(&HandoverRequest {
            token: "bogus".into(),
            player_data: player("p1"),
        })
        .unwrap();
        let reply = svc.handle_http("POST", &body, |_| panic!("must not admit"));
        assert_eq!(reply.status, 200);
        let response: HandoverResponse = serde_json::from_slice(&reply.body).unwrap();
        assert!(!response.success);
        assert_eq!(response.error, "invalid handover token: token not found");
    }

    #[test]
    fn racing_accepts_redeem_a_token_once() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let svc = Arc::new(service("node-b"));
        for _ in 0..200 {
            let issued = svc
                .initiate_handover(&player("p1"), "node-b", CellKey::new(1, 0))
                .unwrap();
            let request = Arc::new(HandoverRequest {
                token: issued.token,
                player_data: player("p1"),
            });
            let barrier = Arc::new(Barrier::new(2));
            let racers: Vec<_> = (0..2)
                .map(|_| {
                    let (svc, request, barrier) =
                        (Arc::clone(&svc), Arc::clone(&request), Arc::clone(&barrier));
                    thread::spawn(move || {
                        barrier.wait();
                        svc.accept_handover(&request).unwrap().success
                    })
                })
                .collect();
            let accepted = racers
                .into_iter()
                .map(|r| r.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(accepted, 1);
        }
        assert_eq!(svc.token_count(), 0);
    }

    #[test]
    fn mismatched_player_leaves_token_redeemable() {
        let svc = service("node-b");
        let now = SystemTime::now();
        let issued = svc
            .initiate_handover_at(&player("p1"), "node-b", CellKey::new(1, 0), now)
            .unwrap();
        let wrong = HandoverRequest {
            token: issued.token.clone(),
            player_data: player("p2"),
        };
        assert!(!svc.accept_handover_at(&wrong, now).unwrap().success);
        assert_eq!(svc.token_count(), 1);
        let right = HandoverRequest {
            token: issued.token,
            player_data: player("p1"),
        };
        assert!(svc.accept_handover_at(&right, now).unwrap().success);
    }
}
