//! HTTP surface of a node: health, config, metrics, the handover endpoint,
//! and dev endpoints that poke the engine without a client transport.

use serde::Serialize;
use serde_json::json;
use shardworld_common::planar;
use shardworld_sim::{Engine, HandoverService, HttpReply, NodeInfo};
use shardworld_spatial::CellKey;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct Node {
    pub engine: Arc<Engine>,
    pub handover: Arc<HandoverService>,
    spawn_seq: AtomicU64,
}

#[derive(Serialize)]
struct PublicConfig {
    cell_size: f64,
    aoi_radius: f64,
    tick_hz: u32,
    snapshot_hz: u32,
    handover_hysteresis: f64,
}

fn query_params(url: &str) -> HashMap<String, String> {
    reqwest::Url::parse("http://node.local")
        .and_then(|base| base.join(url))
        .map(|u| u.query_pairs().into_owned().collect())
        .unwrap_or_default()
}

fn path_of(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

fn param_f64(q: &HashMap<String, String>, key: &str) -> f64 {
    q.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

fn missing(params: &str) -> HttpReply {
    HttpReply::text(400, format!("missing required parameters: {params}"))
}

impl Node {
    pub fn new(engine: Arc<Engine>, handover: Arc<HandoverService>) -> Self {
        Self {
            engine,
            handover,
            spawn_seq: AtomicU64::new(0),
        }
    }

    /// Dispatch one request. `url` is the request target, query included.
    pub fn route(&self, method: &str, url: &str, body: &[u8]) -> HttpReply {
        let q = query_params(url);
        match path_of(url) {
            "/healthz" => HttpReply::text(200, "ok"),
            "/config" => {
                let c = self.engine.config();
                HttpReply::json(
                    200,
                    &PublicConfig {
                        cell_size: c.cell_size,
                        aoi_radius: c.aoi_radius,
                        tick_hz: c.tick_hz,
                        snapshot_hz: c.snapshot_hz,
                        handover_hysteresis: c.handover_hysteresis,
                    },
                )
            }
            "/metrics.json" => HttpReply::json(200, &self.engine.metrics_snapshot()),
            "/handover" => self.handover.handle_http(method, body, |data| {
                self.engine.admit_transferred_player(data);
            }),
            "/dev/spawn" => {
                let id = q.get("id").filter(|s| !s.is_empty()).cloned().unwrap_or_else(|| {
                    format!("dev-{}", self.spawn_seq.fetch_add(1, Ordering::Relaxed) + 1)
                });
                let name = q
                    .get("name")
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "Player".to_owned());
                let pos = planar(param_f64(&q, "x"), param_f64(&q, "z"));
                HttpReply::json(200, &self.engine.dev_spawn(id, name, pos))
            }
            "/dev/vel" => {
                let id = q.get("id").map(String::as_str).unwrap_or_default();
                let vel = planar(param_f64(&q, "vx"), param_f64(&q, "vz"));
                if self.engine.set_velocity(id, vel) {
                    HttpReply::text(200, "ok")
                } else {
                    HttpReply::text(404, "unknown id")
                }
            }
            "/dev/players" => HttpReply::json(200, &self.engine.list_players()),
            "/dev/entities" => HttpReply::json(200, &self.engine.list_entities()),
            "/dev/node/register" => {
                let (Some(id), Some(address), Some(port)) =
                    (q.get("id"), q.get("address"), q.get("port"))
                else {
                    return missing("id, address, port");
                };
                let Ok(port) = port.parse::<u16>() else {
                    return HttpReply::text(400, "invalid port");
                };
                self.engine
                    .register_node(NodeInfo::new(id.clone(), address.clone(), port));
                HttpReply::json(200, &json!({"status": "registered", "node_id": id}))
            }
            "/dev/node/unregister" => {
                let Some(id) = q.get("id") else {
                    return missing("id");
                };
                match self.engine.unregister_node(id) {
                    Some(released) => HttpReply::json(
                        200,
                        &json!({"status": "unregistered", "node_id": id, "released_cells": released}),
                    ),
                    None => HttpReply::text(404, "unknown node"),
                }
            }
            "/dev/node/assign-cell" => {
                let (Some(node_id), Some(cx), Some(cz)) =
                    (q.get("node_id"), q.get("cx"), q.get("cz"))
                else {
                    return missing("node_id, cx, cz");
                };
                let (Ok(cx), Ok(cz)) = (cx.parse::<i32>(), cz.parse::<i32>()) else {
                    return HttpReply::text(400, "invalid cell coordinates");
                };
                let cell = CellKey::new(cx, cz);
                self.engine.assign_cell_to_node(cell, node_id.clone());
                HttpReply::json(
                    200,
                    &json!({"status": "assigned", "cell": cell, "node_id": node_id}),
                )
            }
            "/dev/node/info" => HttpReply::json(
                200,
                &json!({
                    "local_node_id": self.engine.local_node_id(),
                    "nodes": self.engine.list_nodes(),
                    "assignments": self.engine.registry().assignments()
                        .into_iter()
                        .map(|(cell, node)| json!({"cell": cell, "node_id": node}))
                        .collect::<Vec<_>>(),
                }),
            ),
            _ => HttpReply::text(404, "not found"),
        }
    }

    /// Serve requests until `until` passes, or forever when it is `None`.
    pub fn serve(&self, server: &tiny_http::Server, until: Option<Instant>) -> anyhow::Result<()> {
        loop {
            let wait = match until {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(());
                    }
                    left.min(Duration::from_millis(250))
                }
                None => Duration::from_millis(250),
            };
            let Some(mut request) = server.recv_timeout(wait)? else {
                continue;
            };

            let mut body = Vec::new();
            if let Err(err) = request.as_reader().read_to_end(&mut body) {
                tracing::warn!(error = %err, "reading request body");
                continue;
            }
            let method = request.method().to_string();
            let url = request.url().to_owned();
            let reply = self.route(&method, &url, &body);
            tracing::debug!(%method, %url, status = reply.status, "http");

            let header = tiny_http::Header::from_bytes("Content-Type", reply.content_type)
                .map_err(|()| anyhow::anyhow!("invalid content type {}", reply.content_type))?;
            let response = tiny_http::Response::from_data(reply.body)
                .with_status_code(reply.status)
                .with_header(header);
            if let Err(err) = request.respond(response) {
                tracing::warn!(error = %err, %url, "writing response");
            }
        }
    }
}
