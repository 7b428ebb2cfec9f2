mod server;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glam::DVec3;
use shardworld_common::planar;
use shardworld_sim::{
    Engine, EngineConfig, HandoverMode, HandoverService, NodeInfo, PeriodicTask, PlayerData,
    TOKEN_CLEANUP_INTERVAL,
};
use shardworld_spatial::CellKey;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use server::Node;

#[derive(Parser)]
#[command(name = "shardworld-node", about = "Sharded world simulation node")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct SimArgs {
    /// Cell size in meters
    #[arg(long = "cell", default_value_t = 256.0)]
    cell_size: f64,
    /// AOI radius in meters
    #[arg(long = "aoi", default_value_t = 128.0)]
    aoi_radius: f64,
    /// Simulation tick rate (Hz)
    #[arg(long = "tick", default_value_t = 20)]
    tick_hz: u32,
    /// Snapshot rate (Hz)
    #[arg(long = "snap", default_value_t = 10)]
    snapshot_hz: u32,
    /// Handover hysteresis in meters
    #[arg(long = "hyst", default_value_t = 2.0)]
    hysteresis: f64,
    /// Target actors (players + bots) per cell
    #[arg(long, default_value_t = 3)]
    bot_density: u32,
    /// Maximum bots across all cells; negative disables bots
    #[arg(long, default_value_t = 100, allow_negative_numbers = true)]
    max_bots: i64,
    /// reconnect or tunnel
    #[arg(long, default_value = "reconnect")]
    handover_mode: HandoverMode,
    /// RNG seed for bots
    #[arg(long)]
    seed: Option<u64>,
    /// Log every snapshot
    #[arg(long)]
    debug_snapshot: bool,
}

impl SimArgs {
    fn config(&self, node_id: String) -> EngineConfig {
        EngineConfig {
            cell_size: self.cell_size,
            aoi_radius: self.aoi_radius,
            tick_hz: self.tick_hz,
            snapshot_hz: self.snapshot_hz,
            handover_hysteresis: self.hysteresis,
            target_density_per_cell: self.bot_density,
            max_bots: self.max_bots,
            node_id,
            handover_mode: self.handover_mode,
            seed: self.seed,
            debug_snapshot: self.debug_snapshot,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node: tick loop plus HTTP endpoints
    Run {
        /// HTTP listen port
        #[arg(long, default_value_t = 8081)]
        port: u16,
        /// Unique node id (default: local:<port>)
        #[arg(long)]
        node_id: Option<String>,
        /// Host placed in reconnect URLs handed to clients
        #[arg(long, default_value = "localhost")]
        public_host: String,
        /// Shut down after this many seconds (default: run until killed)
        #[arg(long)]
        duration: Option<u64>,
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Walk one player across a cell border and report each handover
    Scenario {
        /// Seconds of simulated time
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f64,
        /// Player speed along +X in m/s
        #[arg(long, default_value_t = 5.0)]
        speed: f64,
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Send a player to another node's handover endpoint
    Handover {
        /// Id of the local (origin) node
        #[arg(long, default_value = "local:cli")]
        from_node: String,
        /// Target node id
        #[arg(long)]
        to_node: String,
        /// Target node address
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        /// Target node port
        #[arg(long)]
        port: u16,
        /// Token previously issued for this transfer
        #[arg(long)]
        token: String,
        /// Player id
        #[arg(long, default_value = "p1")]
        player: String,
        /// Player X/Z position
        #[arg(long, num_args = 2, default_values_t = [0.0, 0.0], allow_negative_numbers = true)]
        pos: Vec<f64>,
        /// Cell size used to derive the origin cell
        #[arg(long = "cell", default_value_t = 256.0)]
        cell_size: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Run {
            port,
            node_id,
            public_host,
            duration,
            sim,
        } => run_node(port, node_id, public_host, duration, sim),
        Commands::Scenario { seconds, speed, sim } => run_scenario(seconds, speed, sim),
        Commands::Handover {
            from_node,
            to_node,
            address,
            port,
            token,
            player,
            pos,
            cell_size,
        } => {
            let service = HandoverService::new(from_node, 0)?;
            let position = planar(pos[0], pos[1]);
            let data = PlayerData {
                id: player.as_str().into(),
                name: player.clone(),
                pos: position,
                vel: DVec3::ZERO,
                yaw: 0.0,
                owned_cell: shardworld_spatial::position_to_cell(position, cell_size),
                prev_cell: None,
                last_seq: 0,
            };
            let target = NodeInfo::new(to_node, address, port);
            let response = service
                .request_handover(&target, &data, &token)
                .with_context(|| format!("handing {player} over to {}", target.id))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                anyhow::bail!("handover rejected: {}", response.error);
            }
            Ok(())
        }
    }
}

fn run_node(
    port: u16,
    node_id: Option<String>,
    public_host: String,
    duration: Option<u64>,
    sim: SimArgs,
) -> anyhow::Result<()> {
    let node_id = node_id.unwrap_or_else(|| format!("local:{port}"));
    let engine = Arc::new(Engine::try_new(sim.config(node_id.clone())).context("invalid configuration")?);
    let handover = Arc::new(HandoverService::new(node_id.clone(), port)?.with_public_host(public_host));
    engine.set_cross_node_handover_service(handover.clone());
    engine.start();

    let cleanup = {
        let handover = Arc::clone(&handover);
        PeriodicTask::spawn("token-cleanup", TOKEN_CLEANUP_INTERVAL, move || {
            handover.cleanup_expired_tokens();
            ControlFlow::Continue(())
        })?
    };

    let server = tiny_http::Server::http(("0.0.0.0", port))
        .map_err(|e| anyhow::anyhow!("binding port {port}: {e}"))?;
    tracing::info!(
        node = %node_id,
        port,
        tick_hz = sim.tick_hz,
        snapshot_hz = sim.snapshot_hz,
        cell = sim.cell_size,
        aoi = sim.aoi_radius,
        bot_density = sim.bot_density,
        max_bots = sim.max_bots,
        "node listening"
    );

    let until = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let served = Node::new(Arc::clone(&engine), handover).serve(&server, until);

    tracing::info!("shutting down");
    cleanup.cancel(Duration::from_secs(1));
    if !engine.stop(Duration::from_secs(3)) {
        tracing::warn!("tick loop did not stop in time");
    }
    served
}

fn run_scenario(seconds: f64, speed: f64, sim: SimArgs) -> anyhow::Result<()> {
    let config = sim.config("local:scenario".to_owned());
    let engine = Engine::try_new(config).context("invalid configuration")?;
    let cs = engine.config().cell_size;
    let start = planar(cs - 0.1, cs / 2.0);
    engine.add_or_update_player("p1", "Walker", start, planar(speed, 0.0));
    println!(
        "scenario: cell={cs} hyst={} speed={speed} m/s start=({:.1},{:.1})",
        engine.config().handover_hysteresis,
        start.x,
        start.z
    );

    let dt = engine.config().tick_period();
    let ticks = (seconds / dt.as_secs_f64()).ceil() as u64;
    let began = Instant::now();
    for _ in 0..ticks {
        engine.step(dt);
        for ev in engine.drain_handover_events() {
            let pos = engine
                .get_player(ev.player_id.as_str())
                .map(|p| p.position())
                .unwrap_or_default();
            println!(
                "tick {:>5}: {} {} -> {} at x={:.2}",
                ev.tick, ev.player_id, ev.from, ev.to, pos.x
            );
        }
    }

    let summary = engine.snapshot();
    let metrics = engine.metrics_snapshot();
    let owned = engine
        .get_player("p1")
        .map_or(CellKey::new(0, 0), |p| p.owned_cell());
    println!(
        "done: ticks={} handovers={} bots={} owned={} in {:.2?}",
        summary.tick,
        metrics.handovers,
        summary.bots,
        owned,
        began.elapsed()
    );
    Ok(())
}
