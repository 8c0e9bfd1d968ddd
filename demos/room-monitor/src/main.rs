//! Room Monitor Demo
//!
//! Runs the Livehub runtime against simulated in-process feeds:
//!
//! - every room gets a task that pushes chat, gift, and viewer events;
//! - feeds occasionally drop so the supervisor's reconnects show up in logs;
//! - a linked `viewer-stats` plugin counts events and answers `stats`;
//! - a popup attached to the plugin prints every envelope it receives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package room-monitor -- --rooms lobby,stage --duration 30
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use linkme::distributed_slice;
use livehub::core::envelope::ROOM_EVENT;
use livehub::plugin::PLUGIN_ENTRIES;
use livehub::prelude::*;
use livehub::runtime::config::AutoConnectRoom;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{Value, json};
use tracing::{info, warn};

// ============================================================================
// Command line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "room-monitor", about = "Watch simulated live rooms")]
struct Args {
    /// Configuration file (defaults to livehub.toml in the current directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rooms to connect at startup.
    #[arg(short, long, value_delimiter = ',', default_value = "lobby,stage")]
    rooms: Vec<String>,

    /// Mean delay between simulated events, in milliseconds.
    #[arg(long, default_value_t = 400)]
    interval_ms: u64,

    /// Chance that a feed drops after an event.
    #[arg(long, default_value_t = 0.02)]
    drop_rate: f64,

    /// Stop after this many seconds instead of waiting for Ctrl+C.
    #[arg(short, long)]
    duration: Option<u64>,
}

// ============================================================================
// Demo plugin
// ============================================================================

#[distributed_slice(PLUGIN_ENTRIES)]
static VIEWER_STATS: PluginEntry = PluginEntry::new("viewer-stats", viewer_stats);

/// Counts events per kind and reports the latest live-room count.
fn viewer_stats() -> PluginModule {
    #[derive(Default)]
    struct Stats {
        by_kind: BTreeMap<String, u64>,
        live_rooms: u64,
    }
    let stats = Arc::new(Mutex::new(Stats::default()));

    PluginModule::new("viewer-stats")
        .on_init(|ctx| async move {
            info!(plugin = %ctx.plugin_id, "viewer-stats ready");
            HookOutcome::ok()
        })
        .on_cleanup(|| async { HookOutcome::ok().with_message("bye") })
        .on_message(move |kind, payload| {
            let stats = Arc::clone(&stats);
            async move {
                let mut stats = stats.lock();
                match kind.as_str() {
                    "room-state" => {
                        stats.live_rooms = payload["liveRoomsCount"].as_u64().unwrap_or(0);
                        Ok(Value::Null)
                    }
                    "room-event" => {
                        let kind = payload["event"]["kind"].as_str().unwrap_or("unknown");
                        *stats.by_kind.entry(kind.to_string()).or_default() += 1;
                        Ok(Value::Null)
                    }
                    "stats" => Ok(json!({
                        "liveRooms": stats.live_rooms,
                        "events": stats.by_kind,
                    })),
                    other => Err(format!("unsupported message '{other}'").into()),
                }
            }
        })
}

// ============================================================================
// Simulated feeds
// ============================================================================

fn simulate(feeds: ChannelConnector, room_id: String, interval: Duration, drop_rate: f64) {
    tokio::spawn(async move {
        let mut viewers: u64 = 100;
        loop {
            let (delay, event, drop) = {
                let mut rng = rand::rng();
                viewers = viewers.saturating_add_signed(rng.random_range(-5..=8));
                let event = match rng.random_range(0..10) {
                    0..=5 => RoomEvent::new("chat", json!({ "text": "hello" })),
                    6..=7 => RoomEvent::new("gift", json!({ "value": rng.random_range(1..100u32) })),
                    _ => RoomEvent::new("viewers", Value::Null),
                }
                .with_viewers(viewers);
                let jitter = rng.random_range(0.5..1.5);
                (interval.mul_f64(jitter), event, rng.random_bool(drop_rate))
            };
            tokio::time::sleep(delay).await;

            // Not connected right now; the supervisor is retrying.
            if !feeds.push(&room_id, event) {
                continue;
            }
            if drop {
                warn!(room = %room_id, "Simulating feed drop");
                feeds.drop_connection(&room_id);
            }
        }
    });
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => livehub::runtime::config::load_config_from_file(path)?,
        None => livehub::runtime::config::load_config().unwrap_or_default(),
    };
    config.rooms.auto_connect.extend(args.rooms.iter().map(|id| AutoConnectRoom {
        id: id.clone(),
        priority: 0,
        label: None,
    }));

    let runtime = LivehubRuntime::from_config(&config)?;
    let manifest = PluginManifest::new("viewer-stats")
        .with_capability(Capability::RoomEvents)
        .with_capability(Capability::Window);
    runtime.register_plugin(runtime.registry().candidate(manifest)?);

    let feeds = runtime
        .channel()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("room-monitor needs the channel source"))?;
    let interval = Duration::from_millis(args.interval_ms);
    for room in &args.rooms {
        simulate(feeds.clone(), room.clone(), interval, args.drop_rate);
    }

    runtime.start().await?;

    let mut popup = runtime.plugins().open_popup("viewer-stats")?;
    tokio::spawn(async move {
        while let Some(envelope) = popup.receiver.recv().await {
            if envelope.event != ROOM_EVENT {
                info!(popup = %popup.popup_id, event = %envelope.event, "Popup envelope");
            }
        }
    });

    let control = runtime.control();
    let reporter = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            let rooms = control.handle("room.list", Value::Null).await;
            let stats = control.plugin_dispatch("viewer-stats", "stats", Value::Null).await;
            info!(
                live = %rooms["liveRoomsCount"],
                viewers = %rooms["totalViewers"],
                stats = %stats.result.unwrap_or_default(),
                "Room summary"
            );
        }
    });

    match args.duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down");
        }
    }

    reporter.abort();
    runtime.stop().await?;
    Ok(())
}
