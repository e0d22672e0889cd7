use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use roombook::config::Config;
use roombook::dispatch::{Dispatcher, Inbound};
use roombook::engine::{Engine, SlotGrid};
use roombook::model::Requester;
use roombook::reaper;
use roombook::session::SessionTracker;
use roombook::store::LogStore;

/// Console front end: each stdin line is `<requester-id> <message>`, replies go to stdout.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    roombook::observability::init(config.metrics_port)?;

    // Invalid slot configuration is fatal before anything touches the data dir
    let grid = SlotGrid::new(config.day_start, config.day_end, config.slot_minutes)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("roombook.wal");
    let store = Arc::new(LogStore::open(&wal_path)?);

    let engine = Arc::new(Engine::new(store.clone(), grid));
    engine.seed_resources(&config.rooms).await?;

    let sessions = SessionTracker::default();
    tokio::spawn(reaper::run_session_reaper(sessions.clone(), config.session_idle));
    tokio::spawn(reaper::run_compactor(store.clone(), config.compact_threshold));

    let dispatcher = Dispatcher::new(engine.clone(), sessions);

    info!("roombook ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  hours: {}-{} ({} slots of {}min)",
        engine.grid().day_start().format("%H:%M"),
        engine.grid().day_end().format("%H:%M"),
        engine.grid().slots().len(),
        engine.grid().duration_minutes()
    );
    info!("  rooms: {}", config.rooms.join(", "));
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                let Some(inbound) = parse_line(&line) else {
                    if !line.trim().is_empty() {
                        eprintln!("expected: <requester-id> <message>");
                    }
                    continue;
                };
                for reply in dispatcher.handle(inbound).await {
                    println!("{reply}");
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = store.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("roombook stopped");
    Ok(())
}

fn parse_line(line: &str) -> Option<Inbound> {
    let (id, text) = line.trim().split_once(char::is_whitespace)?;
    let id: i64 = id.parse().ok()?;
    Some(Inbound {
        requester: Requester {
            id,
            username: None,
            full_name: String::new(),
        },
        text: text.trim().to_string(),
    })
}
