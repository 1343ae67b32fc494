//! arbscan — sports betting arbitrage monitor.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store (running schema migrations), wires the feed client
//! into the refresh scheduler, starts the HTTP read surface, and waits
//! for SIGINT/SIGTERM to drive a graceful shutdown.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arbscan::config::AppConfig;
use arbscan::dashboard::{self, ApiState, ConfiguredSummary};
use arbscan::detector::DetectionConfig;
use arbscan::feed::the_odds_api::TheOddsApi;
use arbscan::scheduler::{Scheduler, SchedulerSettings};
use arbscan::store::Store;

const BANNER: &str = r#"
    _    ____  ____ ____   ____    _    _   _
   / \  |  _ \| __ ) ___| / ___|  / \  | \ | |
  / _ \ | |_) |  _ \___ \| |     / _ \ |  \| |
 / ___ \|  _ <| |_) |__) | |___ / ___ \| |\  |
/_/   \_\_| \_\____/____/ \____/_/   \_\_| \_|

  Sports Arbitrage Monitor v0.1.0
"#;

/// How long shutdown waits for the scheduler to drain.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        markets = %cfg.feed.markets,
        regions = %cfg.feed.regions,
        sports = cfg.feed.sports.len(),
        refresh_interval_s = cfg.scheduler.refresh_interval_secs,
        min_profit_pct = cfg.detector.min_profit_pct,
        "arbscan starting up"
    );

    // Fatal startup errors: missing API key, unreadable store path.
    let api_key = cfg.resolve_api_key()?;
    let store = Arc::new(
        Store::open(Path::new(&cfg.store.db_path))
            .with_context(|| format!("Failed to open store at {}", cfg.store.db_path))?,
    );

    let odds_format = cfg.odds_format()?;
    let feed = Arc::new(TheOddsApi::new(&cfg.feed, api_key, odds_format)?);

    let settings = SchedulerSettings {
        sports: cfg.feed.sports.clone(),
        refresh_interval: Duration::from_secs(cfg.scheduler.refresh_interval_secs),
        detection: DetectionConfig {
            markets: cfg.markets()?,
            min_profit_pct: cfg.detector.min_profit_pct,
            min_books: cfg.detector.min_books,
            odds_format,
        },
    };

    let cancel = CancellationToken::new();
    let (scheduler, scheduler_join) =
        Scheduler::spawn(feed, store.clone(), settings, cancel.clone());

    let server_join = if cfg.server.enabled {
        let state = Arc::new(ApiState {
            store,
            scheduler: scheduler.clone(),
            configured: ConfiguredSummary {
                api_key_configured: true,
                sports: cfg.feed.sports.clone(),
                markets: cfg.feed.markets.clone(),
                regions: cfg.feed.regions.clone(),
                odds_format: cfg.feed.odds_format.clone(),
                min_profit_pct: cfg.detector.min_profit_pct,
                refresh_interval_secs: cfg.scheduler.refresh_interval_secs,
            },
        });
        Some(dashboard::spawn_server(state, cfg.server.port, cancel.clone()).await?)
    } else {
        info!("API server disabled by config");
        None
    };

    shutdown_signal().await;
    info!("Shutdown signal received");
    cancel.cancel();

    if tokio::time::timeout(SHUTDOWN_WAIT, scheduler_join).await.is_err() {
        warn!("Scheduler did not stop within {SHUTDOWN_WAIT:?}");
    }
    if let Some(join) = server_join {
        if tokio::time::timeout(SHUTDOWN_WAIT, join).await.is_err() {
            warn!("API server did not stop within {SHUTDOWN_WAIT:?}");
        }
    }

    info!("arbscan shut down cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler; using Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arbscan=info"));

    let json_logging = std::env::var("ARBSCAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
