//! WINGO — round settlement service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, recovers periods left unsettled by a previous run,
//! and drives the period clock with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use wingo::config::AppConfig;
use wingo::dashboard;
use wingo::engine::{Clock, SystemClock};
use wingo::service::Wingo;
use wingo::storage::sqlite::SqliteStore;
use wingo::storage::Stores;

const BANNER: &str = r#"
 __        _____ _   _  ____  ___
 \ \      / /_ _| \ | |/ ___|/ _ \
  \ \ /\ / / | ||  \| | |  _| | | |
   \ V  V /  | || |\  | |_| | |_| |
    \_/\_/  |___|_| \_|\____|\___/

  Round settlement engine v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let cfg = AppConfig::load(&path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %path,
        period_secs = cfg.game.period_secs,
        lockout_secs = cfg.game.lockout_secs,
        empty_book = ?cfg.game.empty_book,
        database = %cfg.storage.database_url,
        "WINGO starting up"
    );

    // -- Store & services ------------------------------------------------

    let store = Arc::new(SqliteStore::connect(&cfg.storage.database_url, cfg.storage.max_connections).await?);
    let stores = Stores::from_backend(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let dashboard_cfg = cfg.dashboard.clone();
    let wingo = Wingo::build(cfg, stores, clock)?;

    let mut period_clock = wingo.period_clock();
    let recovered = period_clock.recover(wingo.stores().periods.as_ref()).await?;
    info!(recovered, "Startup recovery complete");

    if dashboard_cfg.enabled {
        dashboard::spawn_dashboard(wingo.dashboard_state(), dashboard_cfg.port);
    }

    // -- Main loop -------------------------------------------------------

    info!(
        claimant = %wingo.settlement.claimant(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    period_clock
        .run(
            wingo.settlement.clone(),
            wingo.stores().periods.clone(),
            wingo.tick_interval(),
            shutdown,
        )
        .await;

    info!("WINGO stopped");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wingo=info"));

    if std::env::var("WINGO_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
