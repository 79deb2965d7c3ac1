//! LEDGER DICE: provably-fair Hi-Lo venue on the XRP Ledger
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the checkpoint, wires the stream client, signer and paid
//! ledger, and runs the venue loop until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use ledger_dice::config::{SigningMode, VenueConfig};
use ledger_dice::dashboard::{self, DashboardState};
use ledger_dice::engine::decision::DecisionEngine;
use ledger_dice::engine::orchestrator::{Venue, VenueSettings};
use ledger_dice::ledger::client::StreamClient;
use ledger_dice::ledger::signer::{NodeSigner, PaymentSigner, RemoteSigner};
use ledger_dice::ledger::ws::WsConnector;
use ledger_dice::storage::{self, paid::PaidLedger};

const BANNER: &str = r#"
 _     _____ ____   ____ _____ ____    ____ ___ ____ _____
| |   | ____|  _ \ / ___| ____|  _ \  |  _ \_ _/ ___| ____|
| |   |  _| | | | | |  _|  _| | |_) | | | | | | |   |  _|
| |___| |___| |_| | |_| | |___|  _ <  | |_| | | |___| |___
|_____|_____|____/ \____|_____|_| \_\ |____/___\____|_____|

  Provably-fair Hi-Lo on the XRP Ledger
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = VenueConfig::default_path();
    let cfg = VenueConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        venue = %cfg.venue.name,
        account = %cfg.venue.account,
        node = %cfg.venue.node_url,
        game_bits = cfg.game.game_bits,
        win_threshold = cfg.game.win_threshold,
        payout_ratio = %cfg.game.payout_ratio,
        signing = ?cfg.signing.mode,
        "LEDGER DICE starting up"
    );

    // -- Restore state ---------------------------------------------------

    let checkpoint = storage::load_checkpoint(Some(&cfg.storage.checkpoint_path))?;
    let paid = PaidLedger::connect(&cfg.storage.paid_db_url).await?;

    // -- Initialise components -------------------------------------------

    let secrets = cfg
        .secret_schedule()
        .context("Failed to resolve fairness secrets")?;
    info!(entries = secrets.len(), "Fairness secret schedule loaded");
    let engine = DecisionEngine::new(cfg.game_policy(), Arc::new(secrets));

    let signer: Box<dyn PaymentSigner> = match cfg.signing.mode {
        SigningMode::Node => Box::new(NodeSigner::new(cfg.venue_secret()?)),
        SigningMode::Remote => {
            let url = cfg
                .signing
                .remote_url
                .clone()
                .context("signing.remote_url is required for remote signing")?;
            info!(%url, "Using remote signer");
            Box::new(RemoteSigner::new(url)?)
        }
    };

    let client = StreamClient::new(Box::new(WsConnector::new(cfg.venue.node_url.clone())));

    let settings = VenueSettings {
        account: cfg.venue.account.clone(),
        checkpoint_path: cfg.storage.checkpoint_path.clone(),
        cashout: cfg.cashout_policy(),
        reconnect: cfg.reconnect_policy(),
        backlog_timeout: cfg.backlog_timeout(),
    };
    let mut venue = Venue::new(settings, client, engine, signer, paid, checkpoint.clone());

    if cfg.dashboard.enabled {
        let monitor = Arc::new(DashboardState::new(
            cfg.venue.name.clone(),
            cfg.venue.account.clone(),
            checkpoint,
        ));
        dashboard::spawn_dashboard(monitor.clone(), cfg.dashboard.port);
        venue = venue.with_monitor(monitor);
    }

    // -- Main loop -------------------------------------------------------

    info!("Entering venue loop. Press Ctrl+C to stop.");

    tokio::select! {
        _ = venue.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    venue.shutdown().await;
    info!("LEDGER DICE shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ledger_dice=info"));

    let json_logging = std::env::var("LEDGER_DICE_LOG_JSON").is_ok();

    if json_logging {
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
