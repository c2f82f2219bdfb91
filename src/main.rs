//! Wager Wizard: autobetting control loop for Stake Dice and Limbo.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects to Stake (or the offline simulator when no token is set),
//! serves the control API and runs until Ctrl+C with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use wager_wizard::config;
use wager_wizard::dashboard::{self, routes::ControlState};
use wager_wizard::engine::SessionController;
use wager_wizard::platforms::simulated::SimulatedCasino;
use wager_wizard::platforms::stake::StakeClient;
use wager_wizard::platforms::WagerService;
use wager_wizard::types::{EventKind, SessionEvent};

const BANNER: &str = r#"
 __      __                         __      __ _                  _
 \ \    / /__ _  __ _  ___  _ _     \ \    / /(_) ___ __ _  _ _  __| |
  \ \/\/ // _` |/ _` |/ -_)| '_|     \ \/\/ / | ||_ // _` || '_|/ _` |
   \_/\_/ \__,_|\__, |\___||_|        \_/\_/  |_|/__|\__,_||_|  \__,_|
                |___/
  Autobetting for Stake Dice & Limbo
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    let session = cfg.session.to_session_config();
    info!(
        game = %session.game,
        currency = %session.currency,
        base_stake = format!("${:.2}", session.base_stake),
        target = %session.target_multiplier,
        "Wager Wizard starting up"
    );

    // -- Wager service ---------------------------------------------------

    let service: Arc<dyn WagerService> = match cfg.stake.token() {
        Some(token) => {
            info!(api_url = %cfg.stake.api_url, "Using Stake API");
            Arc::new(StakeClient::new(&cfg.stake.api_url, token, cfg.stake.timeout())?)
        }
        None => {
            let balance = cfg.simulation.initial_balance();
            warn!(
                token_env = %cfg.stake.token_env,
                balance = format!("${:.2}", balance),
                "No Stake token configured, running against the offline simulator"
            );
            Arc::new(
                SimulatedCasino::new(&session.currency, balance)
                    .with_latency(cfg.simulation.latency()),
            )
        }
    };

    let controller = Arc::new(SessionController::new(service, cfg.engine.to_settings()));
    tokio::spawn(log_events(controller.subscribe()));

    // -- Control API -----------------------------------------------------

    if cfg.dashboard.enabled {
        let state = Arc::new(ControlState::new(controller.clone(), cfg.session.clone()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    if cfg.session.autostart {
        if let Err(e) = controller.start(session).await {
            error!(error = %e, "Autostart failed");
        }
    } else {
        info!("Waiting for POST /api/start");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    let view = controller.shutdown().await;
    info!(
        rounds = view.stats.round_count,
        pnl = format!("${:.2}", view.stats.net_profit),
        wagered = format!("${:.2}", view.stats.wagered),
        win_rate = format!("{:.1}%", view.stats.win_rate()),
        "Wager Wizard shut down cleanly."
    );

    Ok(())
}

/// Mirror session events into the log.
async fn log_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.kind {
                EventKind::Started { config } => info!(config = %config, "Betting started"),
                EventKind::RoundSettled { result } => debug!(result = %result, "Bet settled"),
                EventKind::RoundFailed {
                    amount,
                    message,
                    fatal,
                } => warn!(
                    amount = format!("${:.2}", amount),
                    error = %message,
                    fatal,
                    "Bet failed"
                ),
                EventKind::BalanceUpdated { balance } => {
                    debug!(balance = format!("${:.2}", balance), "Balance")
                }
                EventKind::BalanceRefreshFailed { message } => {
                    warn!(error = %message, "Balance unavailable")
                }
                EventKind::Stopped { reason } => info!(reason = %reason, "Betting stopped"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wager_wizard=info"));

    let json_logging = std::env::var("WAGER_LOG_JSON").is_ok();

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
