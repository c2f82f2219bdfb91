//! Control API route handlers.
//!
//! All endpoints return JSON. Handlers share the session controller and
//! the configured session settings via `Arc<ControlState>`.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::SessionSettings;
use crate::engine::SessionController;
use crate::types::{Game, RoundResult, RunState, SessionConfig, SessionError, SessionView};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ControlState {
    pub controller: Arc<SessionController>,
    /// Session settings from config.toml; `POST /api/start` overrides these.
    pub session: SessionSettings,
}

impl ControlState {
    pub fn new(controller: Arc<SessionController>, session: SessionSettings) -> Self {
        Self {
            controller,
            session,
        }
    }
}

pub type AppState = Arc<ControlState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Optional overrides for `POST /api/start`. Amounts are strings, parsed
/// like the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    pub base_stake: Option<String>,
    pub currency: Option<String>,
    pub game: Option<Game>,
    pub target_multiplier: Option<String>,
    pub loss_increase: Option<String>,
    pub stop_on_win: Option<bool>,
}

impl StartRequest {
    pub fn apply(self, base: &SessionSettings) -> SessionConfig {
        let settings = SessionSettings {
            base_stake: self.base_stake.unwrap_or_else(|| base.base_stake.clone()),
            currency: self.currency.unwrap_or_else(|| base.currency.clone()),
            game: self.game.unwrap_or(base.game),
            target_multiplier: self
                .target_multiplier
                .unwrap_or_else(|| base.target_multiplier.clone()),
            loss_increase: self.loss_increase.unwrap_or_else(|| base.loss_increase.clone()),
            stop_on_win: self.stop_on_win.unwrap_or(base.stop_on_win),
            autostart: base.autostart,
        };
        settings.to_session_config()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub run_state: RunState,
    pub service: String,
    pub current_bet: Decimal,
    pub consecutive_losses: u32,
    pub balance: Option<Decimal>,
    pub config: Option<SessionConfig>,
    pub round_count: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub net_profit: Decimal,
    pub wagered: Decimal,
    pub longest_losing_streak: u32,
    pub last_result: Option<RoundResult>,
}

impl StatusResponse {
    fn from_view(view: &SessionView, service: &str) -> Self {
        Self {
            run_state: view.run_state,
            service: service.to_string(),
            current_bet: view.current_bet,
            consecutive_losses: view.consecutive_losses,
            balance: view.balance,
            config: view.config.clone(),
            round_count: view.stats.round_count,
            wins: view.stats.wins,
            losses: view.stats.losses,
            win_rate: view.stats.win_rate(),
            net_profit: view.stats.net_profit,
            wagered: view.stats.wagered,
            longest_losing_streak: view.stats.longest_losing_streak,
            last_result: view.stats.last().cloned(),
        }
    }
}

/// Error body returned by the control endpoints.
#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    BadRequest(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Session(e @ SessionError::InvalidConfig(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            ApiError::Session(e @ SessionError::InvalidState { .. }) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

fn status_of(state: &ControlState) -> StatusResponse {
    StatusResponse::from_view(&state.controller.snapshot(), state.controller.service_name())
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(status_of(&state))
}

/// GET /api/history (most recent first)
pub async fn get_history(State(state): State<AppState>) -> Json<Vec<RoundResult>> {
    let view = state.controller.snapshot();
    Json(view.stats.history.into_iter().collect())
}

/// POST /api/start with an optional JSON body of overrides.
pub async fn start(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let overrides: StartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid start request: {e}")))?
    };

    let config = overrides.apply(&state.session);
    state.controller.start(config).await?;
    info!("Session started via control API");
    Ok(Json(status_of(&state)))
}

/// POST /api/stop
pub async fn stop(State(state): State<AppState>) -> Json<StatusResponse> {
    state.controller.stop();
    Json(status_of(&state))
}

/// POST /api/reset
pub async fn reset(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.reset().await?;
    Ok(Json(status_of(&state)))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
