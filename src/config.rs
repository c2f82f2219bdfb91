//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The Stake access token is referenced by env-var name in the config and
//! resolved at runtime, then kept behind `SecretString`.
//!
//! Session amounts are written as strings, the way they are typed into a
//! form, and parsed defensively: anything unparseable or negative becomes
//! zero and is then rejected by session validation where zero is invalid.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use tracing::warn;

use crate::engine::balance::DEFAULT_REFRESH_EVERY;
use crate::engine::EngineSettings;
use crate::platforms::stake::DEFAULT_API_URL;
use crate::types::{Game, SessionConfig};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub session: SessionSettings,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub stake: StakeConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Session parameters as entered by the user.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_base_stake")]
    pub base_stake: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_game")]
    pub game: Game,
    #[serde(default = "default_target_multiplier")]
    pub target_multiplier: String,
    /// Fractional stake increase after a loss ("0.1" = +10%).
    #[serde(default = "default_loss_increase")]
    pub loss_increase: String,
    #[serde(default)]
    pub stop_on_win: bool,
    /// Start betting as soon as the binary is up.
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub inter_round_delay_ms: u64,
    pub balance_refresh_every: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StakeConfig {
    pub api_url: String,
    /// Name of the env var holding the access token.
    pub token_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    pub initial_balance: String,
    /// Simulated settlement round-trip.
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_base_stake() -> String {
    "0.00".into()
}

fn default_currency() -> String {
    "usdc".into()
}

fn default_game() -> Game {
    Game::Dice
}

fn default_target_multiplier() -> String {
    "2.0".into()
}

fn default_loss_increase() -> String {
    "0.1".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = EngineSettings::default();
        Self {
            inter_round_delay_ms: defaults.inter_round_delay.as_millis() as u64,
            balance_refresh_every: DEFAULT_REFRESH_EVERY,
        }
    }
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            token_env: "STAKE_API_TOKEN".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_balance: "100.00".into(),
            latency_ms: 0,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

/// Parse a user-entered amount. Invalid or negative input yields zero.
pub fn parse_amount(raw: &str) -> Decimal {
    match raw.trim().parse::<Decimal>() {
        Ok(value) if value >= Decimal::ZERO => value,
        Ok(value) => {
            warn!(input = raw, value = %value, "Negative amount, using 0");
            Decimal::ZERO
        }
        Err(_) => {
            warn!(input = raw, "Unparseable amount, using 0");
            Decimal::ZERO
        }
    }
}

impl SessionSettings {
    /// Build the session configuration. Not validated here; the session
    /// controller validates on start.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            base_stake: parse_amount(&self.base_stake),
            currency: self.currency.trim().to_lowercase(),
            game: self.game,
            target_multiplier: parse_amount(&self.target_multiplier),
            loss_increase_fraction: parse_amount(&self.loss_increase),
            stop_on_win: self.stop_on_win,
        }
    }
}

impl EngineConfig {
    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            inter_round_delay: Duration::from_millis(self.inter_round_delay_ms),
            balance_refresh_every: self.balance_refresh_every,
        }
    }
}

impl SimulationConfig {
    pub fn initial_balance(&self) -> Decimal {
        parse_amount(&self.initial_balance)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

impl StakeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The access token, if the configured env var is set and non-empty.
    pub fn token(&self) -> Option<SecretString> {
        AppConfig::resolve_env(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::new)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
