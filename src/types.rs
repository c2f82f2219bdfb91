//! Shared types for the Wager Wizard engine.
//!
//! These types form the data model used across all modules: the
//! session configuration, strategy state, settled rounds, cumulative
//! statistics and the errors that cross module boundaries.
//! Amounts are `Decimal` end to end; rounding to two digits happens
//! only when formatting for display.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Maximum number of settled rounds kept in the session history.
pub const HISTORY_CAPACITY: usize = 100;

/// Lowest target multiplier the games accept.
pub const MIN_MULTIPLIER: Decimal = dec!(1.01);

/// Highest target multiplier offered by the controls.
pub const MAX_MULTIPLIER: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Casino game the session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Dice,
    Limbo,
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Game::Dice => write!(f, "Dice"),
            Game::Limbo => write!(f, "Limbo"),
        }
    }
}

/// Attempt to parse a string into a Game (case-insensitive).
impl std::str::FromStr for Game {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dice" => Ok(Game::Dice),
            "limbo" => Ok(Game::Limbo),
            _ => Err(anyhow::anyhow!("Unknown game: {s}")),
        }
    }
}

/// Result of a settled round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    /// A round is a win only when the payout exceeds the stake.
    pub fn from_settlement(amount: Decimal, payout: Decimal) -> Self {
        if payout > amount {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// Stop requested while a round is still in flight.
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    UserRequest,
    StopOnWin,
    InsufficientBalance,
    Fatal(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::UserRequest => write!(f, "user request"),
            StopReason::StopOnWin => write!(f, "stop on win"),
            StopReason::InsufficientBalance => write!(f, "insufficient balance"),
            StopReason::Fatal(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session configuration & strategy state
// ---------------------------------------------------------------------------

/// User-chosen parameters for one run. Immutable while the session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_stake: Decimal,
    /// Currency ticker forwarded to the service as-is (e.g. "usdc").
    pub currency: String,
    pub game: Game,
    pub target_multiplier: Decimal,
    /// Fractional stake increase after a loss (0 = flat staking).
    pub loss_increase_fraction: Decimal,
    pub stop_on_win: bool,
}

impl SessionConfig {
    /// Reject configurations a session must never start with.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.base_stake <= Decimal::ZERO {
            return Err(SessionError::InvalidConfig(format!(
                "base stake must be positive, got {}",
                self.base_stake
            )));
        }
        if self.target_multiplier < MIN_MULTIPLIER || self.target_multiplier > MAX_MULTIPLIER {
            return Err(SessionError::InvalidConfig(format!(
                "target multiplier {} outside [{MIN_MULTIPLIER}, {MAX_MULTIPLIER}]",
                self.target_multiplier
            )));
        }
        if self.loss_increase_fraction < Decimal::ZERO {
            return Err(SessionError::InvalidConfig(format!(
                "loss increase must not be negative, got {}",
                self.loss_increase_fraction
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(SessionError::InvalidConfig("currency is empty".into()));
        }
        Ok(())
    }

    /// Helper to build a test/sample config with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        SessionConfig {
            base_stake: dec!(1.00),
            currency: "usdc".to_string(),
            game: Game::Limbo,
            target_multiplier: dec!(2.00),
            loss_increase_fraction: dec!(0.5),
            stop_on_win: false,
        }
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} base=${:.2} {} target={:.2}x loss+=",
            self.game, self.base_stake, self.currency, self.target_multiplier,
        )?;
        match self.loss_increase_fraction.checked_mul(dec!(100)) {
            Some(percent) => write!(f, "{percent}%")?,
            None => write!(f, "x{}", self.loss_increase_fraction)?,
        }
        write!(f, " stop_on_win={}", self.stop_on_win)
    }
}

/// Per-round state of the staking strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    /// Amount the next round will wager. Always positive.
    pub next_stake: Decimal,
    pub consecutive_losses: u32,
}

impl StrategyState {
    pub fn initial(base_stake: Decimal) -> Self {
        Self {
            next_stake: base_stake,
            consecutive_losses: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Wager service payloads
// ---------------------------------------------------------------------------

/// A single wager as sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WagerRequest {
    pub amount: Decimal,
    pub multiplier: Decimal,
    pub currency: String,
    pub game: Game,
}

impl WagerRequest {
    pub fn new(config: &SessionConfig, amount: Decimal) -> Self {
        Self {
            amount,
            multiplier: config.target_multiplier,
            currency: config.currency.clone(),
            game: config.game,
        }
    }
}

/// A wager the service has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledWager {
    pub id: String,
    pub amount: Decimal,
    pub payout: Decimal,
    pub currency: String,
    pub game: Game,
    pub settled_at: DateTime<Utc>,
}

/// Available balance per currency, keyed by lowercase ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    balances: HashMap<String, Decimal>,
}

impl BalanceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, currency: &str, amount: Decimal) -> Self {
        self.insert(currency, amount);
        self
    }

    pub fn insert(&mut self, currency: &str, amount: Decimal) {
        self.balances.insert(currency.to_lowercase(), amount);
    }

    /// Available amount in `currency`, if the account holds it.
    pub fn available(&self, currency: &str) -> Option<Decimal> {
        self.balances.get(&currency.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Rounds & statistics
// ---------------------------------------------------------------------------

/// One settled round as recorded in the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub id: String,
    pub amount: Decimal,
    pub multiplier: Decimal,
    pub outcome: Outcome,
    /// Positive on a win, `-amount` on a loss.
    pub profit: Decimal,
    pub timestamp: DateTime<Utc>,
    pub currency: String,
}

impl RoundResult {
    pub fn from_settlement(wager: &SettledWager, multiplier: Decimal) -> Self {
        let outcome = Outcome::from_settlement(wager.amount, wager.payout);
        let profit = match outcome {
            Outcome::Win => wager.payout - wager.amount,
            Outcome::Loss => -wager.amount,
        };
        Self {
            id: wager.id.clone(),
            amount: wager.amount,
            multiplier,
            outcome,
            profit,
            timestamp: wager.settled_at,
            currency: wager.currency.clone(),
        }
    }

    pub fn is_win(&self) -> bool {
        self.outcome == Outcome::Win
    }
}

impl fmt::Display for RoundResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.profit >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "{} ${:.2} {} @ {:.2}x ({sign}{:.2}) [{}]",
            self.outcome, self.amount, self.currency, self.multiplier, self.profit, self.id,
        )
    }
}

/// Cumulative statistics for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub round_count: u64,
    pub net_profit: Decimal,
    pub wins: u64,
    pub losses: u64,
    /// Sum of all settled stakes.
    pub wagered: Decimal,
    pub longest_losing_streak: u32,
    losing_streak: u32,
    /// Most recent first, at most `HISTORY_CAPACITY` entries.
    pub history: VecDeque<RoundResult>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rounds={} (W{}/L{}) | win_rate={:.1}% | wagered=${:.2} | PnL=${:.2} | worst_streak={}",
            self.round_count,
            self.wins,
            self.losses,
            self.win_rate(),
            self.wagered,
            self.net_profit,
            self.longest_losing_streak,
        )
    }
}

impl SessionStats {
    /// Fold a settled round into the counters and the bounded history.
    pub fn record(&mut self, result: RoundResult) {
        self.round_count += 1;
        // Totals saturate instead of overflowing on absurd stakes.
        self.net_profit = self.net_profit.checked_add(result.profit).unwrap_or(
            if result.profit.is_sign_negative() { Decimal::MIN } else { Decimal::MAX },
        );
        self.wagered = self.wagered.checked_add(result.amount).unwrap_or(Decimal::MAX);
        match result.outcome {
            Outcome::Win => {
                self.wins += 1;
                self.losing_streak = 0;
            }
            Outcome::Loss => {
                self.losses += 1;
                self.losing_streak += 1;
                self.longest_losing_streak = self.longest_losing_streak.max(self.losing_streak);
            }
        }

        self.history.push_front(result);
        self.history.truncate(HISTORY_CAPACITY);
    }

    /// Win rate as a percentage. Returns 0.0 if nothing has settled.
    pub fn win_rate(&self) -> f64 {
        if self.round_count == 0 {
            0.0
        } else {
            (self.wins as f64 / self.round_count as f64) * 100.0
        }
    }

    pub fn last(&self) -> Option<&RoundResult> {
        self.history.front()
    }
}

// ---------------------------------------------------------------------------
// Presentation view & events
// ---------------------------------------------------------------------------

/// Read-only snapshot published to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionView {
    pub run_state: RunState,
    /// Stake the next round will place ("current bet").
    pub current_bet: Decimal,
    pub consecutive_losses: u32,
    /// Last known available balance in the session currency.
    pub balance: Option<Decimal>,
    pub config: Option<SessionConfig>,
    pub stats: SessionStats,
}

impl fmt::Display for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let balance = match self.balance {
            Some(b) => format!("${b:.2}"),
            None => "unknown".to_string(),
        };
        write!(
            f,
            "[{}] bet=${:.2} balance={balance} | {}",
            self.run_state, self.current_bet, self.stats,
        )
    }
}

/// Notification emitted by the session controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl SessionEvent {
    pub fn now(kind: EventKind) -> Self {
        Self { at: Utc::now(), kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventKind {
    Started { config: SessionConfig },
    RoundSettled { result: RoundResult },
    /// A round that did not settle. Non-fatal failures retry the same
    /// stake; a fatal one is followed by `Stopped`.
    RoundFailed {
        amount: Decimal,
        message: String,
        fatal: bool,
    },
    BalanceUpdated { balance: Decimal },
    BalanceRefreshFailed { message: String },
    Stopped { reason: StopReason },
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure reported by the wager service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WagerError {
    #[error("Request failed: {0}")]
    Transport(String),

    /// The service refused the request; carries its own message.
    #[error("{0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl WagerError {
    /// Whether the message points at an affordability problem.
    pub fn is_funds_related(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("balance") || text.contains("funds")
    }
}

/// Failure of a single betting round.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoundError {
    /// Pre-flight check: stake exceeds the last known balance.
    #[error("Insufficient balance: need ${needed:.2}, have ${available:.2}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    /// The service rejected the wager for lack of funds.
    #[error("Insufficient funds: {0}")]
    FundsRejected(WagerError),

    #[error("Round failed: {0}")]
    Transient(WagerError),
}

impl RoundError {
    /// Fatal errors end the session; transient ones are retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RoundError::Transient(_))
    }
}

/// Errors returned synchronously by the session controller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
