//! Offline casino for demo runs without a Stake token.
//!
//! Settles wagers locally with the same odds the real games use
//! (win chance = 0.99 / multiplier, payout = amount × multiplier) and
//! keeps an in-memory balance so the affordability path is exercised.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::WagerService;
use crate::types::{BalanceSnapshot, SettledWager, WagerError, WagerRequest};

const SERVICE_NAME: &str = "simulated";

/// Return-to-player used for the simulated odds.
const RTP: f64 = 0.99;

struct Ledger {
    balance: Decimal,
    rng: StdRng,
    bets_placed: u64,
}

/// In-memory casino with a single-currency bankroll.
pub struct SimulatedCasino {
    currency: String,
    latency: Duration,
    ledger: Mutex<Ledger>,
}

impl SimulatedCasino {
    pub fn new(currency: &str, initial_balance: Decimal) -> Self {
        Self::with_rng(currency, initial_balance, StdRng::from_entropy())
    }

    /// Deterministic casino for tests and replays.
    pub fn with_seed(currency: &str, initial_balance: Decimal, seed: u64) -> Self {
        Self::with_rng(currency, initial_balance, StdRng::seed_from_u64(seed))
    }

    fn with_rng(currency: &str, initial_balance: Decimal, rng: StdRng) -> Self {
        Self {
            currency: currency.to_lowercase(),
            latency: Duration::ZERO,
            ledger: Mutex::new(Ledger {
                balance: initial_balance,
                rng,
                bets_placed: 0,
            }),
        }
    }

    /// Delay every settlement, mimicking a network round-trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn balance(&self) -> Decimal {
        self.ledger.lock().await.balance
    }

    pub async fn bets_placed(&self) -> u64 {
        self.ledger.lock().await.bets_placed
    }
}

/// Probability of a win at `multiplier`, clamped to [0, 1].
fn win_probability(multiplier: Decimal) -> f64 {
    match multiplier.to_f64() {
        Some(m) if m > 0.0 => (RTP / m).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

#[async_trait]
impl WagerService for SimulatedCasino {
    async fn place_wager(&self, request: &WagerRequest) -> Result<SettledWager, WagerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if request.currency.to_lowercase() != self.currency {
            return Err(WagerError::Rejected(format!(
                "Currency {} is not available",
                request.currency
            )));
        }
        if request.amount <= Decimal::ZERO {
            return Err(WagerError::Rejected("Bet amount must be positive".into()));
        }

        let mut ledger = self.ledger.lock().await;
        if request.amount > ledger.balance {
            return Err(WagerError::Rejected(format!(
                "Insufficient balance: need {:.2}, have {:.2}",
                request.amount, ledger.balance
            )));
        }

        let won = ledger.rng.gen_bool(win_probability(request.multiplier));
        let payout = if won {
            request.amount * request.multiplier
        } else {
            Decimal::ZERO
        };
        ledger.balance = ledger.balance - request.amount + payout;
        ledger.bets_placed += 1;

        debug!(
            won,
            amount = format!("${:.2}", request.amount),
            balance = format!("${:.2}", ledger.balance),
            "Simulated bet settled"
        );

        Ok(SettledWager {
            id: format!("sim-{}", uuid::Uuid::new_v4()),
            amount: request.amount,
            payout,
            currency: self.currency.clone(),
            game: request.game,
            settled_at: Utc::now(),
        })
    }

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, WagerError> {
        let ledger = self.ledger.lock().await;
        Ok(BalanceSnapshot::new().with(&self.currency, ledger.balance))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        SERVICE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
