//! Scripted casino for integration testing.
//!
//! Settles wagers from a pre-programmed list of outcomes, records every
//! dispatched amount and tracks how many wagers were in flight at once.
//! Once the script runs out it rejects with "Insufficient funds", which
//! ends the session.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use wager_wizard::platforms::WagerService;
use wager_wizard::types::*;

/// One scripted settlement.
#[derive(Debug, Clone)]
pub enum Step {
    Win,
    Loss,
    Fail(WagerError),
}

pub struct ScriptedCasino {
    script: Mutex<VecDeque<Step>>,
    dispatched: Mutex<Vec<Decimal>>,
    /// Tracked only when set; debited and credited per settlement.
    balance: Mutex<Option<Decimal>>,
    latency: Duration,
    balance_latency: Duration,
    balance_fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    settled: AtomicUsize,
}

impl ScriptedCasino {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            dispatched: Mutex::new(Vec::new()),
            balance: Mutex::new(None),
            latency: Duration::ZERO,
            balance_latency: Duration::ZERO,
            balance_fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            settled: AtomicUsize::new(0),
        }
    }

    pub fn with_balance(self, balance: Decimal) -> Self {
        *self.balance.lock().unwrap() = Some(balance);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay every balance fetch.
    pub fn with_balance_latency(mut self, latency: Duration) -> Self {
        self.balance_latency = latency;
        self
    }

    /// Number of `fetch_balance` calls so far, failed ones included.
    pub fn balance_fetches(&self) -> usize {
        self.balance_fetches.load(Ordering::SeqCst)
    }

    /// Amounts of every wager that reached the casino, in order.
    pub fn dispatched(&self) -> Vec<Decimal> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn balance(&self) -> Option<Decimal> {
        *self.balance.lock().unwrap()
    }

    /// Poll until `n` wagers have been dispatched.
    pub async fn wait_for_dispatch(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.dispatched.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for dispatch");
    }
}

#[async_trait]
impl WagerService for ScriptedCasino {
    async fn place_wager(&self, request: &WagerRequest) -> Result<SettledWager, WagerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.dispatched.lock().unwrap().push(request.amount);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let step = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let payout = match step {
            Some(Step::Win) => request.amount * request.multiplier,
            Some(Step::Loss) => Decimal::ZERO,
            Some(Step::Fail(e)) => return Err(e),
            None => return Err(WagerError::Rejected("Insufficient funds".into())),
        };

        if let Some(balance) = self.balance.lock().unwrap().as_mut() {
            *balance = *balance - request.amount + payout;
        }
        let n = self.settled.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(SettledWager {
            id: format!("bet-{n}"),
            amount: request.amount,
            payout,
            currency: request.currency.clone(),
            game: request.game,
            settled_at: Utc::now(),
        })
    }

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, WagerError> {
        self.balance_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.balance_latency.is_zero() {
            tokio::time::sleep(self.balance_latency).await;
        }
        match self.balance() {
            Some(balance) => Ok(BalanceSnapshot::new().with("usdc", balance)),
            None => Err(WagerError::Transport("balance endpoint down".into())),
        }
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
