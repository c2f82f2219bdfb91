//! Balance monitor.
//!
//! Keeps an eventually-consistent view of the spendable balance in the
//! session currency. Refreshes happen at session start, after each settled
//! round, and every Nth round attempt as a guard against drift from other
//! activity on the account. A failed refresh leaves the last value in place.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::platforms::WagerService;
use crate::types::WagerError;

/// Default cadence of the safety-net refresh, in round attempts.
pub const DEFAULT_REFRESH_EVERY: u64 = 5;

/// What a refresh attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Refresh {
    /// No refresh was due.
    Skipped,
    Updated(Decimal),
    /// The service answered but holds nothing in the session currency.
    CurrencyMissing,
    Failed(WagerError),
}

pub struct BalanceMonitor {
    service: Arc<dyn WagerService>,
    currency: String,
    refresh_every: u64,
    attempts: u64,
    /// A refresh succeeded since the last round attempt.
    fresh: bool,
    last_known: Option<Decimal>,
}

impl BalanceMonitor {
    pub fn new(service: Arc<dyn WagerService>, currency: &str, refresh_every: u64) -> Self {
        Self {
            service,
            currency: currency.to_string(),
            refresh_every: refresh_every.max(1),
            attempts: 0,
            fresh: false,
            last_known: None,
        }
    }

    /// Last successfully fetched balance; `None` until one arrives.
    pub fn current(&self) -> Option<Decimal> {
        self.last_known
    }

    /// Restart the cadence so the next attempt refreshes (new run).
    pub fn restart(&mut self) {
        self.attempts = 0;
        self.fresh = false;
    }

    /// Called before every round attempt. Refreshes on the first attempt
    /// and every `refresh_every` attempts, unless a refresh already
    /// happened since the previous attempt.
    pub async fn before_round(&mut self) -> Refresh {
        let due = self.attempts % self.refresh_every == 0 && !self.fresh;
        self.attempts += 1;

        let refresh = if due {
            self.refresh().await
        } else {
            Refresh::Skipped
        };
        self.fresh = false;
        refresh
    }

    /// Fetch the balance now.
    pub async fn refresh(&mut self) -> Refresh {
        match self.service.fetch_balance().await {
            Ok(snapshot) => {
                self.fresh = true;
                match snapshot.available(&self.currency) {
                    Some(amount) => {
                        debug!(
                            currency = %self.currency,
                            balance = format!("${:.2}", amount),
                            "Balance refreshed"
                        );
                        self.last_known = Some(amount);
                        Refresh::Updated(amount)
                    }
                    None => {
                        warn!(
                            currency = %self.currency,
                            currencies = snapshot.len(),
                            "No balance held in session currency"
                        );
                        Refresh::CurrencyMissing
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Balance refresh failed, keeping last known value");
                Refresh::Failed(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
