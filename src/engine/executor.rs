//! Round executor.
//!
//! Places exactly one wager through the service, interprets the
//! settlement and asks the staking strategy for the next stake.
//! The executor never mutates session state itself; the caller folds the
//! returned outcome into the session.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::platforms::WagerService;
use crate::strategy::{Decision, StakingConfig, StakingStrategy};
use crate::types::{RoundError, RoundResult, SessionConfig, StrategyState, WagerRequest};

// ---------------------------------------------------------------------------
// Round outcome
// ---------------------------------------------------------------------------

/// A successfully settled round and what comes after it.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub result: RoundResult,
    /// Strategy state for the following round.
    pub next_state: StrategyState,
    pub decision: Decision,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct RoundExecutor {
    service: Arc<dyn WagerService>,
}

impl RoundExecutor {
    pub fn new(service: Arc<dyn WagerService>) -> Self {
        Self { service }
    }

    /// Execute one round.
    ///
    /// `balance` is the last known available balance in the session
    /// currency; `None` skips the affordability check. On a transient
    /// error the caller keeps `state` unchanged so the same stake is
    /// retried.
    pub async fn execute_round(
        &self,
        config: &SessionConfig,
        state: &StrategyState,
        balance: Option<Decimal>,
    ) -> Result<RoundOutcome, RoundError> {
        let stake = state.next_stake;

        if let Some(available) = balance {
            if stake > available {
                warn!(
                    stake = format!("${:.2}", stake),
                    available = format!("${:.2}", available),
                    "Stake exceeds available balance"
                );
                return Err(RoundError::InsufficientBalance {
                    needed: stake,
                    available,
                });
            }
        }

        let request = WagerRequest::new(config, stake);
        debug!(
            game = %request.game,
            stake = format!("${:.2}", stake),
            multiplier = %request.multiplier,
            losses = state.consecutive_losses,
            "Placing wager"
        );

        let settled = match self.service.place_wager(&request).await {
            Ok(settled) => settled,
            Err(e) if e.is_funds_related() => {
                warn!(error = %e, "Wager rejected for insufficient funds");
                return Err(RoundError::FundsRejected(e));
            }
            Err(e) => {
                warn!(error = %e, stake = format!("${:.2}", stake), "Wager failed, will retry");
                return Err(RoundError::Transient(e));
            }
        };

        let result = RoundResult::from_settlement(&settled, config.target_multiplier);
        let strategy = StakingStrategy::new(StakingConfig::from(config));
        let (next_state, decision) = strategy.advance(state, Some(result.outcome));

        info!(
            bet_id = %result.id,
            outcome = %result.outcome,
            amount = format!("${:.2}", result.amount),
            profit = format!("${:.2}", result.profit),
            next = format!("${:.2}", next_state.next_stake),
            "Round settled"
        );

        Ok(RoundOutcome {
            result,
            next_state,
            decision,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
