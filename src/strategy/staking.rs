//! Loss-progression staking.
//!
//! Martingale-style sizing: the stake grows by a configured fraction
//! after every loss and snaps back to the base stake after a win.
//! The strategy knows nothing about the balance; affordability is
//! checked by the round executor.

use rust_decimal::Decimal;
use tracing::debug;

use super::Decision;
use crate::types::{Outcome, SessionConfig, StrategyState};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Staking parameters taken from the session config.
#[derive(Debug, Clone, PartialEq)]
pub struct StakingConfig {
    /// Stake for the first round and after every win.
    pub base_stake: Decimal,
    /// Fractional increase applied after a loss (0.5 = +50%).
    pub loss_increase: Decimal,
    pub stop_on_win: bool,
}

impl From<&SessionConfig> for StakingConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            base_stake: config.base_stake,
            loss_increase: config.loss_increase_fraction.max(Decimal::ZERO),
            stop_on_win: config.stop_on_win,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

pub struct StakingStrategy {
    config: StakingConfig,
}

impl StakingStrategy {
    pub fn new(config: StakingConfig) -> Self {
        Self { config }
    }

    /// State before the first round: wager the base stake.
    pub fn initial_state(&self) -> StrategyState {
        StrategyState::initial(self.config.base_stake)
    }

    /// Compute the state for the next round from the one just played.
    ///
    /// `last` is `None` before the first round of a session.
    pub fn advance(&self, state: &StrategyState, last: Option<Outcome>) -> (StrategyState, Decision) {
        match last {
            None => (self.initial_state(), Decision::Continue),
            Some(Outcome::Win) => {
                let decision = if self.config.stop_on_win {
                    Decision::Stop
                } else {
                    Decision::Continue
                };
                (self.initial_state(), decision)
            }
            Some(Outcome::Loss) => {
                // Saturates on absurd streaks or fractions.
                let next_stake = Decimal::ONE
                    .checked_add(self.config.loss_increase)
                    .and_then(|factor| state.next_stake.checked_mul(factor))
                    .unwrap_or(Decimal::MAX);

                debug!(
                    previous = format!("${:.2}", state.next_stake),
                    next = format!("${:.2}", next_stake),
                    losses = state.consecutive_losses + 1,
                    "Stake increased after loss"
                );

                (
                    StrategyState {
                        next_stake,
                        consecutive_losses: state.consecutive_losses.saturating_add(1),
                    },
                    Decision::Continue,
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
