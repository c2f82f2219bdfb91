//! Wager service integrations.
//!
//! Defines the `WagerService` trait the engine bets through and provides
//! implementations for:
//! - Stake: the real casino GraphQL API
//! - Simulated: offline casino with an in-memory balance

pub mod simulated;
pub mod stake;

use async_trait::async_trait;

use crate::types::{BalanceSnapshot, SettledWager, WagerError, WagerRequest};

/// Abstraction over the remote betting service.
///
/// Implementors hold the access credential, place a single wager and
/// report the available balance. Errors carry the service's message so the
/// executor can tell funds problems from transient failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WagerService: Send + Sync {
    /// Place one wager and wait for its settlement.
    async fn place_wager(&self, request: &WagerRequest) -> Result<SettledWager, WagerError>;

    /// Fetch available balances for every currency on the account.
    async fn fetch_balance(&self) -> Result<BalanceSnapshot, WagerError>;

    /// Whether a credential is available to authenticate requests.
    fn is_connected(&self) -> bool;

    /// Service name for logging and identification.
    fn name(&self) -> &'static str;
}
