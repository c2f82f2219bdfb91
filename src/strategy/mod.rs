//! Staking strategy: decides the next stake and whether to keep going.

pub mod staking;

pub use staking::{StakingConfig, StakingStrategy};

/// What the session should do after a settled round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}
