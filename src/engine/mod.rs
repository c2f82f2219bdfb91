//! Core engine: the run → settle → restake loop.

pub mod balance;
pub mod executor;
pub mod session;

pub use session::{EngineSettings, SessionController};
