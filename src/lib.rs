//! Wager Wizard: autobetting control loop for Stake Dice and Limbo.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod platforms;
pub mod strategy;
pub mod engine;
pub mod dashboard;
