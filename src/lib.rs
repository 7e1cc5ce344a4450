//! autolend: unattended lending marketplace daemon
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod refresh;
pub mod scheduler;
pub mod platforms;
pub mod strategy;
pub mod events;
pub mod secrets;
pub mod engine;
