//! Core engine: the daemon loop and its collaborators.
//!
//! - `confirmation`: providers that approve investments a strategy flags
//! - `daemon`: the Starting → Running → Stopping → Stopped state machine
//! - `evaluator`: single consumer of offer batches
//! - `executor`: the `Investor` boundary and the dry-run investor
//! - `shutdown`: shutdown signal and the shared daemon context

pub mod confirmation;
pub mod daemon;
pub mod evaluator;
pub mod executor;
pub mod shutdown;

pub use confirmation::{Confirmation, ConfirmationProvider, ConfirmationRegistry};
pub use daemon::{Daemon, DaemonConfig, DaemonReport, DaemonState};
pub use evaluator::EvaluationStats;
pub use executor::{DryRunInvestor, Investor};
pub use shutdown::{DaemonContext, ShutdownSignal};
