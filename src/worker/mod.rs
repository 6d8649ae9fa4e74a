//! Worker system: per-account background tasks and their registry.
//!
//! Core components:
//! - `state`: Worker state machine (Stopped ⇄ Running)
//! - `worker`: Recurring per-account task and the `CredentialSink` it feeds
//! - `registry`: Exclusive owner of live workers, at most one per account

pub mod registry;
pub mod state;
pub mod worker;

pub use registry::{RegistryGuard, StartOutcome, StopOutcome, WorkerRegistry};
pub use state::{WorkerState, WorkerStatus};
pub use worker::{CredentialSink, LogSink, Worker, WorkerExit};
