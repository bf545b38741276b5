//! Batch orchestration: window collation, submission, polling, fan-out and
//! dangling-batch recovery.
//!
//! - [`BatchOrchestrator`] owns the pending window and in-flight table
//! - [`BatchProcessor`] submits one window to the provider and polls it
//! - [`ResultSlot`]/[`ResultReceiver`] carry one result to one caller

mod config;
mod orchestrator;
mod processor;
mod recovery;
mod slot;
mod types;

pub use config::{BatchingConfig, RecoveryConfig};
pub use orchestrator::BatchOrchestrator;
pub use processor::{Backoff, BatchProcessor, ProviderBatchProcessor};
pub use slot::{Delivery, ResultReceiver, ResultSlot};
pub use types::{
    BatchItem, BatchOutcome, BatchResult, ErrorKind, OrchestratorStatus, ProcessError,
    RecoverySummary, ResultError,
};
