//! Job scheduling and the wrapper chain that decorates every run.
//!
//! A fire from the engine passes through the [`guard::RunGuard`] (skip if the
//! previous run of the same job is still in flight), then the
//! [`recorder::RunRecorder`] which times a [`isolate::FaultIsolation`]-protected
//! call of the job body and hands the [`crate::history::RunRecord`] to the
//! bounded [`persist::PersistQueue`].

pub mod chain;
pub mod cron;
pub mod engine;
pub mod guard;
pub mod isolate;
pub mod persist;
pub mod recorder;

use thiserror::Error;

// Re-export common types
pub use self::chain::JobWrapperChain;
pub use self::cron::CronEngine;
pub use self::engine::{EntryInfo, JobFn, ScheduleEngine};
pub use self::guard::{RunGuard, RunPermit};
pub use self::isolate::{FaultIsolation, JobResult, Outcome};
pub use self::persist::{PersistQueue, PersistWorkers};
pub use self::recorder::RunRecorder;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    Syntax { expr: String, reason: String },

    #[error("job '{0}' is already scheduled")]
    Duplicate(String),
}
