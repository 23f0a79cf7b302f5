//! Run history tracking -- run records, the history capability, and its backends.
//!
//! Every backend implements [`JobHistory`]. The wrapper chain only ever talks to
//! that trait, so swapping the memory-only backend for the SQLite-backed,
//! read-through cached one is a configuration choice made in [`open`].

pub mod cache;
pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{HistoryBackend, HistoryConfig};
use crate::scheduler::isolate::Outcome;

pub use self::cache::CachedHistory;
pub use self::memory::MemoryHistory;
pub use self::sqlite::SqliteHistory;

/// Errors raised by a history backend (the "storage error" of the run tracker).
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("history query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("history task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("corrupt history row for job '{job}': {reason}")]
    Corrupt { job: String, reason: String },

    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// An immutable record of one admitted job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job: String,
    pub start: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub duration: Duration,
    pub succeeded: bool,
    /// Failure description; empty when `succeeded` is true.
    pub message: String,
}

impl RunRecord {
    /// Build a record from the admission time, the measured (monotonic) elapsed
    /// time and the outcome of the job body.
    ///
    /// `finished` is derived as `start + elapsed`, so `duration == finished - start`
    /// holds exactly and a wall clock step during the run cannot make it negative.
    pub fn new(job: &str, start: DateTime<Utc>, elapsed: Duration, outcome: Outcome) -> Self {
        let (finished, duration) = match chrono::Duration::from_std(elapsed) {
            Ok(delta) => (start + delta, elapsed),
            Err(_) => (start, Duration::ZERO),
        };

        Self {
            run_id: Uuid::new_v4(),
            job: job.to_owned(),
            start,
            finished,
            duration,
            succeeded: outcome.succeeded,
            message: outcome.message,
        }
    }
}

/// Durable or in-memory job history.
///
/// `last_completion` only ever reflects successful runs. `Ok(None)` means the
/// job has no successful run on record; a failed lookup is always an `Err`.
#[async_trait::async_trait]
pub trait JobHistory: Send + Sync {
    /// Store one run record (successful or failed).
    async fn record_run(&self, record: &RunRecord) -> Result<(), HistoryError>;

    /// Finish time of the most recent successful run of `job`.
    async fn last_completion(&self, job: &str) -> Result<Option<DateTime<Utc>>, HistoryError>;

    /// Most recent runs of `job`, newest first, failed runs included.
    async fn recent_runs(&self, job: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError>;

    /// Advance the in-memory last completion of `job` right away, ahead of
    /// the durable write. Backends without an in-memory view ignore it.
    fn cache_completion(&self, _job: &str, _at: DateTime<Utc>) {}
}

/// Concurrency-safe job -> last completion map that never moves backwards.
///
/// Persistence is asynchronous and may complete out of order, so an older
/// completion arriving late must not overwrite a newer one.
#[derive(Debug, Default)]
pub(crate) struct CompletionMap {
    inner: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl CompletionMap {
    pub(crate) fn get(&self, job: &str) -> Option<DateTime<Utc>> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(job).copied()
    }

    /// Returns true if the stored value changed.
    pub(crate) fn advance(&self, job: &str, at: DateTime<Utc>) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(job) {
            Some(current) if *current >= at => false,
            Some(current) => {
                *current = at;
                true
            }
            None => {
                map.insert(job.to_owned(), at);
                true
            }
        }
    }
}

/// Build the configured history backend.
pub fn open(config: &HistoryConfig) -> Result<Arc<dyn JobHistory>> {
    match config.backend {
        HistoryBackend::Memory => {
            tracing::info!("Using in-memory job history (not persisted across restarts)");
            Ok(Arc::new(MemoryHistory::new(config.memory_retain)))
        }
        HistoryBackend::Sqlite => {
            let path = config.path.to_string_lossy();
            tracing::info!(path = %path, "Opening job history database");
            let pool = crate::storage::open_pool(&path)
                .with_context(|| format!("failed to open history database at {path}"))?;
            Ok(Arc::new(CachedHistory::new(SqliteHistory::new(pool))))
        }
    }
}
