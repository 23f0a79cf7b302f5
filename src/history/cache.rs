//! Read-through cache of last completion times in front of a durable store.

use chrono::{DateTime, Utc};

use super::{CompletionMap, HistoryError, JobHistory, RunRecord};

/// Serves `last_completion` from memory, falling back to the store on a miss.
///
/// A store failure on the miss path is returned to the caller. It is never
/// turned into "no prior run".
#[derive(Debug)]
pub struct CachedHistory<S> {
    store: S,
    last: CompletionMap,
}

impl<S: JobHistory> CachedHistory<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            last: CompletionMap::default(),
        }
    }

    /// Cached value only, without touching the store.
    pub fn cached(&self, job: &str) -> Option<DateTime<Utc>> {
        self.last.get(job)
    }

    /// Advance the cached completion time for `job`. Older values are ignored.
    pub fn put(&self, job: &str, at: DateTime<Utc>) {
        if self.last.advance(job, at) {
            tracing::debug!(job = %job, last_completion = %at, "Updated cached last completion");
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait::async_trait]
impl<S: JobHistory> JobHistory for CachedHistory<S> {
    async fn record_run(&self, record: &RunRecord) -> Result<(), HistoryError> {
        let saved = self.store.record_run(record).await;

        // The run happened whether or not the store kept it.
        if record.succeeded {
            self.put(&record.job, record.finished);
        }
        saved
    }

    async fn last_completion(&self, job: &str) -> Result<Option<DateTime<Utc>>, HistoryError> {
        if let Some(at) = self.last.get(job) {
            return Ok(Some(at));
        }

        let stored = self.store.last_completion(job).await?;
        match stored {
            Some(at) => self.put(job, at),
            None => tracing::debug!(job = %job, "Job has no successful run on record"),
        }
        // Re-read: a concurrent record_run may have advanced past the stored value.
        Ok(self.last.get(job).or(stored))
    }

    async fn recent_runs(&self, job: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError> {
        self.store.recent_runs(job, limit).await
    }

    fn cache_completion(&self, job: &str, at: DateTime<Utc>) {
        self.put(job, at);
    }
}
