//! Standalone in-memory history. Everything is lost on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{CompletionMap, HistoryError, JobHistory, RunRecord};

/// Runs kept per job when no explicit retention is configured.
pub const DEFAULT_RETAIN: usize = 100;

/// Pure memory backend used when no durable store is configured.
#[derive(Debug)]
pub struct MemoryHistory {
    last: CompletionMap,
    runs: Mutex<HashMap<String, VecDeque<RunRecord>>>,
    retain: usize,
}

impl MemoryHistory {
    /// Keep at most `retain` recent runs per job (at least one).
    pub fn new(retain: usize) -> Self {
        Self {
            last: CompletionMap::default(),
            runs: Mutex::new(HashMap::new()),
            retain: retain.max(1),
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RETAIN)
    }
}

#[async_trait::async_trait]
impl JobHistory for MemoryHistory {
    async fn record_run(&self, record: &RunRecord) -> Result<(), HistoryError> {
        {
            let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
            let entries = runs.entry(record.job.clone()).or_default();
            // Kept ordered by finish time; workers may deliver out of order.
            let at = entries
                .iter()
                .rposition(|r| r.finished <= record.finished)
                .map_or(0, |i| i + 1);
            entries.insert(at, record.clone());
            while entries.len() > self.retain {
                entries.pop_front();
            }
        }

        if record.succeeded {
            self.last.advance(&record.job, record.finished);
        }
        tracing::debug!(job = %record.job, succeeded = record.succeeded, "Run recorded in memory");
        Ok(())
    }

    async fn last_completion(&self, job: &str) -> Result<Option<DateTime<Utc>>, HistoryError> {
        Ok(self.last.get(job))
    }

    async fn recent_runs(&self, job: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(runs
            .get(job)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn cache_completion(&self, job: &str, at: DateTime<Utc>) {
        self.last.advance(job, at);
    }
}
