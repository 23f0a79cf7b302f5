//! Scheduling engine port.
//!
//! The wrapper chain only needs three things from an engine: register a
//! callable under a schedule expression, start firing, and report the entry
//! table. [`crate::scheduler::cron::CronEngine`] is the production engine;
//! tests drive the chain through a manual one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;

use super::ScheduleError;

/// A registered callable. Each fire produces an independent future; the engine
/// runs every fire on its own task, so fires of one job may overlap.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// One row of the engine's entry table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub job: String,
    pub schedule: String,
    pub next_fire: Option<DateTime<Utc>>,
}

pub trait ScheduleEngine: Send + Sync {
    /// Register `callable` for `job` under `schedule`.
    ///
    /// A malformed expression fails here and the job is never scheduled.
    fn register(&self, job: &str, schedule: &str, callable: JobFn) -> Result<(), ScheduleError>;

    /// Begin firing registered entries. Calling it again is a no-op.
    fn start(&self);

    /// Entry table ordered by next fire time; entries with none come last.
    fn entries(&self) -> Vec<EntryInfo>;

    fn next_fire(&self, job: &str) -> Option<DateTime<Utc>> {
        self.entries()
            .into_iter()
            .find(|entry| entry.job == job)
            .and_then(|entry| entry.next_fire)
    }
}

/// Sort entries by next fire time, unscheduled ones last.
pub(crate) fn sort_entries(entries: &mut [EntryInfo]) {
    entries.sort_by(|a, b| match (a.next_fire, b.next_fire) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.job.cmp(&b.job)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.job.cmp(&b.job),
    });
}
