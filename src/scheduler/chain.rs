//! Job wrapper chain: Run Guard -> Run Recorder -> Fault Isolation -> job body.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, info};

use super::engine::{EntryInfo, JobFn, ScheduleEngine};
use super::guard::RunGuard;
use super::isolate::JobResult;
use super::persist::PersistQueue;
use super::recorder::RunRecorder;
use super::ScheduleError;
use crate::events::EventPublisher;
use crate::history::RunRecord;

/// Composition root for decorated jobs.
///
/// One chain owns one [`RunGuard`], shared by every callable it builds, so
/// mutual exclusion is scoped to this scheduler instance.
#[derive(Clone)]
pub struct JobWrapperChain {
    guard: RunGuard,
    recorder: RunRecorder,
    engine: Arc<dyn ScheduleEngine>,
}

impl JobWrapperChain {
    pub fn new(
        engine: Arc<dyn ScheduleEngine>,
        queue: PersistQueue,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            guard: RunGuard::new(),
            recorder: RunRecorder::new(publisher, queue),
            engine,
        }
    }

    /// Decorate `body` and register it with the engine under `schedule`.
    pub fn schedule<F, Fut>(&self, job: &str, schedule: &str, body: F) -> Result<(), ScheduleError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let callable = self.wrap(job, body);
        self.engine.register(job, schedule, callable)?;

        match self.next_fire_time(job) {
            Some(next) => info!(job = %job, schedule = %schedule, next = %next, "Job scheduled"),
            None => info!(job = %job, schedule = %schedule, "Job scheduled"),
        }
        Ok(())
    }

    /// Build the decorated callable for `body` without registering it.
    pub fn wrap<F, Fut>(&self, job: &str, body: F) -> JobFn
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let guard = self.guard.clone();
        let recorder = self.recorder.clone();
        let job: Arc<str> = Arc::from(job);
        let body = Arc::new(body);

        // Must not capture the engine: the engine owns this callable.
        Arc::new(move || {
            let guard = guard.clone();
            let recorder = recorder.clone();
            let job = job.clone();
            let body = body.clone();
            async move {
                invoke(&guard, &recorder, &job, move || (*body)()).await;
            }
            .boxed()
        })
    }

    /// Run `body` once through the full chain, right now.
    ///
    /// Returns `None` if a run of `job` is already in flight.
    pub async fn run_once<F, Fut>(&self, job: &str, body: F) -> Option<RunRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = JobResult>,
    {
        invoke(&self.guard, &self.recorder, job, body).await
    }

    /// Next fire time of `job`, for observability only.
    pub fn next_fire_time(&self, job: &str) -> Option<DateTime<Utc>> {
        let next = self.engine.next_fire(job);
        if next.is_none() {
            debug!(job = %job, "No next fire time available");
        }
        next
    }

    pub fn entries(&self) -> Vec<EntryInfo> {
        self.engine.entries()
    }

    pub fn is_running(&self, job: &str) -> bool {
        self.guard.is_running(job)
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }
}

async fn invoke<F, Fut>(
    guard: &RunGuard,
    recorder: &RunRecorder,
    job: &str,
    body: F,
) -> Option<RunRecord>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = JobResult>,
{
    let Some(_permit) = guard.try_enter(job) else {
        info!(job = %job, "Previous run still in flight, skipping");
        return None;
    };

    Some(recorder.record(job, body).await)
}
