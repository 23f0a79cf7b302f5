//! Common test utilities.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use jobwrap::events::{Event, EventBus, TOPIC_JOB_FINISHED};
use jobwrap::history::{HistoryError, JobHistory, MemoryHistory, RunRecord};
use jobwrap::scheduler::cron::parse_schedule;
use jobwrap::scheduler::{
    EntryInfo, JobFn, JobWrapperChain, PersistQueue, PersistWorkers, ScheduleEngine, ScheduleError,
};

/// Engine that only fires when told to, each fire on its own task.
#[derive(Default)]
pub struct ManualEngine {
    entries: Mutex<Vec<(String, String, JobFn)>>,
}

impl ManualEngine {
    pub fn fire(&self, job: &str) -> JoinHandle<()> {
        let callable = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .find(|(name, _, _)| name == job)
                .map(|(_, _, callable)| callable.clone())
                .expect("job registered")
        };
        tokio::spawn(callable())
    }
}

impl ScheduleEngine for ManualEngine {
    fn register(&self, job: &str, schedule: &str, callable: JobFn) -> Result<(), ScheduleError> {
        parse_schedule(schedule)?;
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|(name, _, _)| name == job) {
            return Err(ScheduleError::Duplicate(job.to_owned()));
        }
        entries.push((job.to_owned(), schedule.to_owned(), callable));
        Ok(())
    }

    fn start(&self) {}

    fn entries(&self) -> Vec<EntryInfo> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|(job, schedule, _)| EntryInfo {
                job: job.clone(),
                schedule: schedule.clone(),
                next_fire: None,
            })
            .collect()
    }
}

/// A chain wired to a manual engine, an event bus and the given history.
pub struct Harness {
    pub engine: Arc<ManualEngine>,
    pub chain: JobWrapperChain,
    pub events: EventBus,
    pub workers: PersistWorkers,
}

pub fn harness(history: Arc<dyn JobHistory>) -> Harness {
    harness_with_capacity(history, 64)
}

/// Like [`harness`], with a persistence queue holding `capacity` records.
pub fn harness_with_capacity(history: Arc<dyn JobHistory>, capacity: usize) -> Harness {
    let engine = Arc::new(ManualEngine::default());
    let (queue, workers) = PersistQueue::spawn(history, capacity, 1);
    let events = EventBus::new(64);
    let chain = JobWrapperChain::new(engine.clone(), queue, Arc::new(events.clone()));
    Harness {
        engine,
        chain,
        events,
        workers,
    }
}

/// Wait for the next `job.finished` event and decode its record.
pub async fn next_finished(rx: &mut broadcast::Receiver<Event>) -> RunRecord {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("job.finished within 5s")
            .expect("event bus open");
        if event.topic == TOPIC_JOB_FINISHED {
            return serde_json::from_value(event.payload).expect("run record payload");
        }
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// History store whose writes always fail, as if the database were unreachable.
#[derive(Default)]
pub struct UnreachableStore {
    pub save_attempts: AtomicUsize,
}

impl UnreachableStore {
    pub fn attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JobHistory for UnreachableStore {
    async fn record_run(&self, _record: &RunRecord) -> Result<(), HistoryError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        Err(HistoryError::Unavailable("connection refused".into()))
    }

    async fn last_completion(&self, _job: &str) -> Result<Option<DateTime<Utc>>, HistoryError> {
        Err(HistoryError::Unavailable("connection refused".into()))
    }

    async fn recent_runs(&self, _job: &str, _limit: usize) -> Result<Vec<RunRecord>, HistoryError> {
        Err(HistoryError::Unavailable("connection refused".into()))
    }
}

/// Memory store whose writes take `delay` each, as if the database were slow.
pub struct SlowStore {
    inner: MemoryHistory,
    delay: Duration,
    saved: AtomicUsize,
    lookups: AtomicUsize,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryHistory::default(),
            delay,
            saved: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JobHistory for SlowStore {
    async fn record_run(&self, record: &RunRecord) -> Result<(), HistoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.record_run(record).await?;
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn last_completion(&self, job: &str) -> Result<Option<DateTime<Utc>>, HistoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.last_completion(job).await
    }

    async fn recent_runs(&self, job: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError> {
        self.inner.recent_runs(job, limit).await
    }
}
