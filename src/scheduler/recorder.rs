//! Run recording: timing, run record, completion event, persistence hand-off.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use super::isolate::{FaultIsolation, JobResult};
use super::persist::PersistQueue;
use crate::events::{EventPublisher, TOPIC_JOB_FINISHED};
use crate::history::RunRecord;

/// Times an isolated run and hands the resulting record off for persistence.
#[derive(Clone)]
pub struct RunRecorder {
    isolation: FaultIsolation,
    publisher: Arc<dyn EventPublisher>,
    queue: PersistQueue,
}

impl RunRecorder {
    pub fn new(publisher: Arc<dyn EventPublisher>, queue: PersistQueue) -> Self {
        Self {
            isolation: FaultIsolation::new(publisher.clone()),
            publisher,
            queue,
        }
    }

    /// Run `body` through fault isolation and record the result.
    ///
    /// Returns once the record is queued; persistence finishes later.
    pub async fn record<F, Fut>(&self, job: &str, body: F) -> RunRecord
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = JobResult>,
    {
        let start = Utc::now();
        let clock = Instant::now();

        let outcome = self.isolation.execute(job, body).await;
        let record = RunRecord::new(job, start, clock.elapsed(), outcome);

        info!(
            job = %record.job,
            run_id = %record.run_id,
            succeeded = record.succeeded,
            duration_ms = duration_ms(record.duration),
            "Job finished"
        );

        match serde_json::to_value(&record) {
            Ok(payload) => self.publisher.publish(TOPIC_JOB_FINISHED, payload),
            Err(e) => warn!(job = %record.job, error = %e, "Could not encode job.finished event"),
        }

        // The fast view advances now; only the durable write is queued.
        if record.succeeded {
            self.queue
                .history()
                .cache_completion(&record.job, record.finished);
        }
        self.queue.submit(record.clone());
        record
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::history::{CachedHistory, JobHistory, MemoryHistory};

    #[tokio::test]
    async fn records_timing_publishes_and_persists() {
        let history = Arc::new(MemoryHistory::default());
        let (queue, workers) = PersistQueue::spawn(history.clone(), 8, 1);
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let recorder = RunRecorder::new(Arc::new(bus), queue);

        let record = recorder
            .record("backup", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;

        assert!(record.succeeded);
        assert!(record.message.is_empty());
        assert!(record.duration >= Duration::from_millis(50));
        assert_eq!(
            (record.finished - record.start).to_std().unwrap(),
            record.duration
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, TOPIC_JOB_FINISHED);
        assert_eq!(event.payload["run_id"], record.run_id.to_string());

        drop(recorder);
        workers.join(Duration::from_secs(5)).await;
        assert_eq!(
            history.last_completion("backup").await.unwrap(),
            Some(record.finished)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn completion_is_cached_even_when_queue_drops_the_record() {
        let history = Arc::new(CachedHistory::new(MemoryHistory::default()));
        // Workers cannot run until this test yields, so only the first record fits.
        let (queue, workers) = PersistQueue::spawn(history.clone(), 1, 1);
        let recorder = RunRecorder::new(Arc::new(crate::events::NoopPublisher), queue);

        let mut latest = None;
        for _ in 0..3 {
            let record = recorder.record("backup", || async { Ok(()) }).await;
            assert_eq!(history.cached("backup"), Some(record.finished));
            latest = Some(record.finished);
        }

        drop(recorder);
        workers.join(Duration::from_secs(5)).await;

        assert_eq!(history.last_completion("backup").await.unwrap(), latest);
        // Only the first record reached the store.
        assert_eq!(history.store().recent_runs("backup", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_run_is_recorded_but_not_a_completion() {
        let history = Arc::new(MemoryHistory::default());
        let (queue, workers) = PersistQueue::spawn(history.clone(), 8, 1);
        let recorder = RunRecorder::new(Arc::new(crate::events::NoopPublisher), queue);

        let record = recorder
            .record("flaky", || async { Err(anyhow::anyhow!("exit status 1")) })
            .await;
        assert!(!record.succeeded);
        assert_eq!(record.message, "exit status 1");

        drop(recorder);
        workers.join(Duration::from_secs(5)).await;
        assert_eq!(history.last_completion("flaky").await.unwrap(), None);
        assert_eq!(history.recent_runs("flaky", 10).await.unwrap().len(), 1);
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
