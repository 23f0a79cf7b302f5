//! Background persistence of run records.
//!
//! Records go through a bounded queue to a fixed set of workers, so a slow or
//! unreachable store costs at most `capacity` queued records of memory. When
//! the queue is full the record is dropped and the loss is logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::history::{JobHistory, RunRecord};

/// Sending side of the persistence queue. Cheap to clone.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<RunRecord>,
    history: Arc<dyn JobHistory>,
}

/// Handles of the persistence workers.
#[derive(Debug)]
pub struct PersistWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl PersistQueue {
    /// Start `workers` tasks writing queued records into `history`.
    pub fn spawn(
        history: Arc<dyn JobHistory>,
        capacity: usize,
        workers: usize,
    ) -> (Self, PersistWorkers) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let history = history.clone();
                tokio::spawn(run_worker(worker, rx, history))
            })
            .collect();

        (Self { tx, history }, PersistWorkers { handles })
    }

    /// The history the workers write into.
    pub fn history(&self) -> &Arc<dyn JobHistory> {
        &self.history
    }

    /// Queue `record` for persistence without waiting.
    ///
    /// Returns false if the record was dropped (queue full or closed).
    pub fn submit(&self, record: RunRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(job = %record.job, run_id = %record.run_id, "Persistence queue full, run record dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                warn!(job = %record.job, run_id = %record.run_id, "Persistence queue closed, run record dropped");
                false
            }
        }
    }
}

impl PersistWorkers {
    /// Wait for the workers to drain the queue.
    ///
    /// Workers only finish once every [`PersistQueue`] clone is dropped; after
    /// `timeout` the remaining workers are aborted.
    pub async fn join(mut self, timeout: Duration) {
        let drain = futures::future::join_all(self.handles.iter_mut());
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("Persistence workers did not drain in time, aborting");
            for handle in &self.handles {
                handle.abort();
            }
        } else {
            info!("Persistence queue drained");
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<RunRecord>>>,
    history: Arc<dyn JobHistory>,
) {
    debug!(worker, "Persistence worker started");
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(record) = next else { break };

        match history.record_run(&record).await {
            Ok(()) => debug!(job = %record.job, run_id = %record.run_id, "Run record persisted"),
            Err(e) => error!(
                job = %record.job,
                run_id = %record.run_id,
                error = %e,
                "Failed to persist run record"
            ),
        }
    }
    debug!(worker, "Persistence worker stopped");
}
