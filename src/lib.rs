//! jobwrap -- overlap-safe, fault-isolated cron job runner with run history.
//!
//! Every scheduled job is decorated by a [`scheduler::JobWrapperChain`]: a
//! per-job run guard drops overlapping fires, a panic boundary keeps one bad
//! job from taking down the rest, and each admitted run is timed, published on
//! the event bus and persisted in the background to a [`history::JobHistory`].

pub mod api;
pub mod command;
pub mod config;
pub mod events;
pub mod history;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::command::CommandJob;
use crate::config::{JobConfig, JobwrapConfig};
use crate::events::EventBus;
use crate::history::JobHistory;
use crate::scheduler::{CronEngine, JobWrapperChain, PersistQueue, PersistWorkers, ScheduleEngine};

/// Event bus capacity per subscriber.
const EVENT_BUS_CAPACITY: usize = 256;

/// All long-lived components of a jobwrap process, wired together.
pub struct Runtime {
    pub history: Arc<dyn JobHistory>,
    pub events: EventBus,
    pub engine: Arc<CronEngine>,
    pub chain: JobWrapperChain,
    workers: PersistWorkers,
    drain_timeout: Duration,
}

impl Runtime {
    /// Build history, persistence queue, event bus, engine and chain from `config`.
    ///
    /// Must be called inside a tokio runtime (persistence workers are spawned).
    pub fn build(config: &JobwrapConfig) -> Result<Self> {
        let history = history::open(&config.history)?;
        let (queue, workers) = PersistQueue::spawn(
            history.clone(),
            config.persistence.queue_capacity,
            config.persistence.workers,
        );
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let engine = Arc::new(CronEngine::new());
        let chain = JobWrapperChain::new(engine.clone(), queue, Arc::new(events.clone()));

        Ok(Self {
            history,
            events,
            engine,
            chain,
            workers,
            drain_timeout: Duration::from_secs(config.persistence.drain_timeout_sec),
        })
    }

    /// Register every configured job as a shell command.
    pub fn register_jobs(&self, jobs: &[JobConfig]) -> Result<()> {
        for job in jobs {
            let command = CommandJob::from(job);
            self.chain
                .schedule(&job.name, &job.schedule, move || {
                    let command = command.clone();
                    async move { command.run().await }
                })
                .with_context(|| format!("failed to schedule job '{}'", job.name))?;
        }
        Ok(())
    }

    /// Stop firing, then wait for queued run records to be persisted.
    pub async fn shutdown(self) {
        self.engine.shutdown();
        let Self {
            chain,
            events,
            workers,
            drain_timeout,
            ..
        } = self;
        // Workers finish once the last queue sender (held by the chain) is gone.
        drop(chain);
        drop(events);
        workers.join(drain_timeout).await;
    }
}

/// Start the jobwrap daemon: scheduled jobs, event logger and API server.
pub async fn serve(config: JobwrapConfig) -> Result<()> {
    // 1. Wire up history, queue and chain
    let runtime = Runtime::build(&config)?;
    tokio::spawn(events::log_events(runtime.events.subscribe()));

    // 2. Register and start jobs
    runtime.register_jobs(&config.jobs)?;
    runtime.engine.start();
    tracing::info!(jobs = config.jobs.len(), "jobwrap scheduler running");

    // 3. Serve the API until Ctrl-C
    if config.api.enabled {
        let addr: std::net::SocketAddr = config
            .api
            .bind
            .parse()
            .with_context(|| format!("invalid api.bind address '{}'", config.api.bind))?;
        let app = api::router(api::state::AppState {
            history: runtime.history.clone(),
            chain: runtime.chain.clone(),
        });

        tracing::info!(%addr, "jobwrap API listening");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    tracing::info!("Shutting down");
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
