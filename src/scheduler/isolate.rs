//! Fault isolation around job bodies.
//!
//! [`FaultIsolation::execute`] has no error case. A body that returns `Err`
//! or panics yields a failed [`Outcome`]; nothing escapes to the scheduler.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tracing::{error, warn};

use crate::events::{EventPublisher, NoopPublisher, TOPIC_ERROR};

/// What a job body returns.
pub type JobResult = anyhow::Result<()>;

/// Result of running a job body under isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub succeeded: bool,
    /// Empty on success, never empty on failure.
    pub message: String,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "job failed without a message".to_owned();
        }
        Self {
            succeeded: false,
            message,
        }
    }
}

/// Runs job bodies behind a panic boundary.
#[derive(Clone)]
pub struct FaultIsolation {
    publisher: Arc<dyn EventPublisher>,
}

impl Default for FaultIsolation {
    fn default() -> Self {
        Self::new(Arc::new(NoopPublisher))
    }
}

impl FaultIsolation {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Run `body` to completion and convert whatever happens into an [`Outcome`].
    ///
    /// The body is created inside the boundary, so a panic while building the
    /// future is contained as well as one raised while polling it.
    pub async fn execute<F, Fut>(&self, job: &str, body: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = JobResult>,
    {
        let guarded = AssertUnwindSafe(async move { body().await }).catch_unwind();

        match guarded.await {
            Ok(Ok(())) => Outcome::success(),
            Ok(Err(e)) => {
                let message = format!("{e:#}");
                warn!(job = %job, error = %message, "Job returned an error");
                Outcome::failure(message)
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(job = %job, panic = %detail, "Job panicked; fault contained");
                self.publisher.publish(
                    TOPIC_ERROR,
                    json!({
                        "job": job,
                        "kind": "panic",
                        "detail": detail,
                    }),
                );
                Outcome::failure(format!("job panicked: {detail}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
