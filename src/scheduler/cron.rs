use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::engine::{sort_entries, EntryInfo, JobFn, ScheduleEngine};
use super::ScheduleError;

/// Parse a cron expression (seconds field first, as accepted by the `cron` crate).
pub fn parse_schedule(expr: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expr).map_err(|e| ScheduleError::Syntax {
        expr: expr.to_owned(),
        reason: e.to_string(),
    })
}

/// A scheduling engine driven by cron expressions.
///
/// Every entry owns a tokio task that sleeps until the next fire time and
/// then spawns the callable on a fresh task, so a long run never delays the
/// next fire. Overlap is the wrapper chain's concern, not the engine's.
#[derive(Clone, Default)]
pub struct CronEngine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    entries: Mutex<Vec<Entry>>,
    started: AtomicBool,
}

struct Entry {
    job: String,
    expr: String,
    schedule: CronSchedule,
    callable: JobFn,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
    task: Option<JoinHandle<()>>,
}

impl CronEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort every entry task and forget all registrations.
    pub fn shutdown(&self) {
        self.inner.started.store(false, Ordering::SeqCst);
        let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries.drain(..) {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        info!("Cron engine stopped");
    }
}

impl ScheduleEngine for CronEngine {
    fn register(&self, job: &str, schedule: &str, callable: JobFn) -> Result<(), ScheduleError> {
        let parsed = parse_schedule(schedule)?;

        let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|entry| entry.job == job) {
            return Err(ScheduleError::Duplicate(job.to_owned()));
        }

        let next = parsed.upcoming(Utc).next();
        let mut entry = Entry {
            job: job.to_owned(),
            expr: schedule.to_owned(),
            schedule: parsed,
            callable,
            next_fire: Arc::new(Mutex::new(next)),
            task: None,
        };
        if self.inner.started.load(Ordering::SeqCst) {
            arm(&mut entry);
        }
        entries.push(entry);
        Ok(())
    }

    fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries.iter_mut() {
            arm(entry);
        }
        info!(entries = entries.len(), "Cron engine started");
    }

    fn entries(&self) -> Vec<EntryInfo> {
        let entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut table: Vec<EntryInfo> = entries
            .iter()
            .map(|entry| EntryInfo {
                job: entry.job.clone(),
                schedule: entry.expr.clone(),
                next_fire: *entry.next_fire.lock().unwrap_or_else(|e| e.into_inner()),
            })
            .collect();
        sort_entries(&mut table);
        table
    }
}

fn arm(entry: &mut Entry) {
    if entry.task.is_some() {
        return;
    }
    entry.task = Some(tokio::spawn(fire_loop(
        entry.job.clone(),
        entry.schedule.clone(),
        entry.callable.clone(),
        entry.next_fire.clone(),
    )));
}

async fn fire_loop(
    job: String,
    schedule: CronSchedule,
    callable: JobFn,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
) {
    let mut cursor = Utc::now();
    loop {
        let next = schedule.after(&cursor).next();
        *next_fire.lock().unwrap_or_else(|e| e.into_inner()) = next;

        let Some(next) = next else {
            debug!(job = %job, "Schedule has no further fire times");
            break;
        };

        if let Ok(wait) = (next - Utc::now()).to_std() {
            tokio::time::sleep(wait).await;
        }

        debug!(job = %job, scheduled_for = %next, "Firing job");
        tokio::spawn(callable());

        // Fires missed while the process was stalled are skipped, not replayed.
        cursor = next.max(Utc::now());
    }
}

/// An upcoming fire in a dry-run preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingRun {
    pub at: DateTime<Utc>,
    pub job: String,
}

/// Calculate fire times of `(job, schedule)` pairs in `(from, until]`, sorted by time.
///
/// This is strictly a dry-run preview, nothing is registered.
pub fn preview<'a, I>(
    jobs: I,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<UpcomingRun>, ScheduleError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut preview = Vec::new();

    for (job, expr) in jobs {
        let schedule = parse_schedule(expr)?;
        for at in schedule.after(&from) {
            if at > until {
                break;
            }
            preview.push(UpcomingRun {
                at,
                job: job.to_owned(),
            });
        }
    }

    // Sort by time
    preview.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.job.cmp(&b.job)));

    Ok(preview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn noop() -> JobFn {
        Arc::new(|| async {}.boxed())
    }

    #[test]
    fn rejects_malformed_expression() {
        let engine = CronEngine::new();
        let err = engine.register("bad", "not a cron", noop()).unwrap_err();
        assert!(matches!(err, ScheduleError::Syntax { .. }));
        assert!(engine.entries().is_empty());
    }

    #[test]
    fn rejects_duplicate_job() {
        let engine = CronEngine::new();
        engine.register("backup", "0 0 3 * * *", noop()).unwrap();
        let err = engine.register("backup", "0 0 4 * * *", noop()).unwrap_err();
        assert!(matches!(err, ScheduleError::Duplicate(name) if name == "backup"));
    }

    #[test]
    fn entries_are_ordered_by_next_fire() {
        let engine = CronEngine::new();
        engine.register("yearly", "0 0 0 1 1 *", noop()).unwrap();
        engine.register("every-second", "* * * * * *", noop()).unwrap();

        let entries = engine.entries();
        assert_eq!(entries[0].job, "every-second");
        assert_eq!(entries[1].job, "yearly");
        assert!(engine.next_fire("yearly").is_some());
        assert_eq!(engine.next_fire("missing"), None);
    }

    #[tokio::test]
    async fn started_engine_fires_callables() {
        let engine = CronEngine::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let callable: JobFn = Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        engine.register("tick", "* * * * * *", callable).unwrap();
        engine.start();
        engine.start();
        tokio::time::sleep(Duration::from_millis(2_200)).await;
        engine.shutdown();

        assert!(fired.load(Ordering::SeqCst) >= 1);
        assert!(engine.entries().is_empty());
    }

    #[test]
    fn preview_lists_fires_in_window() {
        let from = Utc.with_ymd_and_hms(2026, 5, 1, 0, 30, 0).unwrap();
        let until = from + chrono::Duration::hours(3);

        let runs = preview(
            [("hourly", "0 0 * * * *"), ("nightly", "0 0 2 * * *")],
            from,
            until,
        )
        .unwrap();

        let jobs: Vec<&str> = runs.iter().map(|r| r.job.as_str()).collect();
        assert_eq!(jobs, vec!["hourly", "hourly", "nightly", "hourly"]);
        assert_eq!(runs[0].at, Utc.with_ymd_and_hms(2026, 5, 1, 1, 0, 0).unwrap());
    }
}
