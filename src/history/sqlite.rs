//! SQLite-backed run history (`job_runs` table).

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{HistoryError, JobHistory, RunRecord};
use crate::storage::Pool;

/// Durable history store. Queries run on the blocking pool.
#[derive(Clone)]
pub struct SqliteHistory {
    pool: Pool,
}

impl SqliteHistory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl std::fmt::Debug for SqliteHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistory")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(job: &str, raw: &str) -> Result<DateTime<Utc>, HistoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HistoryError::Corrupt {
            job: job.to_owned(),
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

#[async_trait::async_trait]
impl JobHistory for SqliteHistory {
    async fn record_run(&self, record: &RunRecord) -> Result<(), HistoryError> {
        let pool = self.pool.clone();
        let record = record.clone();

        tokio::task::spawn_blocking(move || -> Result<(), HistoryError> {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO job_runs (run_id, job, started_at, finished_at, duration_ns, succeeded, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.run_id.to_string(),
                    record.job,
                    encode_ts(&record.start),
                    encode_ts(&record.finished),
                    i64::try_from(record.duration.as_nanos()).unwrap_or(i64::MAX),
                    record.succeeded,
                    record.message,
                ],
            )?;
            tracing::debug!(job = %record.job, run_id = %record.run_id, "Run saved to history");
            Ok(())
        })
        .await?
    }

    async fn last_completion(&self, job: &str) -> Result<Option<DateTime<Utc>>, HistoryError> {
        let pool = self.pool.clone();
        let job = job.to_owned();

        tokio::task::spawn_blocking(move || -> Result<Option<DateTime<Utc>>, HistoryError> {
            let conn = pool.get()?;
            let raw: Option<String> = conn
                .query_row(
                    "SELECT finished_at FROM job_runs
                     WHERE job = ?1 AND succeeded = 1
                     ORDER BY finished_at DESC LIMIT 1",
                    params![job],
                    |row| row.get(0),
                )
                .optional()?;

            raw.map(|raw| decode_ts(&job, &raw)).transpose()
        })
        .await?
    }

    async fn recent_runs(&self, job: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError> {
        let pool = self.pool.clone();
        let job = job.to_owned();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        tokio::task::spawn_blocking(move || -> Result<Vec<RunRecord>, HistoryError> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT run_id, started_at, finished_at, duration_ns, succeeded, message
                 FROM job_runs WHERE job = ?1
                 ORDER BY finished_at DESC, id DESC LIMIT ?2",
            )?;

            let rows = stmt.query_map(params![job, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut runs = Vec::new();
            for r in rows {
                let (run_id, started, finished, duration_ns, succeeded, message) = r?;
                let run_id = Uuid::parse_str(&run_id).map_err(|e| HistoryError::Corrupt {
                    job: job.clone(),
                    reason: format!("bad run id '{run_id}': {e}"),
                })?;
                runs.push(RunRecord {
                    run_id,
                    job: job.clone(),
                    start: decode_ts(&job, &started)?,
                    finished: decode_ts(&job, &finished)?,
                    duration: Duration::from_nanos(u64::try_from(duration_ns).unwrap_or(0)),
                    succeeded,
                    message,
                });
            }
            Ok(runs)
        })
        .await?
    }
}
