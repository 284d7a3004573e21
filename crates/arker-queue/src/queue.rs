//! Durable job-queue primitive (spec §4.6) backed by `queue_jobs`: per-kind
//! workers, attempt counter, by-args uniqueness within a window, priority,
//! automatic requeue on handler error.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::{
    Priority, QueueJobRow, STATE_AVAILABLE, STATE_DISCARDED, STATE_RETRYABLE, STATE_RUNNING,
    STATE_SCHEDULED,
};

/// Enqueues a job. If a row with the same `unique_key` was enqueued within
/// `unique_window` and hasn't finished, the existing job id is returned
/// instead of inserting a duplicate (spec: "Uniqueness is by-args within 1
/// minute to suppress accidental double-submit").
pub async fn enqueue(
    pool: &PgPool,
    kind: &str,
    payload: serde_json::Value,
    priority: Priority,
    unique_key: Option<&str>,
    unique_window: ChronoDuration,
    max_attempts: i32,
) -> sqlx::Result<Uuid> {
    if let Some(key) = unique_key {
        let cutoff = Utc::now() - unique_window;
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM queue_jobs
             WHERE unique_key = $1 AND kind = $2 AND created_at >= $3
               AND state IN ('available', 'running', 'retryable', 'scheduled')
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(key)
        .bind(kind)
        .bind(cutoff)
        .fetch_optional(pool)
        .await?;
        if let Some(id) = existing {
            return Ok(id);
        }
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO queue_jobs (id, kind, payload, priority, state, attempt, max_attempts, unique_key, scheduled_at, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, 0, $6, $7, now(), now(), now())",
    )
    .bind(id)
    .bind(kind)
    .bind(payload)
    .bind(priority.as_str())
    .bind(STATE_AVAILABLE)
    .bind(max_attempts)
    .bind(unique_key)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Picks up the next eligible job of `kind`, skipping rows locked by other
/// workers, ordered by priority then FIFO by `created_at`.
pub async fn pop_next(pool: &PgPool, kind: &str) -> sqlx::Result<Option<QueueJobRow>> {
    let mut tx = pool.begin().await?;
    let row: Option<QueueJobRow> = sqlx::query_as(
        "SELECT * FROM queue_jobs
         WHERE kind = $1 AND state IN ('available', 'retryable') AND scheduled_at <= now()
         ORDER BY (priority = 'high_priority') DESC, created_at ASC
         FOR UPDATE SKIP LOCKED
         LIMIT 1",
    )
    .bind(kind)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.commit().await?;
        return Ok(None);
    };

    let attempt = row.attempt + 1;
    sqlx::query(
        "UPDATE queue_jobs SET state = $1, attempt = $2, updated_at = now() WHERE id = $3",
    )
    .bind(STATE_RUNNING)
    .bind(attempt)
    .bind(row.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Some(QueueJobRow { attempt, ..row }))
}

/// Successful completion removes the row; the primitive has nothing left
/// to track.
pub async fn complete(pool: &PgPool, job_id: Uuid) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// On handler error: reschedule if attempts remain (bumping `created_at` so
/// the retried job goes to the back of the queue, spec §5), else mark
/// terminal.
pub async fn fail_and_maybe_retry(pool: &PgPool, job: &QueueJobRow) -> sqlx::Result<bool> {
    if job.attempt < job.max_attempts {
        sqlx::query(
            "UPDATE queue_jobs SET state = $1, created_at = now(), scheduled_at = now(), updated_at = now() WHERE id = $2",
        )
        .bind(STATE_RETRYABLE)
        .bind(job.id)
        .execute(pool)
        .await?;
        Ok(true)
    } else {
        sqlx::query("UPDATE queue_jobs SET state = $1, updated_at = now() WHERE id = $2")
            .bind(STATE_DISCARDED)
            .bind(job.id)
            .execute(pool)
            .await?;
        Ok(false)
    }
}

/// Reschedules a job `after` in the future, keeping its current state as
/// `scheduled` until then (used by the stuck-job watchdog's 30s cooldown).
pub async fn schedule_retry_after(
    pool: &PgPool,
    job_id: Uuid,
    after: std::time::Duration,
) -> sqlx::Result<()> {
    let at = Utc::now() + ChronoDuration::from_std(after).unwrap_or(ChronoDuration::zero());
    sqlx::query(
        "UPDATE queue_jobs SET state = $1, scheduled_at = $2, updated_at = now() WHERE id = $3",
    )
    .bind(STATE_SCHEDULED)
    .bind(at)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn has_matching_row(pool: &PgPool, states: &[&str], unique_key: &str) -> sqlx::Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM queue_jobs WHERE unique_key = $1 AND state = ANY($2)",
    )
    .bind(unique_key)
    .bind(states)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn activate_scheduled_due(pool: &PgPool) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE queue_jobs SET state = 'available', updated_at = now()
         WHERE state = $1 AND scheduled_at <= now()",
    )
    .bind(STATE_SCHEDULED)
    .execute(pool)
    .await?;
    Ok(())
}

/// No process can legitimately hold a `running` row immediately after boot
/// (`FOR UPDATE SKIP LOCKED` rows die with the connection that locked them),
/// so every row left in that state is a crash orphan. Reactivate them before
/// crash recovery requeues their owning items, or `enqueue`'s unique-key
/// window would see the stale `running` row and hand back its id without
/// ever making it pickable again.
pub async fn reset_stale_running(pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_jobs SET state = $1, scheduled_at = now(), updated_at = now() WHERE state = $2",
    )
    .bind(STATE_AVAILABLE)
    .bind(STATE_RUNNING)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
