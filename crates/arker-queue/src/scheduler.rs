//! Scheduler-level behaviors built on the queue primitive (spec §4.6):
//! enqueueing captures, crash recovery, stuck-job watchdog, orphan reaper,
//! log retention, bulk retry.

use std::collections::HashSet;

use arker_common::types::{ArchiveKind, ArchiveItem, ItemStatus, MAX_ATTEMPTS};
use arker_common::short_id;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{ArchiveJobPayload, BulkRetryPayload, Priority, KIND_ARCHIVE, KIND_BULK_RETRY};
use crate::queue;

const ENQUEUE_UNIQUE_WINDOW: i64 = 60;
const STUCK_THRESHOLD_MINUTES: i64 = 5;
const PENDING_WARN_THRESHOLD_MINUTES: i64 = 60;
const ORPHAN_THRESHOLD_MINUTES: i64 = 60;
const STUCK_RETRY_COOLDOWN_SECS: u64 = 30;
const LOG_RETENTION_DAYS: i64 = 30;
const BULK_RETRY_PAGE_SIZE: i64 = 100;

/// Creates the capture and one `pending` item per requested kind, then
/// enqueues one archive job each (spec §4.6 "Enqueue").
pub async fn enqueue_capture(
    pool: &PgPool,
    original_url: &str,
    kinds: &[ArchiveKind],
    api_key_id: Option<Uuid>,
) -> Result<(Uuid, String), arker_common::ArkerError> {
    let mut tx = pool.begin().await?;

    let archived_url_id: Uuid = sqlx::query_scalar(
        "INSERT INTO archived_urls (id, original_url, created_at)
         VALUES ($1, $2, now())
         ON CONFLICT (original_url) DO UPDATE SET original_url = EXCLUDED.original_url
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(original_url)
    .fetch_one(&mut *tx)
    .await?;

    let short_id = short_id::allocate(pool).await?;
    let capture_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO captures (id, archived_url_id, short_id, timestamp, api_key_id)
         VALUES ($1, $2, $3, now(), $4)",
    )
    .bind(capture_id)
    .bind(archived_url_id)
    .bind(&short_id)
    .bind(api_key_id)
    .execute(&mut *tx)
    .await?;

    for kind in kinds {
        let item_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO archive_items (id, capture_id, kind, status, attempt_count, logs, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 0, '', now(), now())",
        )
        .bind(item_id)
        .bind(capture_id)
        .bind(kind.to_string())
        .bind(ItemStatus::Pending.to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    for kind in kinds {
        enqueue_archive_job(pool, capture_id, &short_id, *kind, original_url, Priority::Normal).await?;
    }

    Ok((capture_id, short_id))
}

async fn enqueue_archive_job(
    pool: &PgPool,
    capture_id: Uuid,
    short_id: &str,
    kind: ArchiveKind,
    url: &str,
    priority: Priority,
) -> sqlx::Result<Uuid> {
    let payload = ArchiveJobPayload {
        capture_id,
        short_id: short_id.to_string(),
        kind: kind.to_string(),
        url: url.to_string(),
    };
    let unique_key = format!("{capture_id}:{kind}");
    queue::enqueue(
        pool,
        KIND_ARCHIVE,
        serde_json::to_value(&payload).expect("ArchiveJobPayload always serializes"),
        priority,
        Some(&unique_key),
        ChronoDuration::seconds(ENQUEUE_UNIQUE_WINDOW),
        MAX_ATTEMPTS,
    )
    .await
}

/// On process start: re-enqueue every `pending` item with attempts left;
/// rewrite every `processing` item to `failed` with a recovery note so the
/// primitive's retry or bulk-retry picks it back up (spec §4.6).
pub async fn crash_recovery(pool: &PgPool) -> Result<(), arker_common::ArkerError> {
    let reactivated = queue::reset_stale_running(pool).await?;
    if reactivated > 0 {
        warn!(reactivated, "reactivated queue rows orphaned by crash");
    }

    let stuck_processing: Vec<ArchiveItem> =
        sqlx::query_as("SELECT * FROM archive_items WHERE status = $1")
            .bind(ItemStatus::Processing.to_string())
            .fetch_all(pool)
            .await?;

    for item in &stuck_processing {
        append_log(pool, item.id, "recovered from restart").await?;
        sqlx::query("UPDATE archive_items SET status = $1, updated_at = now() WHERE id = $2")
            .bind(ItemStatus::Failed.to_string())
            .bind(item.id)
            .execute(pool)
            .await?;
        if item.attempt_count < MAX_ATTEMPTS {
            requeue_item(pool, item).await?;
        }
    }

    let pending: Vec<ArchiveItem> = sqlx::query_as(
        "SELECT ai.* FROM archive_items ai WHERE ai.status = $1 AND ai.attempt_count < $2",
    )
    .bind(ItemStatus::Pending.to_string())
    .bind(MAX_ATTEMPTS)
    .fetch_all(pool)
    .await?;
    for item in &pending {
        requeue_item(pool, item).await?;
    }

    info!(
        recovered = stuck_processing.len(),
        repending = pending.len(),
        "crash recovery complete"
    );
    Ok(())
}

async fn requeue_item(pool: &PgPool, item: &ArchiveItem) -> Result<(), arker_common::ArkerError> {
    let capture: Option<(String, String)> = sqlx::query_as(
        "SELECT c.short_id, au.original_url FROM captures c
         JOIN archived_urls au ON au.id = c.archived_url_id
         WHERE c.id = $1",
    )
    .bind(item.capture_id)
    .fetch_optional(pool)
    .await?;
    let Some((short_id, url)) = capture else {
        warn!(item_id = %item.id, "cannot requeue item with no capture row");
        return Ok(());
    };
    enqueue_archive_job(pool, item.capture_id, &short_id, item.kind(), &url, Priority::Normal)
        .await?;
    Ok(())
}

/// Every 5 minutes: items `processing` with no progress for >5 min are
/// declared stuck; flip to `failed` and, if attempts remain, schedule a
/// retry after a 30s cooldown (spec §4.6).
pub async fn stuck_job_watchdog(pool: &PgPool) -> Result<(), arker_common::ArkerError> {
    queue::activate_scheduled_due(pool).await?;

    let cutoff = Utc::now() - ChronoDuration::minutes(STUCK_THRESHOLD_MINUTES);
    let stuck: Vec<ArchiveItem> = sqlx::query_as(
        "SELECT * FROM archive_items WHERE status = $1 AND updated_at < $2",
    )
    .bind(ItemStatus::Processing.to_string())
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    for item in &stuck {
        let duration = Utc::now() - item.updated_at;
        append_log(
            pool,
            item.id,
            &format!(
                "stuck watchdog: no progress for {}s, last update at {}",
                duration.num_seconds(),
                item.updated_at
            ),
        )
        .await?;
        sqlx::query("UPDATE archive_items SET status = $1, updated_at = now() WHERE id = $2")
            .bind(ItemStatus::Failed.to_string())
            .bind(item.id)
            .execute(pool)
            .await?;

        if item.attempt_count < MAX_ATTEMPTS {
            requeue_after_cooldown(pool, item).await?;
        }
    }

    let pending_cutoff = Utc::now() - ChronoDuration::minutes(PENDING_WARN_THRESHOLD_MINUTES);
    let stale_pending: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM archive_items WHERE status = $1 AND created_at < $2",
    )
    .bind(ItemStatus::Pending.to_string())
    .bind(pending_cutoff)
    .fetch_one(pool)
    .await?;
    if stale_pending > 0 {
        warn!(count = stale_pending, "items pending for over 1h");
    }

    Ok(())
}

async fn requeue_after_cooldown(
    pool: &PgPool,
    item: &ArchiveItem,
) -> Result<(), arker_common::ArkerError> {
    let capture: Option<(String, String)> = sqlx::query_as(
        "SELECT c.short_id, au.original_url FROM captures c
         JOIN archived_urls au ON au.id = c.archived_url_id
         WHERE c.id = $1",
    )
    .bind(item.capture_id)
    .fetch_optional(pool)
    .await?;
    let Some((short_id, url)) = capture else {
        return Ok(());
    };
    let job_id = enqueue_archive_job(pool, item.capture_id, &short_id, item.kind(), &url, Priority::Normal).await?;
    queue::schedule_retry_after(
        pool,
        job_id,
        std::time::Duration::from_secs(STUCK_RETRY_COOLDOWN_SECS),
    )
    .await?;
    Ok(())
}

/// Every 5 minutes: items with no live queue row in their expected state
/// are orphans, flipped to `failed` (spec §4.6).
pub async fn orphan_reaper(pool: &PgPool) -> Result<(), arker_common::ArkerError> {
    let pending_cutoff = Utc::now() - ChronoDuration::hours(1);
    let pending: Vec<ArchiveItem> = sqlx::query_as(
        "SELECT * FROM archive_items WHERE status = $1 AND created_at < $2",
    )
    .bind(ItemStatus::Pending.to_string())
    .bind(pending_cutoff)
    .fetch_all(pool)
    .await?;
    for item in &pending {
        let key = format!("{}:{}", item.capture_id, item.kind());
        let has_row = queue::has_matching_row(
            pool,
            &["available", "running", "retryable", "scheduled"],
            &key,
        )
        .await?;
        if !has_row {
            mark_orphan_failed(pool, item.id, "orphan reaper: pending with no queue row").await?;
        }
    }

    let processing_cutoff = Utc::now() - ChronoDuration::hours(1);
    let processing: Vec<ArchiveItem> = sqlx::query_as(
        "SELECT * FROM archive_items WHERE status = $1 AND updated_at < $2",
    )
    .bind(ItemStatus::Processing.to_string())
    .bind(processing_cutoff)
    .fetch_all(pool)
    .await?;
    for item in &processing {
        let key = format!("{}:{}", item.capture_id, item.kind());
        let has_running = queue::has_matching_row(pool, &["running"], &key).await?;
        if !has_running {
            mark_orphan_failed(pool, item.id, "orphan reaper: processing with no running queue row").await?;
        }
    }

    let discarded: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT ai.id FROM archive_items ai
         WHERE ai.status IN ($1, $2)
           AND EXISTS (
             SELECT 1 FROM queue_jobs qj
             WHERE qj.unique_key = ai.capture_id::text || ':' || ai.kind
               AND qj.state = 'discarded'
           )",
    )
    .bind(ItemStatus::Pending.to_string())
    .bind(ItemStatus::Processing.to_string())
    .fetch_all(pool)
    .await?;
    for (id,) in discarded {
        mark_orphan_failed(pool, id, "orphan reaper: queue row discarded").await?;
    }

    Ok(())
}

async fn mark_orphan_failed(pool: &PgPool, item_id: Uuid, note: &str) -> Result<(), arker_common::ArkerError> {
    append_log(pool, item_id, note).await?;
    sqlx::query("UPDATE archive_items SET status = $1, updated_at = now() WHERE id = $2")
        .bind(ItemStatus::Failed.to_string())
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Daily sweep: blanks logs of items completed >30 days ago (spec §4.6).
pub async fn log_retention_sweep(pool: &PgPool) -> Result<u64, arker_common::ArkerError> {
    let cutoff = Utc::now() - ChronoDuration::days(LOG_RETENTION_DAYS);
    let result = sqlx::query(
        "UPDATE archive_items SET logs = '' WHERE status = $1 AND updated_at < $2 AND logs <> ''",
    )
    .bind(ItemStatus::Completed.to_string())
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Admin bulk-retry: paginate failed items, reset to pending, and enqueue a
/// fresh high-priority archive job each (spec §4.6).
pub async fn run_bulk_retry(pool: &PgPool, payload: &BulkRetryPayload) -> Result<u64, arker_common::ArkerError> {
    info!(requested_by = %payload.requested_by, "bulk retry started");
    let mut total = 0u64;
    let mut seen: HashSet<Uuid> = HashSet::new();

    loop {
        let batch: Vec<ArchiveItem> = sqlx::query_as(
            "SELECT * FROM archive_items WHERE status = $1 ORDER BY updated_at ASC LIMIT $2",
        )
        .bind(ItemStatus::Failed.to_string())
        .bind(BULK_RETRY_PAGE_SIZE)
        .fetch_all(pool)
        .await?;

        let fresh: Vec<&ArchiveItem> = batch.iter().filter(|i| seen.insert(i.id)).collect();
        if fresh.is_empty() {
            break;
        }

        for item in &fresh {
            append_log(
                pool,
                item.id,
                &format!("bulk retry requested by {}", payload.requested_by),
            )
            .await?;
            sqlx::query(
                "UPDATE archive_items SET status = $1, attempt_count = 0, updated_at = now() WHERE id = $2",
            )
            .bind(ItemStatus::Pending.to_string())
            .bind(item.id)
            .execute(pool)
            .await?;

            let capture: Option<(String, String)> = sqlx::query_as(
                "SELECT c.short_id, au.original_url FROM captures c
                 JOIN archived_urls au ON au.id = c.archived_url_id
                 WHERE c.id = $1",
            )
            .bind(item.capture_id)
            .fetch_optional(pool)
            .await?;
            if let Some((short_id, url)) = capture {
                enqueue_archive_job(pool, item.capture_id, &short_id, item.kind(), &url, Priority::High)
                    .await?;
                total += 1;
            }
        }

        if fresh.len() < BULK_RETRY_PAGE_SIZE as usize {
            break;
        }
    }

    info!(total, "bulk retry enqueued");
    Ok(total)
}

pub async fn enqueue_bulk_retry(pool: &PgPool, requested_by: &str) -> sqlx::Result<Uuid> {
    let payload = BulkRetryPayload {
        requested_by: requested_by.to_string(),
    };
    queue::enqueue(
        pool,
        KIND_BULK_RETRY,
        serde_json::to_value(&payload).expect("BulkRetryPayload always serializes"),
        Priority::High,
        None,
        ChronoDuration::zero(),
        1,
    )
    .await
}

async fn append_log(pool: &PgPool, item_id: Uuid, line: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE archive_items SET logs = logs || $1 || E'\\n', updated_at = now() WHERE id = $2")
        .bind(line)
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}
