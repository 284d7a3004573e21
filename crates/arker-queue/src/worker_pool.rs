//! Worker pool: `MAX_WORKERS` parallel tasks, each owning one job end-to-end
//! (spec §4.6 "Pickup"/"Execute"/"Finalize", §5).

use std::collections::HashSet;
use std::sync::Arc;

use arker_archive::{archiver_for, ArchiveContext};
use arker_common::types::{ArchiveItem, ArchiveKind, ItemStatus};
use arker_common::LogSink;
use arker_store::BlobStore;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::model::{ArchiveJobPayload, BulkRetryPayload, QueueJobRow, KIND_ARCHIVE, KIND_BULK_RETRY};
use crate::queue;
use crate::scheduler;
use crate::timeouts;

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

pub struct WorkerPool {
    pool: PgPool,
    store: Arc<dyn BlobStore>,
    tracker_hosts: Arc<HashSet<String>>,
    upstream_proxy: Option<String>,
    max_workers: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        pool: PgPool,
        store: Arc<dyn BlobStore>,
        tracker_hosts: Arc<HashSet<String>>,
        upstream_proxy: Option<String>,
        max_workers: usize,
    ) -> Self {
        Self {
            pool,
            store,
            tracker_hosts,
            upstream_proxy,
            max_workers,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns `max_workers` archive workers plus one bulk-retry worker.
    pub fn spawn(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.max_workers + 1);
        for idx in 0..self.max_workers {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.archive_worker_loop(idx).await }));
        }
        let this = self.clone();
        handles.push(tokio::spawn(async move { this.bulk_retry_worker_loop().await }));
        handles
    }

    async fn archive_worker_loop(&self, worker_idx: usize) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let job = match queue::pop_next(&self.pool, KIND_ARCHIVE).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                    }
                }
                Err(e) => {
                    error!(worker = worker_idx, error = %e, "failed to pop archive job");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            if let Err(e) = self.run_archive_job(&job).await {
                error!(job_id = %job.id, error = %e, "archive job ended in error");
            }
        }
    }

    async fn bulk_retry_worker_loop(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let job = match queue::pop_next(&self.pool, KIND_BULK_RETRY).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(POLL_INTERVAL * 10) => continue,
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to pop bulk_retry job");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            let payload: BulkRetryPayload = match serde_json::from_value(job.payload.clone()) {
                Ok(p) => p,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "malformed bulk_retry payload");
                    let _ = queue::complete(&self.pool, job.id).await;
                    continue;
                }
            };
            match scheduler::run_bulk_retry(&self.pool, &payload).await {
                Ok(n) => {
                    info!(job_id = %job.id, enqueued = n, "bulk retry finished");
                    let _ = queue::complete(&self.pool, job.id).await;
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "bulk retry failed");
                    let _ = queue::fail_and_maybe_retry(&self.pool, &job).await;
                }
            }
        }
    }

    async fn run_archive_job(&self, job: &QueueJobRow) -> Result<(), arker_common::ArkerError> {
        let payload: ArchiveJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| arker_common::ArkerError::Invalid(format!("bad job payload: {e}")))?;
        let kind: ArchiveKind = payload
            .kind
            .parse()
            .map_err(arker_common::ArkerError::Invalid)?;

        let item: Option<ArchiveItem> = sqlx::query_as(
            "SELECT * FROM archive_items WHERE capture_id = $1 AND kind = $2",
        )
        .bind(payload.capture_id)
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(item) = item else {
            warn!(capture_id = %payload.capture_id, %kind, "archive job has no matching item, dropping");
            queue::complete(&self.pool, job.id).await?;
            return Ok(());
        };

        sqlx::query("UPDATE archive_items SET status = $1, attempt_count = $2, updated_at = now() WHERE id = $3")
            .bind(ItemStatus::Processing.to_string())
            .bind(job.attempt)
            .bind(item.id)
            .execute(&self.pool)
            .await?;

        let log_sink = Arc::new(Mutex::new(LogSink::new()));
        let cancel = CancellationToken::new();
        let ctx = ArchiveContext {
            cancel: cancel.clone(),
            url: payload.url.clone(),
            short_id: payload.short_id.clone(),
            item_id: item.id,
            log_sink: log_sink.clone(),
            upstream_proxy: self.upstream_proxy.clone(),
        };

        let archiver = archiver_for(kind, self.tracker_hosts.clone());
        let timeout = timeouts::for_kind(kind);

        let outcome = tokio::time::timeout(timeout, archiver.archive(ctx)).await;

        let result = match outcome {
            Ok(Ok(output)) => {
                self.finalize_success(&item, &payload, output, &log_sink).await
            }
            Ok(Err(e)) => {
                cancel.cancel();
                Err(e)
            }
            Err(_) => {
                cancel.cancel();
                Err(arker_common::ArkerError::Transient(format!(
                    "archive job timed out after {timeout:?}"
                )))
            }
        };

        log_sink.lock().await.flush_to(&self.pool, item.id).await;

        match result {
            Ok(()) => {
                queue::complete(&self.pool, job.id).await?;
            }
            Err(e) => {
                let retried = queue::fail_and_maybe_retry(&self.pool, job).await?;
                if !retried {
                    sqlx::query(
                        "UPDATE archive_items SET status = $1, updated_at = now() WHERE id = $2",
                    )
                    .bind(ItemStatus::Failed.to_string())
                    .bind(item.id)
                    .execute(&self.pool)
                    .await?;
                }
                warn!(item_id = %item.id, error = %e, retried, "archive job failed");
            }
        }

        Ok(())
    }

    async fn finalize_success(
        &self,
        item: &ArchiveItem,
        payload: &ArchiveJobPayload,
        output: arker_archive::ArchiveOutput,
        log_sink: &Arc<Mutex<LogSink>>,
    ) -> Result<(), arker_common::ArkerError> {
        let arker_archive::ArchiveOutput {
            mut stream,
            extension,
            mime_type: _,
            bundle,
            closer,
        } = output;

        let key = arker_common::storage_key(&payload.short_id, item.kind(), &extension);
        let copy_result = async {
            let mut writer = self.store.writer(&key).await?;
            let size = tokio::io::copy(&mut stream, &mut writer).await?;
            writer.finish().await?;
            Ok::<u64, arker_store::StoreError>(size)
        }
        .await;

        if let Some(closer) = closer {
            if let Err(e) = closer.await {
                log_sink
                    .lock()
                    .await
                    .append(format!("stream producer close error: {e}"));
            }
        }
        if let Some(bundle) = bundle {
            // Cleanup is deferred unconditionally, even on a failed copy
            // (spec §4.6 "Execute"; §5 cancellation rules).
            bundle.cleanup().await;
        }

        let size = copy_result.map_err(|e| arker_common::ArkerError::Fatal(format!("blob write failed: {e}")))?;

        sqlx::query(
            "UPDATE archive_items SET status = $1, storage_key = $2, extension = $3, file_size = $4, updated_at = now() WHERE id = $5",
        )
        .bind(ItemStatus::Completed.to_string())
        .bind(&key)
        .bind(&extension)
        .bind(size as i64)
        .bind(item.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Background sweepers run alongside the worker pool (spec §4.6).
pub async fn run_sweepers(pool: PgPool, cancel: CancellationToken) {
    let watchdog_interval = std::time::Duration::from_secs(5 * 60);
    let log_retention_interval = std::time::Duration::from_secs(24 * 60 * 60);
    let mut last_log_sweep = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(watchdog_interval) => {}
        }

        if let Err(e) = scheduler::stuck_job_watchdog(&pool).await {
            error!(error = %e, "stuck job watchdog failed");
        }
        if let Err(e) = scheduler::orphan_reaper(&pool).await {
            error!(error = %e, "orphan reaper failed");
        }
        if last_log_sweep.elapsed() >= log_retention_interval {
            match scheduler::log_retention_sweep(&pool).await {
                Ok(n) => info!(rows = n, "log retention sweep complete"),
                Err(e) => error!(error = %e, "log retention sweep failed"),
            }
            last_log_sweep = tokio::time::Instant::now();
        }
    }
}
