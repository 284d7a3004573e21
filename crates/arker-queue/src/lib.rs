//! Durable job queue and scheduler (spec §4.6): `queue_jobs` primitive,
//! capture enqueueing, crash recovery, stuck-job/orphan sweeps, and the
//! worker pool that dispatches jobs to `arker-archive`.

pub mod model;
pub mod queue;
pub mod scheduler;
pub mod timeouts;
pub mod worker_pool;

pub use model::{ArchiveJobPayload, BulkRetryPayload, Priority, QueueJobRow};
pub use scheduler::{
    crash_recovery, enqueue_bulk_retry, enqueue_capture, log_retention_sweep, orphan_reaper,
    run_bulk_retry, stuck_job_watchdog,
};
pub use worker_pool::{run_sweepers, WorkerPool};
