use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveJobPayload {
    pub capture_id: Uuid,
    pub short_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRetryPayload {
    pub requested_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high_priority",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the durable queue primitive (`queue_jobs`). `state` tracks the
/// primitive's own lifecycle, independent of the `ArchiveItem.status` it
/// drives.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueJobRow {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: String,
    pub state: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub unique_key: Option<String>,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub const STATE_AVAILABLE: &str = "available";
pub const STATE_RUNNING: &str = "running";
pub const STATE_RETRYABLE: &str = "retryable";
pub const STATE_SCHEDULED: &str = "scheduled";
pub const STATE_DISCARDED: &str = "discarded";

pub const KIND_ARCHIVE: &str = "archive";
pub const KIND_BULK_RETRY: &str = "bulk_retry";
