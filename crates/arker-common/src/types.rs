use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the four archive formats arker knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveKind {
    #[serde(rename = "html-snapshot")]
    HtmlSnapshot,
    #[serde(rename = "screenshot")]
    Screenshot,
    #[serde(rename = "repo")]
    Repo,
    #[serde(rename = "video")]
    Video,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 4] = [
        ArchiveKind::HtmlSnapshot,
        ArchiveKind::Screenshot,
        ArchiveKind::Repo,
        ArchiveKind::Video,
    ];
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveKind::HtmlSnapshot => write!(f, "html-snapshot"),
            ArchiveKind::Screenshot => write!(f, "screenshot"),
            ArchiveKind::Repo => write!(f, "repo"),
            ArchiveKind::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for ArchiveKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "html-snapshot" => Ok(Self::HtmlSnapshot),
            "screenshot" => Ok(Self::Screenshot),
            "repo" => Ok(Self::Repo),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown archive kind: {other}")),
        }
    }
}

/// Lifecycle state of an `ArchiveItem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Processing => write!(f, "processing"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

/// Maximum number of attempts the queue primitive allows an item before it
/// is terminally `failed` (spec invariant 3).
pub const MAX_ATTEMPTS: i32 = 3;

/// A URL arker has ever been asked to archive.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ArchivedUrl {
    pub id: Uuid,
    pub original_url: String,
    pub created_at: DateTime<Utc>,
}

/// One archiving event for one URL. Immutable once created.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Capture {
    pub id: Uuid,
    pub archived_url_id: Uuid,
    pub short_id: String,
    pub timestamp: DateTime<Utc>,
    pub api_key_id: Option<Uuid>,
}

/// One per-format job belonging to a `Capture`. `kind`/`status` are stored
/// as plain text columns (like the teacher's `StoredInteraction.kind`) and
/// parsed on demand rather than round-tripped through a `sqlx` enum type.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ArchiveItem {
    pub id: Uuid,
    pub capture_id: Uuid,
    pub kind: String,
    pub status: String,
    pub attempt_count: i32,
    pub storage_key: Option<String>,
    pub extension: Option<String>,
    pub file_size: Option<i64>,
    pub logs: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArchiveItem {
    /// Parses the stored `kind` column. The only writer is this codebase
    /// and it always writes `ArchiveKind::to_string()`.
    pub fn kind(&self) -> ArchiveKind {
        self.kind
            .parse()
            .expect("archive_items.kind is always a valid ArchiveKind")
    }

    pub fn status(&self) -> ItemStatus {
        self.status
            .parse()
            .expect("archive_items.status is always a valid ItemStatus")
    }

    /// Invariant 2: a non-empty storage_key implies `completed`.
    pub fn is_consistent(&self) -> bool {
        match &self.storage_key {
            Some(k) if !k.is_empty() => self.status() == ItemStatus::Completed,
            _ => true,
        }
    }
}

/// The in-memory unit scheduled to a worker (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub capture_id: Uuid,
    pub short_id: String,
    pub kind: ArchiveKind,
    pub url: String,
}

/// A bearer key for the external archive endpoint.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub hash: String,
    pub label: String,
    pub enabled: bool,
}

/// A single process-wide persisted setting row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ConfigRow {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_kind_round_trips_through_display_and_from_str() {
        for kind in ArchiveKind::ALL {
            let s = kind.to_string();
            assert_eq!(s.parse::<ArchiveKind>().unwrap(), kind);
        }
    }

    #[test]
    fn item_status_round_trips() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::Processing,
            ItemStatus::Completed,
            ItemStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<ItemStatus>().unwrap(), status);
        }
    }

    #[test]
    fn empty_storage_key_is_consistent_regardless_of_status() {
        let item = ArchiveItem {
            id: Uuid::new_v4(),
            capture_id: Uuid::new_v4(),
            kind: "video".into(),
            status: "pending".into(),
            attempt_count: 0,
            storage_key: None,
            extension: None,
            file_size: None,
            logs: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(item.is_consistent());
    }

    #[test]
    fn non_empty_storage_key_requires_completed_status() {
        let mut item = ArchiveItem {
            id: Uuid::new_v4(),
            capture_id: Uuid::new_v4(),
            kind: "video".into(),
            status: "processing".into(),
            attempt_count: 1,
            storage_key: Some("abc1234/video.mp4.zst".into()),
            extension: Some(".mp4".into()),
            file_size: Some(10),
            logs: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!item.is_consistent());
        item.status = "completed".into();
        assert!(item.is_consistent());
    }
}
