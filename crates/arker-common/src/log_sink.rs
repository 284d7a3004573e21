//! Append-only, size-capped log buffer for a single `ArchiveItem` (spec §7,
//! "a pending item in the UI shows a live-streaming log (polled)").

use sqlx::PgPool;
use uuid::Uuid;

/// Cap on a single append — bounds one noisy `tracing::warn!`-sized line.
const MAX_APPEND_BYTES: usize = 64 * 1024;
/// Cap on the total accumulated buffer — bounds a misbehaving subprocess
/// (yt-dlp, git) that writes unbounded stderr.
const MAX_TOTAL_BYTES: usize = 1024 * 1024;
const TRUNCATED_MARKER: &str = "...[truncated]";

/// In-memory accumulator; the worker flushes it to the `archive_items.logs`
/// column periodically and on completion.
#[derive(Debug, Default)]
pub struct LogSink {
    buf: String,
    truncated: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, line: impl AsRef<str>) {
        if self.truncated {
            return;
        }
        let mut line = line.as_ref();
        if line.len() > MAX_APPEND_BYTES {
            line = &line[..MAX_APPEND_BYTES];
        }
        if self.buf.len() + line.len() + 1 > MAX_TOTAL_BYTES {
            self.buf.push_str(TRUNCATED_MARKER);
            self.truncated = true;
            return;
        }
        self.buf.push_str(line);
        self.buf.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    /// Persist the current buffer to `archive_items.logs`. Logs a warning
    /// rather than propagating, matching the teacher's "a failed write to
    /// the DB shouldn't abort the scrape" policy for non-critical writes.
    pub async fn flush_to(&self, pool: &PgPool, item_id: Uuid) {
        let result = sqlx::query("UPDATE archive_items SET logs = $1, updated_at = now() WHERE id = $2")
            .bind(&self.buf)
            .bind(item_id)
            .execute(pool)
            .await;
        if let Err(e) = result {
            tracing::warn!(item_id = %item_id, error = %e, "failed to flush item log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_accumulate_with_newlines() {
        let mut sink = LogSink::new();
        sink.append("first");
        sink.append("second");
        assert_eq!(sink.as_str(), "first\nsecond\n");
    }

    #[test]
    fn single_append_over_cap_is_truncated_to_cap() {
        let mut sink = LogSink::new();
        let huge = "x".repeat(MAX_APPEND_BYTES + 100);
        sink.append(&huge);
        assert_eq!(sink.as_str().len(), MAX_APPEND_BYTES + 1); // + newline
    }

    #[test]
    fn total_cap_stops_further_appends_with_marker() {
        let mut sink = LogSink::new();
        let chunk = "y".repeat(MAX_APPEND_BYTES);
        // Fill past the total cap.
        for _ in 0..(MAX_TOTAL_BYTES / MAX_APPEND_BYTES + 2) {
            sink.append(&chunk);
        }
        assert!(sink.as_str().ends_with(TRUNCATED_MARKER));
        let before_more = sink.as_str().len();
        sink.append("more text that should be dropped");
        assert_eq!(sink.as_str().len(), before_more);
    }
}
