use std::time::Duration;

use arker_common::types::ArchiveKind;

/// Per-type timeout governing the whole archiver call (spec §6).
pub fn for_kind(kind: ArchiveKind) -> Duration {
    match kind {
        ArchiveKind::HtmlSnapshot | ArchiveKind::Screenshot => Duration::from_secs(3 * 60),
        ArchiveKind::Repo => Duration::from_secs(10 * 60),
        ArchiveKind::Video => Duration::from_secs(30 * 60),
    }
}
