//! Archiver contract and format plugins (spec §4.5): HTML snapshot,
//! screenshot, repository clone, video download.

pub mod archivers;
pub mod contract;
pub mod tracker_hosts;

pub use archivers::{HtmlSnapshotArchiver, RepoArchiver, ScreenshotArchiver, VideoArchiver};
pub use contract::{ArchiveContext, ArchiveOutput, ArchiveResult, Archiver, Closer};

use std::collections::HashSet;
use std::sync::Arc;

use arker_common::types::ArchiveKind;

/// Dispatches on the item's kind to the matching archiver (spec §9
/// redesign flag: "Expose a capability set and a tagged variant of
/// archiver kinds; dispatch in the worker").
pub fn archiver_for(kind: ArchiveKind, tracker_hosts: Arc<HashSet<String>>) -> Box<dyn Archiver> {
    match kind {
        ArchiveKind::HtmlSnapshot => Box::new(HtmlSnapshotArchiver { tracker_hosts }),
        ArchiveKind::Screenshot => Box::new(ScreenshotArchiver { tracker_hosts }),
        ArchiveKind::Repo => Box::new(RepoArchiver),
        ArchiveKind::Video => Box::new(VideoArchiver),
    }
}
