pub mod html_snapshot;
pub mod repo;
pub mod screenshot;
pub mod video;

pub use html_snapshot::HtmlSnapshotArchiver;
pub use repo::RepoArchiver;
pub use screenshot::ScreenshotArchiver;
pub use video::VideoArchiver;
