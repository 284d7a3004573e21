//! The archiver contract shared by every format plugin (spec §4.5).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arker_browser::BrowserBundle;
use arker_common::{ArkerError, LogSink};
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type Closer = Pin<Box<dyn Future<Output = Result<(), ArkerError>> + Send>>;

/// Everything an archiver needs to run one job. Cheap to clone; carries
/// only handles, no owned heavy state.
#[derive(Clone)]
pub struct ArchiveContext {
    pub cancel: CancellationToken,
    pub url: String,
    pub short_id: String,
    pub item_id: Uuid,
    pub log_sink: Arc<Mutex<LogSink>>,
    pub upstream_proxy: Option<String>,
}

impl ArchiveContext {
    pub async fn log(&self, line: impl Into<String>) {
        self.log_sink.lock().await.append(&line.into());
    }
}

/// What an archiver produces. The caller owns `bundle` and must release it
/// exactly once regardless of how the stream ends (spec §4.5). When
/// `closer` is set, the stream is backed by a live producer (a subprocess)
/// that the caller must close after fully reading the stream, to observe
/// its final error.
pub struct ArchiveOutput {
    pub stream: Box<dyn AsyncRead + Unpin + Send>,
    pub extension: String,
    pub mime_type: String,
    pub bundle: Option<Arc<BrowserBundle>>,
    pub closer: Option<Closer>,
}

pub type ArchiveResult = Result<ArchiveOutput, ArkerError>;

#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, ctx: ArchiveContext) -> ArchiveResult;
}
