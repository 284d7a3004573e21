//! Content-key-addressed blob store (spec §4.1). One file per key under a
//! root directory; writes are transparently `zstd`-compressed, reads are
//! decompressed on the fly. A seekable reader is provided for range-served
//! media by spooling the decompressed object to a temp file.

pub mod error;
pub mod fs;
#[cfg(feature = "object-store")]
pub mod object;

pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

/// A write handle for a single key. Dropping without calling `finish` may
/// leave a partial temp file behind — callers that care about cleanup on
/// early-return paths should call `abort` explicitly (the filesystem
/// backend also best-effort cleans on `Drop`).
#[async_trait]
pub trait BlobWriter: AsyncWrite + Unpin + Send {
    /// Finalize the write: flush the compressor, close the underlying file,
    /// and atomically install it at the target key. Only after this
    /// returns `Ok` does `exists(key)` observe the object.
    async fn finish(self: Box<Self>) -> StoreResult<()>;
}

/// The blob store contract (spec §4.1).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn writer(&self, key: &str) -> StoreResult<Box<dyn BlobWriter>>;

    async fn reader(&self, key: &str) -> StoreResult<Box<dyn AsyncRead + Unpin + Send>>;

    async fn seekable_reader(
        &self,
        key: &str,
    ) -> StoreResult<Box<dyn SeekableRead + Unpin + Send>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Stored (compressed) size in bytes — sufficient for UI display per
    /// spec §4.1 ("decompressed size is not required").
    async fn size(&self, key: &str) -> StoreResult<u64>;
}

/// Combined bound for the seekable reader return type.
pub trait SeekableRead: AsyncRead + AsyncSeek {}
impl<T: AsyncRead + AsyncSeek> SeekableRead for T {}
