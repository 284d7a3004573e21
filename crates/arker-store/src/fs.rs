use std::path::{Path, PathBuf};

use async_compression::tokio::bufread::ZstdDecoder;
use async_compression::tokio::write::ZstdEncoder;
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{StoreError, StoreResult};
use crate::{BlobStore, BlobWriter, SeekableRead};

/// File-backed blob store: one file per key under `root`, directory
/// separators in the key forming a shallow tree (spec §4.1).
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn writer(&self, key: &str) -> StoreResult<Box<dyn BlobWriter>> {
        let final_path = self.path_for(key);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_path_for(&final_path);
        let file = File::create(&tmp_path).await?;
        Ok(Box::new(FsBlobWriter {
            encoder: Some(ZstdEncoder::new(file)),
            tmp_path,
            final_path,
            finished: false,
        }))
    }

    async fn reader(&self, key: &str) -> StoreResult<Box<dyn AsyncRead + Unpin + Send>> {
        let path = self.path_for(key);
        let file = File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        Ok(Box::new(ZstdDecoder::new(BufReader::new(file))))
    }

    async fn seekable_reader(
        &self,
        key: &str,
    ) -> StoreResult<Box<dyn SeekableRead + Unpin + Send>> {
        // The on-disk object is zstd-compressed and not frame-seekable, so
        // spool the fully decompressed object into a temp file and hand
        // back that file handle, which supports AsyncSeek natively.
        let path = self.path_for(key);
        let file = File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        let mut decoder = ZstdDecoder::new(BufReader::new(file));

        let spool = tempfile::NamedTempFile::new()?;
        let spool_path = spool.path().to_path_buf();
        // Keep the NamedTempFile alive long enough to hand off the path;
        // we reopen via tokio so the handle we return is fully async.
        drop(spool);
        let mut spool_file = File::create(&spool_path).await?;

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = decoder.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            spool_file.write_all(&buf[..n]).await?;
        }
        spool_file.flush().await?;
        spool_file.shutdown().await?;

        let seekable = File::open(&spool_path).await?;
        Ok(Box::new(SpooledReader {
            file: seekable,
            _cleanup: SpoolCleanup(spool_path),
        }))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn size(&self, key: &str) -> StoreResult<u64> {
        let meta = tokio::fs::metadata(self.path_for(key))
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        Ok(meta.len())
    }
}

fn not_found_or_io(key: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(e)
    }
}

fn tmp_path_for(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{file_name}.tmp-{}", uuid_like()))
}

/// A lightweight unique suffix without pulling in a dependency on `uuid`
/// just for temp-file naming — the store crate has no other use for it.
fn uuid_like() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ (std::process::id() as u64).rotate_left(32)
}

pub struct FsBlobWriter {
    encoder: Option<ZstdEncoder<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    finished: bool,
}

impl AsyncWrite for FsBlobWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(self.encoder.as_mut().expect("writer used after finish")).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(self.encoder.as_mut().expect("writer used after finish")).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(self.encoder.as_mut().expect("writer used after finish")).poll_shutdown(cx)
    }
}

#[async_trait]
impl BlobWriter for FsBlobWriter {
    async fn finish(mut self: Box<Self>) -> StoreResult<()> {
        let mut encoder = self.encoder.take().expect("finish called once");
        encoder.shutdown().await?;
        tokio::fs::rename(&self.tmp_path, &self.final_path).await?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for FsBlobWriter {
    fn drop(&mut self) {
        if !self.finished {
            // Best-effort cleanup of an abandoned write (spec §4.1: "partial
            // writes on crash are acceptable because the caller only records
            // storage_key on successful close").
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

struct SpoolCleanup(PathBuf);

impl Drop for SpoolCleanup {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

struct SpooledReader {
    file: File,
    _cleanup: SpoolCleanup,
}

impl AsyncRead for SpooledReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncSeek for SpooledReader {
    fn start_seek(
        mut self: std::pin::Pin<&mut Self>,
        position: std::io::SeekFrom,
    ) -> std::io::Result<()> {
        std::pin::Pin::new(&mut self.file).start_seek(position)
    }

    fn poll_complete(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<u64>> {
        std::pin::Pin::new(&mut self.file).poll_complete(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = "abc1234/html-snapshot.mhtml";

        let mut writer = store.writer(key).await.unwrap();
        writer.write_all(b"hello world").await.unwrap();
        writer.finish().await.unwrap();

        assert!(store.exists(key).await.unwrap());

        let mut reader = store.reader(key).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn size_reports_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = "xyz9876/video.mp4";

        let mut writer = store.writer(key).await.unwrap();
        writer.write_all(&vec![7u8; 4096]).await.unwrap();
        writer.finish().await.unwrap();

        let size = store.size(key).await.unwrap();
        assert!(size > 0);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.reader("nope/nope.txt").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn seekable_reader_supports_seek_to_middle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = "seek123/html-snapshot.mhtml";

        let mut writer = store.writer(key).await.unwrap();
        writer.write_all(b"0123456789").await.unwrap();
        writer.finish().await.unwrap();

        let mut reader = store.seekable_reader(key).await.unwrap();
        use tokio::io::{AsyncSeekExt, AsyncReadExt as _};
        reader.seek(std::io::SeekFrom::Start(5)).await.unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"56789");
    }

    #[tokio::test]
    async fn abandoned_writer_leaves_no_partial_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = "abandon/video.mp4";

        {
            let mut writer = store.writer(key).await.unwrap();
            writer.write_all(b"partial").await.unwrap();
            // dropped without calling finish()
        }

        assert!(!store.exists(key).await.unwrap());
    }
}
