//! Optional object-store backend (spec §4.1, "a second optional backend
//! speaks to an object-store API with the same surface"). Buffers uploads
//! through a local temp file, finalized on close; the temp file is removed
//! on abandonment via `Drop`.

use std::io::Cursor;
use std::path::PathBuf;

use async_compression::tokio::bufread::ZstdDecoder;
use async_compression::tokio::write::ZstdEncoder;
use async_trait::async_trait;
use opendal::Operator;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{StoreError, StoreResult};
use crate::{BlobStore, BlobWriter, SeekableRead};

pub struct ObjectBlobStore {
    op: Operator,
}

impl ObjectBlobStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn writer(&self, key: &str) -> StoreResult<Box<dyn BlobWriter>> {
        let tmp = tempfile::NamedTempFile::new()?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.keep().map_err(|e| StoreError::Io(e.error))?;
        let file = File::create(&tmp_path).await?;
        Ok(Box::new(ObjectBlobWriter {
            encoder: Some(ZstdEncoder::new(file)),
            tmp_path,
            key: key.to_string(),
            op: self.op.clone(),
            finished: false,
        }))
    }

    async fn reader(&self, key: &str) -> StoreResult<Box<dyn AsyncRead + Unpin + Send>> {
        // `opendal::Operator::read` returns the full (zstd-compressed)
        // object; this backend is meant for smaller archive items fetched
        // over HTTP range, not for streaming multi-gigabyte reads, so
        // buffering the compressed bytes before decoding is acceptable.
        let bytes = self.op.read(key).await.map_err(map_opendal_err)?;
        Ok(Box::new(ZstdDecoder::new(BufReader::new(Cursor::new(
            bytes.to_vec(),
        )))))
    }

    async fn seekable_reader(
        &self,
        key: &str,
    ) -> StoreResult<Box<dyn SeekableRead + Unpin + Send>> {
        let bytes = self.op.read(key).await.map_err(map_opendal_err)?;
        let mut decoder = ZstdDecoder::new(BufReader::new(Cursor::new(bytes.to_vec())));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).await?;
        Ok(Box::new(Cursor::new(decompressed)))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.op.exists(key).await.map_err(map_opendal_err)
    }

    async fn size(&self, key: &str) -> StoreResult<u64> {
        let meta = self.op.stat(key).await.map_err(map_opendal_err)?;
        Ok(meta.content_length())
    }
}

fn map_opendal_err(e: opendal::Error) -> StoreError {
    if e.kind() == opendal::ErrorKind::NotFound {
        StoreError::NotFound(e.to_string())
    } else {
        StoreError::Io(std::io::Error::other(e))
    }
}

pub struct ObjectBlobWriter {
    encoder: Option<ZstdEncoder<File>>,
    tmp_path: PathBuf,
    key: String,
    op: Operator,
    finished: bool,
}

impl AsyncWrite for ObjectBlobWriter {
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
impl BlobWriter for ObjectBlobWriter {
    async fn finish(mut self: Box<Self>) -> StoreResult<()> {
        let mut encoder = self.encoder.take().expect("finish called once");
        encoder.shutdown().await?;
        let bytes = tokio::fs::read(&self.tmp_path).await?;
        self.op
            .write(&self.key, bytes)
            .await
            .map_err(map_opendal_err)?;
        tokio::fs::remove_file(&self.tmp_path).await.ok();
        self.finished = true;
        Ok(())
    }
}

impl Drop for ObjectBlobWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}
