use arker_common::ArkerError;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::contract::{ArchiveContext, ArchiveOutput, ArchiveResult, Archiver};

pub struct VideoArchiver;

#[async_trait]
impl Archiver for VideoArchiver {
    async fn archive(&self, ctx: ArchiveContext) -> ArchiveResult {
        probe(&ctx).await?;

        let mut command = Command::new("yt-dlp");
        command
            .arg("-f")
            .arg("bestvideo+bestaudio/best")
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("-o")
            .arg("-")
            .arg(&ctx.url)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(proxy) = &ctx.upstream_proxy {
            command.arg("--proxy").arg(proxy);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ArkerError::Transient(format!("spawn yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ArkerError::Fatal("yt-dlp stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ArkerError::Fatal("yt-dlp stderr not piped".into()))?;

        let log_sink = ctx.log_sink.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log_sink.lock().await.append(&line);
            }
        });

        let closer: crate::contract::Closer = Box::pin(wait_child(child, ctx.cancel.clone()));

        Ok(ArchiveOutput {
            stream: Box::new(stdout),
            extension: ".mp4".to_string(),
            mime_type: "video/mp4".to_string(),
            bundle: None,
            closer: Some(closer),
        })
    }
}

async fn wait_child(
    mut child: Child,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<(), ArkerError> {
    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ArkerError::Cancelled);
        }
        status = child.wait() => status,
    };
    let status = status.map_err(|e| ArkerError::Transient(format!("yt-dlp wait: {e}")))?;
    if !status.success() {
        return Err(ArkerError::Transient(format!(
            "yt-dlp exited with {:?}",
            status.code()
        )));
    }
    Ok(())
}

/// `--print title,duration,uploader` validates accessibility before the
/// real download starts (spec §4.5).
async fn probe(ctx: &ArchiveContext) -> Result<(), ArkerError> {
    let mut command = Command::new("yt-dlp");
    command
        .arg("--print")
        .arg("title,duration,uploader")
        .arg("--skip-download")
        .arg(&ctx.url)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if let Some(proxy) = &ctx.upstream_proxy {
        command.arg("--proxy").arg(proxy);
    }

    let child = command
        .spawn()
        .map_err(|e| ArkerError::Transient(format!("spawn yt-dlp probe: {e}")))?;

    let output = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(ArkerError::Cancelled),
        output = child.wait_with_output() => output,
    };
    let output = output.map_err(|e| ArkerError::Transient(format!("yt-dlp probe io: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    ctx.log(format!("probe: {}", stdout.trim())).await;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        ctx.log(format!("probe failed: {stderr}")).await;
        return Err(ArkerError::Transient("video probe failed".into()));
    }
    Ok(())
}
