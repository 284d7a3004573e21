use arker_common::ArkerError;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::io::SyncIoBridge;

use crate::contract::{ArchiveContext, ArchiveOutput, ArchiveResult, Archiver};

const KNOWN_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org", "codeberg.org"];

pub struct RepoArchiver;

#[async_trait]
impl Archiver for RepoArchiver {
    async fn archive(&self, ctx: ArchiveContext) -> ArchiveResult {
        let canonical = canonicalize_repo_url(&ctx.url);
        ctx.log(format!("cloning {canonical}")).await;

        let tmp_dir =
            tempfile::tempdir().map_err(|e| ArkerError::Fatal(format!("tempdir: {e}")))?;
        let clone_dir = tmp_dir.path().join("repo.git");

        let mut command = Command::new("git");
        command
            .arg("clone")
            .arg("--bare")
            .arg("--quiet")
            .arg(&canonical)
            .arg(&clone_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(proxy) = &ctx.upstream_proxy {
            command.env("ALL_PROXY", proxy);
        }

        let child = command
            .spawn()
            .map_err(|e| ArkerError::Transient(format!("spawn git: {e}")))?;

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ArkerError::Cancelled),
            status = child.wait_with_output() => status,
        };
        let output = output.map_err(|e| ArkerError::Transient(format!("git clone io: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            ctx.log(format!("git clone failed: {stderr}")).await;
            return Err(ArkerError::Transient(format!(
                "git clone exited with {:?}",
                output.status.code()
            )));
        }
        ctx.log("clone complete, streaming tar").await;

        let (reader, writer) = tokio::io::duplex(256 * 1024);
        let source_dir = clone_dir.clone();
        let cancel = ctx.cancel.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let sync_writer = SyncIoBridge::new(writer);
            let mut builder = tar::Builder::new(sync_writer);
            if cancel.is_cancelled() {
                return Ok(());
            }
            builder.append_dir_all("repo.git", &source_dir)?;
            builder.finish()
        });

        // `tmp_dir` is held alive by this closure's capture until the reader
        // (and therefore the blocking task) is fully drained by the caller;
        // the `TempDir` guard removes the clone on drop.
        let guarded = TarStreamWithCleanup {
            inner: reader,
            _tmp_dir: tmp_dir,
        };

        Ok(ArchiveOutput {
            stream: Box::new(guarded),
            extension: ".tar".to_string(),
            mime_type: "application/x-tar".to_string(),
            bundle: None,
            closer: None,
        })
    }
}

struct TarStreamWithCleanup {
    inner: tokio::io::DuplexStream,
    _tmp_dir: tempfile::TempDir,
}

impl tokio::io::AsyncRead for TarStreamWithCleanup {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

/// Strips path tails and fragments for recognized hosts so
/// `github.com/owner/repo/tree/main/sub` clones `github.com/owner/repo`
/// (spec §4.5).
fn canonicalize_repo_url(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    parsed.set_fragment(None);
    parsed.set_query(None);

    let Some(host) = parsed.host_str() else {
        return parsed.to_string();
    };
    if !KNOWN_HOSTS.contains(&host) {
        return parsed.to_string();
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        return parsed.to_string();
    }
    let owner = segments[0];
    let repo = segments[1].trim_end_matches(".git");
    format!("https://{host}/{owner}/{repo}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tree_path_tail_on_github() {
        assert_eq!(
            canonicalize_repo_url("https://github.com/owner/repo/tree/main/sub"),
            "https://github.com/owner/repo"
        );
    }

    #[test]
    fn leaves_unknown_hosts_unchanged_aside_from_fragment() {
        let url = "https://example.com/owner/repo/tree/main#readme";
        assert_eq!(canonicalize_repo_url(url), "https://example.com/owner/repo/tree/main");
    }

    #[test]
    fn strips_dot_git_suffix() {
        assert_eq!(
            canonicalize_repo_url("https://gitlab.com/owner/repo.git"),
            "https://gitlab.com/owner/repo"
        );
    }
}
