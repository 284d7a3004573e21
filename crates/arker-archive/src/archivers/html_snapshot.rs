use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use arker_browser::bundle::PageOptions;
use arker_browser::page_ready::{self, PageReadyOptions};
use arker_browser::BrowserBundle;
use arker_common::ArkerError;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{CaptureSnapshotFormat, CaptureSnapshotParams};

use crate::contract::{ArchiveContext, ArchiveOutput, ArchiveResult, Archiver};

pub struct HtmlSnapshotArchiver {
    pub tracker_hosts: Arc<HashSet<String>>,
}

#[async_trait]
impl Archiver for HtmlSnapshotArchiver {
    async fn archive(&self, ctx: ArchiveContext) -> ArchiveResult {
        let bundle = Arc::new(BrowserBundle::new(ctx.upstream_proxy.clone()));
        bundle
            .create_browser()
            .await
            .map_err(|e| ArkerError::Transient(e.to_string()))?;
        bundle
            .create_page(&ctx.url, PageOptions::default())
            .await
            .map_err(|e| ArkerError::Transient(e.to_string()))?;
        let page = bundle
            .page()
            .await
            .map_err(|e| ArkerError::Transient(e.to_string()))?;

        let opts = PageReadyOptions {
            scroll: true,
            tracker_hosts: self.tracker_hosts.clone(),
            ..Default::default()
        };

        ctx.log("navigating").await;
        let ready = page_ready::run(&page, &ctx.url, &opts, &ctx.cancel).await;
        match ready {
            Ok(()) => ctx.log("page ready").await,
            Err(arker_browser::BrowserError::Cancelled) => {
                return Err(ArkerError::Cancelled);
            }
            Err(e) => {
                ctx.log(format!("page-ready error, snapshotting anyway: {e}"))
                    .await;
            }
        }

        let params = CaptureSnapshotParams::builder()
            .format(CaptureSnapshotFormat::Mhtml)
            .build();
        let snapshot = page
            .execute(params)
            .await
            .map_err(|e| ArkerError::Transient(e.to_string()))?;
        let mhtml = snapshot.result.data.clone();

        Ok(ArchiveOutput {
            stream: Box::new(Cursor::new(mhtml.into_bytes())),
            extension: ".mhtml".to_string(),
            mime_type: "application/x-mhtml".to_string(),
            bundle: Some(bundle),
            closer: None,
        })
    }
}
