use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use arker_browser::bundle::PageOptions;
use arker_browser::page_ready::{self, PageReadyOptions};
use arker_browser::BrowserBundle;
use arker_common::ArkerError;
use async_trait::async_trait;
use chromiumoxide::page::ScreenshotParams;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::ImageEncoder;

use crate::contract::{ArchiveContext, ArchiveOutput, ArchiveResult, Archiver};

const VIEWPORT_WIDTH: u32 = 1500;
const VIEWPORT_HEIGHT: u32 = 1080;
const DEVICE_SCALE_FACTOR: f64 = 2.0;
const TALL_PAGE_THRESHOLD: u32 = 16383;
const JPEG_QUALITY: u8 = 85;

pub struct ScreenshotArchiver {
    pub tracker_hosts: Arc<HashSet<String>>,
}

#[async_trait]
impl Archiver for ScreenshotArchiver {
    async fn archive(&self, ctx: ArchiveContext) -> ArchiveResult {
        let bundle = Arc::new(BrowserBundle::new(ctx.upstream_proxy.clone()));
        bundle
            .create_browser()
            .await
            .map_err(|e| ArkerError::Transient(e.to_string()))?;
        bundle
            .create_page(
                &ctx.url,
                PageOptions {
                    width: VIEWPORT_WIDTH,
                    height: VIEWPORT_HEIGHT,
                    device_scale_factor: DEVICE_SCALE_FACTOR,
                },
            )
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
        match page_ready::run(&page, &ctx.url, &opts, &ctx.cancel).await {
            Ok(()) => {}
            Err(arker_browser::BrowserError::Cancelled) => return Err(ArkerError::Cancelled),
            Err(e) => ctx.log(format!("page-ready error, screenshotting anyway: {e}")).await,
        }

        // Page-ready's scroll pass settles back to top, but re-assert it:
        // full-page capture must start from a known scroll offset.
        page.evaluate("window.scrollTo(0, 0);")
            .await
            .map_err(|e| ArkerError::Transient(e.to_string()))?;

        let png_bytes = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(|e| ArkerError::Transient(e.to_string()))?;

        if ctx.cancel.is_cancelled() {
            return Err(ArkerError::Cancelled);
        }

        let decoded = image::load_from_memory(&png_bytes)
            .map_err(|e| ArkerError::Transient(format!("screenshot decode failed: {e}")))?;
        let height = decoded.height();

        let mut encoded = Vec::new();
        let (extension, mime_type) = if height > TALL_PAGE_THRESHOLD {
            JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
                .write_image(
                    decoded.to_rgb8().as_raw(),
                    decoded.width(),
                    decoded.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(|e| ArkerError::Transient(format!("jpeg encode failed: {e}")))?;
            (".jpg", "image/jpeg")
        } else {
            WebPEncoder::new_lossless(&mut encoded)
                .write_image(
                    decoded.to_rgba8().as_raw(),
                    decoded.width(),
                    decoded.height(),
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(|e| ArkerError::Transient(format!("webp encode failed: {e}")))?;
            (".webp", "image/webp")
        };

        Ok(ArchiveOutput {
            stream: Box::new(Cursor::new(encoded)),
            extension: extension.to_string(),
            mime_type: mime_type.to_string(),
            bundle: Some(bundle),
            closer: None,
        })
    }
}
