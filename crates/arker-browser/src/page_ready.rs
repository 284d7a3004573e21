//! The "page is ready" wait (spec §4.4), shared by the HTML-snapshot and
//! screenshot archivers: navigate, force determinism, wait for network
//! idle with a tracker-aware tolerance, optionally scroll to trigger
//! lazy content, then a best-effort media-loaded check.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BrowserError, Result};

const DISABLE_ANIMATIONS_CSS: &str = r#"
*, *::before, *::after {
  transition-duration: 0s !important;
  animation-duration: 0s !important;
  animation-delay: 0s !important;
  scroll-behavior: auto !important;
}
"#;

const FORCE_EAGER_LAZY_IMAGES_JS: &str = r#"
(() => {
  const DATA_SRC_ATTRS = ['data-src', 'data-lazy-src', 'data-original'];
  for (const img of document.querySelectorAll('img[loading="lazy"]')) {
    img.loading = 'eager';
  }
  for (const img of document.querySelectorAll('img')) {
    for (const attr of DATA_SRC_ATTRS) {
      const v = img.getAttribute(attr);
      if (v && !img.src) img.src = v;
    }
  }
})();
"#;

const SCROLL_STEP_JS: &str = r#"
(() => { window.scrollBy(0, window.innerHeight * 0.8); return document.body.scrollHeight; })();
"#;

const SCROLL_TOP_JS: &str = "window.scrollTo(0, 0);";

const MEDIA_CHECK_JS: &str = r#"
(() => {
  for (const img of document.querySelectorAll('img')) {
    if (img.src && !(img.complete && img.naturalWidth > 0)) return false;
  }
  for (const video of document.querySelectorAll('video')) {
    if (video.readyState < 2) return false;
  }
  return true;
})();
"#;

#[derive(Debug, Clone)]
pub struct PageReadyOptions {
    pub navigation_timeout: Duration,
    pub idle_ms: u64,
    pub min_wait_ms: u64,
    pub fallback_ms: u64,
    pub total_ms: u64,
    pub media_check_timeout: Duration,
    pub scroll: bool,
    pub tracker_hosts: Arc<HashSet<String>>,
}

impl Default for PageReadyOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            idle_ms: 2000,
            min_wait_ms: 5000,
            fallback_ms: 15000,
            total_ms: 20000,
            media_check_timeout: Duration::from_secs(10),
            scroll: true,
            tracker_hosts: Arc::new(HashSet::new()),
        }
    }
}

pub async fn run(
    page: &Page,
    url: &str,
    opts: &PageReadyOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    navigate(page, url, opts.navigation_timeout, cancel).await?;
    inject_determinism(page).await?;
    force_eager_lazy_images(page).await?;
    wait_network_idle(page, opts, cancel).await?;
    if opts.scroll {
        scroll_pass(page, cancel).await?;
    }
    final_media_check(page, opts.media_check_timeout, cancel).await;
    Ok(())
}

async fn navigate(
    page: &Page,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let goto = page.goto(url);
    let navigated = tokio::select! {
        _ = cancel.cancelled() => return Err(BrowserError::Cancelled),
        r = tokio::time::timeout(timeout, goto) => r,
    };
    match navigated {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(BrowserError::TimedOut),
    }
}

async fn inject_determinism(page: &Page) -> Result<()> {
    page.evaluate(format!(
        "(() => {{ const s = document.createElement('style'); s.textContent = `{DISABLE_ANIMATIONS_CSS}`; document.head.appendChild(s); }})();"
    ))
    .await?;
    Ok(())
}

async fn force_eager_lazy_images(page: &Page) -> Result<()> {
    page.evaluate(FORCE_EAGER_LAZY_IMAGES_JS).await?;
    Ok(())
}

/// Custom network-idle wait with resilience (spec §4.4 step 4).
async fn wait_network_idle(
    page: &Page,
    opts: &PageReadyOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let in_flight: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let tracker_hosts = opts.tracker_hosts.clone();

    let mut started = page
        .event_listener::<EventRequestWillBeSent>()
        .await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;

    let tracker = tracker_hosts.clone();
    let started_map = in_flight.clone();
    let started_task = tokio::spawn(async move {
        while let Some(event) = started.next().await {
            let host = request_host(&event.request.url);
            if tracker.contains(&host) {
                continue;
            }
            started_map
                .lock()
                .expect("in-flight mutex poisoned")
                .insert(event.request_id.inner().to_string(), host);
        }
    });
    let finished_map = in_flight.clone();
    let finished_task = tokio::spawn(async move {
        while let Some(event) = finished.next().await {
            finished_map
                .lock()
                .expect("in-flight mutex poisoned")
                .remove(event.request_id.inner());
        }
    });
    let failed_map = in_flight.clone();
    let failed_task = tokio::spawn(async move {
        while let Some(event) = failed.next().await {
            failed_map
                .lock()
                .expect("in-flight mutex poisoned")
                .remove(event.request_id.inner());
        }
    });

    let result = poll_idle(&in_flight, opts, cancel).await;

    started_task.abort();
    finished_task.abort();
    failed_task.abort();

    result
}

async fn poll_idle(
    in_flight: &Arc<Mutex<HashMap<String, String>>>,
    opts: &PageReadyOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let tick = Duration::from_millis(100);
    let start = tokio::time::Instant::now();
    let mut idle_since: Option<tokio::time::Instant> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(BrowserError::Cancelled);
        }
        let elapsed = start.elapsed();
        let count = in_flight.lock().expect("in-flight mutex poisoned").len();

        if count == 0 {
            let since = *idle_since.get_or_insert_with(tokio::time::Instant::now);
            if since.elapsed() >= Duration::from_millis(opts.idle_ms) {
                return Ok(());
            }
        } else {
            idle_since = None;
        }

        if elapsed >= Duration::from_millis(opts.min_wait_ms) && count <= 3 {
            return Ok(());
        }

        if elapsed >= Duration::from_millis(opts.fallback_ms) {
            warn!(in_flight = count, "network-idle fallback accepted late");
            return Ok(());
        }

        if elapsed >= Duration::from_millis(opts.total_ms) {
            return Err(BrowserError::TimedOut);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(BrowserError::Cancelled),
            _ = tokio::time::sleep(tick) => {}
        }
    }
}

fn request_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

/// Step-scroll in 0.8x viewport increments until scroll height is stable
/// for five consecutive steps, then settle back to top (spec §4.4 step 5).
async fn scroll_pass(page: &Page, cancel: &CancellationToken) -> Result<()> {
    let mut last_height: Option<i64> = None;
    let mut stable_count = 0;
    let max_steps = 200;

    for _ in 0..max_steps {
        if cancel.is_cancelled() {
            return Err(BrowserError::Cancelled);
        }
        let height: serde_json::Value = page
            .evaluate(SCROLL_STEP_JS)
            .await?
            .into_value()
            .map_err(|_| BrowserError::TimedOut)?;
        let height = height.as_i64().unwrap_or(0);

        if Some(height) == last_height {
            stable_count += 1;
        } else {
            stable_count = 0;
        }
        last_height = Some(height);

        if stable_count >= 5 {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(BrowserError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }

    page.evaluate(SCROLL_TOP_JS).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

/// Require every `<img>` complete with nonzero width and every `<video>`
/// at `readyState >= 2`; warn-and-continue on failure (spec §4.4 step 6).
async fn final_media_check(page: &Page, timeout: Duration, cancel: &CancellationToken) {
    let check = page.evaluate(MEDIA_CHECK_JS);
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return,
        r = tokio::time::timeout(timeout, check) => r,
    };
    match outcome {
        Ok(Ok(value)) => {
            let ready = value
                .into_value::<bool>()
                .unwrap_or(false);
            if !ready {
                warn!("final media check failed, continuing anyway");
            } else {
                info!("final media check passed");
            }
        }
        Ok(Err(e)) => warn!(error = %e, "final media check errored, continuing anyway"),
        Err(_) => warn!("final media check timed out, continuing anyway"),
    }
}
