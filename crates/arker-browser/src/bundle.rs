//! Scoped headless-browser acquisition (spec §4.3): every exit path,
//! including a panic mid-transition, releases every OS resource.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::CreateBrowserContextParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::{BrowserError, Result};
use crate::process_tree;

const CHROME_BINARY_HINT: &str = "chrom";

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-web-security",
];

#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            width: 1500,
            height: 1080,
            device_scale_factor: 1.0,
        }
    }
}

#[derive(Default)]
enum State {
    #[default]
    Fresh,
    BrowserCreated(BrowserHandle),
    PageCreated(BrowserHandle, PageHandle),
    Cleaned,
}

struct BrowserHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
    context_id: String,
    root_pid: Option<u32>,
}

struct PageHandle {
    page: Page,
    listener_removers: Vec<Box<dyn FnOnce() + Send>>,
}

/// A scoped browser + context + page. Obtain one per archive job; never
/// share across tasks (spec §5: "A browser bundle is *not* shared between
/// tasks").
pub struct BrowserBundle {
    state: Mutex<State>,
    upstream_proxy: Option<String>,
}

impl BrowserBundle {
    pub fn new(upstream_proxy: Option<String>) -> Self {
        Self {
            state: Mutex::new(State::Fresh),
            upstream_proxy,
        }
    }

    /// Launches a headless browser and opens one isolated context. If an
    /// upstream proxy is configured it is set at the context level, never
    /// via a command-line flag, so upstream auth is honored (spec §4.3).
    pub async fn create_browser(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !matches!(*state, State::Fresh) {
            return Err(BrowserError::WrongState);
        }

        let config = BrowserConfig::builder()
            .args(LAUNCH_ARGS.iter().map(|s| s.to_string()))
            .build()
            .map_err(|e| BrowserError::Cdp(chromiumoxide::error::CdpError::msg(e)))?;

        let (mut browser, mut handler) = Browser::launch(config).await?;
        let root_pid = browser.process_id();

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "browser handler event error");
                }
            }
        });

        let mut create_params = CreateBrowserContextParams::default();
        if let Some(proxy) = &self.upstream_proxy {
            create_params.proxy_server = Some(proxy.clone());
        }
        let context_id = browser
            .create_browser_context(create_params)
            .await?
            .to_string();

        *state = State::BrowserCreated(BrowserHandle {
            browser,
            handler_task,
            context_id,
            root_pid,
        });
        Ok(())
    }

    /// Opens one page in the bundle's context.
    pub async fn create_page(&self, url: &str, opts: PageOptions) -> Result<()> {
        let mut state = self.state.lock().await;
        let handle = match std::mem::replace(&mut *state, State::Cleaned) {
            State::BrowserCreated(h) => h,
            other @ (State::Fresh | State::PageCreated(..)) => {
                *state = other;
                return Err(BrowserError::WrongState);
            }
            State::Cleaned => return Err(BrowserError::Cleaned),
        };

        let page = match handle
            .browser
            .new_page_in_context(url, &handle.context_id)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                *state = State::BrowserCreated(handle);
                return Err(e.into());
            }
        };
        if let Err(e) = page
            .set_viewport(Viewport {
                width: opts.width,
                height: opts.height,
                device_scale_factor: Some(opts.device_scale_factor),
                ..Default::default()
            })
            .await
        {
            *state = State::BrowserCreated(handle);
            return Err(e.into());
        }

        *state = State::PageCreated(
            handle,
            PageHandle {
                page,
                listener_removers: Vec::new(),
            },
        );
        Ok(())
    }

    /// Records a teardown closure for a previously registered listener, run
    /// during cleanup before the context is closed.
    pub async fn record_listener_removal(&self, remover: Box<dyn FnOnce() + Send>) -> Result<()> {
        let mut state = self.state.lock().await;
        match &mut *state {
            State::PageCreated(_, page_handle) => {
                page_handle.listener_removers.push(remover);
                Ok(())
            }
            State::Cleaned => Err(BrowserError::Cleaned),
            _ => Err(BrowserError::WrongState),
        }
    }

    pub async fn page(&self) -> Result<Page> {
        let state = self.state.lock().await;
        match &*state {
            State::PageCreated(_, page_handle) => Ok(page_handle.page.clone()),
            State::Cleaned => Err(BrowserError::Cleaned),
            _ => Err(BrowserError::WrongState),
        }
    }

    /// Idempotent: first call runs the cleanup algorithm in strict order,
    /// further calls are no-ops.
    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, State::Cleaned);

        let (browser_handle, page_handle) = match previous {
            State::Fresh | State::Cleaned => return,
            State::BrowserCreated(b) => (b, None),
            State::PageCreated(b, p) => (b, Some(p)),
        };

        if let Some(mut page_handle) = page_handle {
            for remover in page_handle.listener_removers.drain(..) {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(remover)).is_err() {
                    error!("panic while removing browser event listener");
                }
            }
        }

        let mut browser_handle = browser_handle;

        if let Err(e) = browser_handle
            .browser
            .close_browser_context(browser_handle.context_id.clone())
            .await
        {
            warn!(error = %e, "failed to close browser context");
        }

        if let Err(e) = browser_handle.browser.close().await {
            warn!(error = %e, "failed to close browser");
        }
        if let Err(e) = browser_handle.browser.wait().await {
            warn!(error = %e, "failed to stop browser process");
        }
        browser_handle.handler_task.abort();

        let pids = browser_handle
            .root_pid
            .map(|root| process_tree::descendants_of(root, CHROME_BINARY_HINT))
            .unwrap_or_default();
        process_tree::sweep(&pids).await;
    }
}
