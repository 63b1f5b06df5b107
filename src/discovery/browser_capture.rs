//! Live page capture using the Chrome DevTools Protocol.
//!
//! A headless Chromium loads the target while its network events are
//! forwarded into a [`PassiveSurface`] and the rendered markup is loaded into
//! the monitored document.
//!
//! Requires: Chrome or Chromium browser installed (or `mediascout setup`)

use crate::browser::ChromeInstall;
use crate::dom::{html, SharedDocument};
use crate::intercept::{BodyFuture, PassiveSurface};
use crate::lock;
use crate::types::{Result, ScoutError};
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Counter for generating unique browser profile directories
static BROWSER_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

const QUIET_CHECK: Duration = Duration::from_millis(500);
const QUIET_CHECKS: u32 = 3;

/// Browser-based network capture.
#[derive(Debug, Clone)]
pub struct BrowserCapture {
    /// Timeout for page load in seconds
    timeout_secs: u64,
    headless: bool,
    /// Explicit path to Chrome/Chromium executable
    chrome_executable: Option<PathBuf>,
}

impl BrowserCapture {
    pub fn new(timeout_secs: u64, headless: bool) -> Self {
        Self {
            timeout_secs,
            headless,
            chrome_executable: None,
        }
    }

    /// Set an explicit Chrome/Chromium executable path.
    pub fn with_chrome_executable(mut self, path: Option<PathBuf>) -> Self {
        self.chrome_executable = path;
        self
    }

    fn build_browser_config(&self, temp_dir: &Path, chrome_exe: Option<&Path>) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder().user_data_dir(temp_dir);

        if let Some(exe) = chrome_exe {
            builder = builder.chrome_executable(exe);
        }
        if !self.headless {
            builder = builder.with_head();
        }

        builder
            .no_sandbox()
            .viewport(None)
            .build()
            .map_err(|e| ScoutError::ConfigError(format!("Failed to build browser config: {}", e)))
    }

    /// Launch a browser, downloading Chromium when none is available.
    async fn launch_browser(
        &self,
        temp_dir: &Path,
    ) -> Result<(
        Browser,
        impl futures::Stream<Item = std::result::Result<(), chromiumoxide::error::CdpError>>,
    )> {
        // explicit path > previously downloaded > system Chrome
        let chrome_exe = self
            .chrome_executable
            .clone()
            .or_else(crate::browser::installed_executable);

        let launch_result = match self.build_browser_config(temp_dir, chrome_exe.as_deref()) {
            Ok(config) => Browser::launch(config).await,
            Err(e) => Err(chromiumoxide::error::CdpError::msg(e.to_string())),
        };

        match (launch_result, chrome_exe) {
            (Ok(pair), _) => Ok(pair),
            (Err(e), Some(exe)) => Err(ScoutError::BrowserError(format!(
                "Failed to launch browser with Chrome at {:?}: {}",
                exe, e
            ))),
            (Err(_), None) => {
                warn!("Chrome not found, downloading Chromium automatically... (run `mediascout setup` to pre-install)");
                let exe = ChromeInstall::managed()?.install(false).await?;

                let config = self.build_browser_config(temp_dir, Some(&exe))?;
                Browser::launch(config).await.map_err(|e| {
                    ScoutError::BrowserError(format!(
                        "Failed to launch browser even after downloading Chromium: {}",
                        e
                    ))
                })
            }
        }
    }

    /// Load `url`, forwarding its traffic into `surface` and its rendered
    /// markup into `document`, then keep observing for up to `settle`.
    pub async fn capture(
        &self,
        url: &str,
        surface: Arc<PassiveSurface>,
        document: SharedDocument,
        settle: Duration,
    ) -> Result<()> {
        info!("Capturing with browser: {}", url);

        let instance_id = BROWSER_INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_dir = std::env::temp_dir().join(format!(
            "mediascout-browser-{}-{}",
            std::process::id(),
            instance_id
        ));
        if let Err(e) = std::fs::create_dir_all(&temp_dir) {
            debug!("Failed to create temp dir {:?}: {}", temp_dir, e);
        }

        let (browser, mut handler) = self.launch_browser(&temp_dir).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        // Hard timeout on top of the navigation timeout to prevent hangs
        let page_timeout = Duration::from_secs(self.timeout_secs + 15) + settle;
        let result = match tokio::time::timeout(
            page_timeout,
            self.capture_page(&browser, url, surface, document, settle),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => {
                warn!("Hard timeout after {}s for {}, skipping", page_timeout.as_secs(), url);
                Ok(())
            }
        };

        drop(browser);
        handler_task.abort();

        tokio::spawn(async move {
            // Give the browser time to exit before removing its profile
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Err(e) = std::fs::remove_dir_all(&temp_dir) {
                debug!("Failed to cleanup temp dir {:?}: {}", temp_dir, e);
            }
        });

        result
    }

    async fn capture_page(
        &self,
        browser: &Browser,
        url: &str,
        surface: Arc<PassiveSurface>,
        document: SharedDocument,
        settle: Duration,
    ) -> Result<()> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScoutError::BrowserError(format!("Failed to create page: {}", e)))?;

        let events = Arc::new(AtomicUsize::new(0));
        let forwarders = forward_network_events(&page, surface, events.clone()).await?;

        debug!("Navigating to: {}", url);
        let navigate_result =
            tokio::time::timeout(Duration::from_secs(self.timeout_secs), page.goto(url)).await;
        match navigate_result {
            Ok(Ok(_)) => debug!("Navigation completed"),
            Ok(Err(e)) => warn!("Navigation error (continuing): {}", e),
            Err(_) => warn!("Navigation timeout (continuing with captured traffic)"),
        }

        load_rendered_dom(&page, &document).await;

        // Adaptive wait: stop early once the network has been quiet for a while
        let max_checks = (settle.as_millis() / QUIET_CHECK.as_millis()).max(1);
        let mut last_count = events.load(Ordering::Relaxed);
        let mut quiet = 0;
        for _ in 0..max_checks {
            tokio::time::sleep(QUIET_CHECK).await;

            let count = events.load(Ordering::Relaxed);
            if count == last_count {
                quiet += 1;
                if quiet >= QUIET_CHECKS {
                    debug!("No network activity for {:?}, stopping early", QUIET_CHECK * QUIET_CHECKS);
                    break;
                }
            } else {
                quiet = 0;
                last_count = count;
            }
        }

        for task in forwarders {
            task.abort();
        }

        info!("Observed {} network events on {}", events.load(Ordering::Relaxed), url);
        Ok(())
    }
}

impl Default for BrowserCapture {
    fn default() -> Self {
        Self::new(30, true)
    }
}

/// Subscribe to request and response events of `page` and feed them to
/// `surface`.
async fn forward_network_events(
    page: &Page,
    surface: Arc<PassiveSurface>,
    events: Arc<AtomicUsize>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| ScoutError::BrowserError(format!("Failed to set up event listener: {}", e)))?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| ScoutError::BrowserError(format!("Failed to set up event listener: {}", e)))?;

    let request_surface = surface.clone();
    let request_events = events.clone();
    let request_task = tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            request_events.fetch_add(1, Ordering::Relaxed);
            trace!("Request: {}", event.request.url);
            request_surface.request(&event.request.url);
        }
    });

    let page = page.clone();
    let response_task = tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            events.fetch_add(1, Ordering::Relaxed);
            let response = &event.response;
            trace!("Response: {} ({})", response.url, response.mime_type);

            let body = response_body(page.clone(), event.request_id.clone());
            surface.response(&response.url, Some(&response.mime_type), Some(body));
        }
    });

    Ok(vec![request_task, response_task])
}

/// Future reading a response body over the protocol.
fn response_body(page: Page, request_id: RequestId) -> BodyFuture {
    Box::pin(async move {
        let body = page
            .execute(GetResponseBodyParams::new(request_id))
            .await
            .map_err(|e| ScoutError::BodyError(e.to_string()))?;

        if body.base64_encoded {
            let decoded = base64::engine::general_purpose::STANDARD.decode(&body.body)?;
            Ok(String::from_utf8_lossy(&decoded).into_owned())
        } else {
            Ok(body.body.clone())
        }
    })
}

/// Copy the rendered markup of `page` into `document`.
async fn load_rendered_dom(page: &Page, document: &SharedDocument) {
    let markup = match page.content().await {
        Ok(markup) => markup,
        Err(e) => {
            warn!("Failed to read rendered page: {}", e);
            return;
        }
    };
    let location = page
        .url()
        .await
        .ok()
        .flatten()
        .and_then(|u| Url::parse(&u).ok());

    let mut doc = lock(document);
    if let Some(location) = location.filter(|l| l != doc.location()) {
        doc.navigate(location);
    }
    html::load_html(&mut doc, &markup);
    debug!("Loaded {} bytes of rendered markup", markup.len());
}
