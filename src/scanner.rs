//! Scan sessions: one detector per target, observed for a settle window.

use crate::config::ScanConfig;
use crate::detector::Detector;
use crate::discovery::{BrowserCapture, FetchedPage, PageFetcher};
use crate::dom::{html, Document, SharedDocument};
use crate::intercept::{PassiveSurface, SurfaceKind};
use crate::notify::{
    validate_endpoint, ConsoleOutput, Fanout, MemoryChannel, ReportChannel, WebhookNotifier,
};
use crate::types::{DetectedUrl, ReportDetails, Result, ScanResult, ScoutError};
use futures::future;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

/// Runs scan sessions for a list of targets.
pub struct Scanner {
    config: ScanConfig,
    fetcher: PageFetcher,
    browser_capture: BrowserCapture,
    console: ConsoleOutput,
    webhook: Option<String>,
}

impl Scanner {
    /// Create a new scanner with the given configuration.
    pub fn new(config: ScanConfig, verbose: bool) -> Result<Self> {
        let fetcher = PageFetcher::new(config.http_config())?;
        let browser_capture = BrowserCapture::new(config.timeout, true)
            .with_chrome_executable(config.chrome_path.clone());

        let console = ConsoleOutput::new(verbose, config.json, config.quiet);

        Ok(Self {
            config,
            fetcher,
            browser_capture,
            console,
            webhook: None,
        })
    }

    /// Also post every report to a webhook endpoint.
    pub fn with_webhook(mut self, endpoint: &str) -> Result<Self> {
        validate_endpoint(endpoint)?;
        self.webhook = Some(endpoint.to_string());
        Ok(self)
    }

    /// Scan a single target URL.
    pub async fn scan(&self, target: &str) -> Result<ScanResult> {
        let start_time = Instant::now();
        self.console.print_scan_start(target);

        let location = Url::parse(target)?;
        let settle = Duration::from_secs(self.config.settle);
        let mut errors = Vec::new();

        let memory = Arc::new(MemoryChannel::new());
        let channel = self.channel(target, memory.clone())?;
        let surface = Arc::new(PassiveSurface::new(SurfaceKind::Fetch));

        if self.config.browser {
            let document = Document::new(location).shared();
            let detector = self.detector(&document, channel, &surface);

            self.console.print_progress("Launching browser to capture traffic...");
            let capture = self
                .browser_capture
                .capture(target, surface.clone(), document.clone(), settle);
            if let Err(e) = observe_capture(&detector, capture).await {
                errors.push(format!("Browser capture failed: {}", e));
            }
        } else {
            self.console.print_progress("Fetching page...");
            let page = match self.fetcher.fetch(target).await {
                Ok(page) => Some(page),
                Err(e) => {
                    errors.push(format!("Page fetch failed: {}", e));
                    None
                }
            };

            let document = match &page {
                Some(page) => page_document(page, location),
                None => Document::new(location),
            }
            .shared();
            let detector = self.detector(&document, channel, &surface);

            if let Some(page) = page {
                surface.request(target);
                replay_response(&surface, page);
            }
            tokio::time::sleep(settle).await;
            detector.dispose();
        }

        let result = collect_result(target, &self.config.pattern, &memory, errors, start_time);
        info!("Found {} media URLs on {}", result.urls.len(), target);
        self.console.print_summary(&result);
        Ok(result)
    }

    /// Scan multiple targets in order.
    pub async fn scan_multiple(&self, targets: Vec<String>) -> Vec<ScanResult> {
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            let result = match self.scan(&target).await {
                Ok(r) => r,
                Err(e) => ScanResult {
                    pattern: self.config.pattern.clone(),
                    target,
                    urls: vec![],
                    duration_secs: 0.0,
                    errors: vec![e.to_string()],
                },
            };
            results.push(result);
        }

        results
    }

    fn channel(&self, target: &str, memory: Arc<MemoryChannel>) -> Result<Arc<dyn ReportChannel>> {
        let mut fanout = Fanout::new()
            .with(memory)
            .with(Arc::new(self.console));

        if let Some(ref endpoint) = self.webhook {
            fanout = fanout.with(Arc::new(WebhookNotifier::new(endpoint, target)?));
        }

        Ok(Arc::new(fanout))
    }

    fn detector(
        &self,
        document: &SharedDocument,
        channel: Arc<dyn ReportChannel>,
        surface: &Arc<PassiveSurface>,
    ) -> Detector {
        let detector = Detector::builder(document.clone(), channel)
            .config(self.config.detector_config())
            .surface(surface.clone())
            .build();
        detector.initialize();
        detector
    }
}

/// Wait for `capture` to finish driving the document, then run the
/// detector's final pass.
async fn observe_capture<F>(detector: &Detector, capture: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let outcome = capture.await;
    detector.finish();
    outcome
}

/// Document for a statically fetched page. Markup is only parsed for HTML
/// responses.
fn page_document(page: &FetchedPage, location: Url) -> Document {
    let location = Url::parse(&page.url).unwrap_or(location);
    let is_html = page
        .content_type
        .as_deref()
        .map_or(true, |ct| ct.to_ascii_lowercase().contains("html"));

    if is_html {
        html::from_html(&page.body, location)
    } else {
        debug!("Not parsing {} as markup", page.url);
        Document::new(location)
    }
}

/// Feed a fetched page through `surface` as an observed response.
fn replay_response(surface: &PassiveSurface, page: FetchedPage) {
    let FetchedPage {
        url,
        content_type,
        body,
    } = page;
    surface.response(
        &url,
        content_type.as_deref(),
        Some(Box::pin(future::ready(Ok::<_, ScoutError>(body)))),
    );
}

/// Build the session result from the collected reports.
fn collect_result(
    target: &str,
    pattern: &str,
    memory: &MemoryChannel,
    mut errors: Vec<String>,
    start_time: Instant,
) -> ScanResult {
    let mut urls = Vec::new();
    for report in memory.reports() {
        match report.details {
            ReportDetails::Url { url, source } => urls.push(DetectedUrl {
                url,
                source: source.to_string(),
            }),
            ReportDetails::Error { context, error } => {
                errors.push(format!("{}: {}", context, error))
            }
        }
    }

    ScanResult {
        target: target.to_string(),
        pattern: pattern.to_string(),
        urls,
        duration_secs: start_time.elapsed().as_secs_f64(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, ErrorRecord, Report, SourceTag};

    fn page(url: &str, content_type: &str, body: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            content_type: Some(content_type.to_string()),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_collect_result_splits_reports() {
        let memory = MemoryChannel::new();
        memory.post_message(Report::url(
            "https://a.b/x.m3u8".to_string(),
            SourceTag::MediaSrc,
        ));
        memory.post_message(Report::error(
            &ErrorRecord::new(ErrorKind::Interception, "install:fetch", "boom").critical(),
        ));

        let result = collect_result(
            "https://a.b/",
            "m3u8",
            &memory,
            vec!["Page fetch failed".to_string()],
            Instant::now(),
        );

        assert_eq!(result.urls.len(), 1);
        assert_eq!(result.urls[0].source, "media-src");
        assert_eq!(result.errors, vec!["Page fetch failed", "install:fetch: boom"]);
    }

    #[test]
    fn test_page_document_follows_redirect() {
        let fetched = page(
            "https://www.a.b/watch",
            "text/html; charset=utf-8",
            r#"<video src="/live/index.m3u8"></video>"#,
        );
        let doc = page_document(&fetched, Url::parse("https://a.b/").unwrap());

        assert_eq!(doc.location().as_str(), "https://www.a.b/watch");
        let tags: Vec<&str> = doc.subtree(doc.root()).iter().map(|&id| doc.tag(id)).collect();
        assert_eq!(tags, vec!["html", "head", "body", "video"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_session_reports_markup_and_body() {
        let memory = Arc::new(MemoryChannel::new());
        let surface = Arc::new(PassiveSurface::new(SurfaceKind::Fetch));
        let location = Url::parse("https://a.b/").unwrap();

        let html_page = page(
            "https://a.b/",
            "text/html",
            r#"<video src="/vod/x.m3u8"></video>"#,
        );
        let document = page_document(&html_page, location).shared();
        let detector = Detector::builder(document, memory.clone())
            .surface(surface.clone())
            .build();
        assert!(detector.initialize());

        replay_response(
            &surface,
            page(
                "https://a.b/api/streams",
                "application/json",
                r#"{"streams":[{"hls":"https://cdn.a.b/live/index.m3u8"}]}"#,
            ),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let urls = memory.urls();
        assert!(urls.contains(&"https://a.b/vod/x.m3u8".to_string()));
        assert!(urls.contains(&"https://cdn.a.b/live/index.m3u8".to_string()));
        detector.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_session_reads_scripts_rendered_late() {
        let memory = Arc::new(MemoryChannel::new());
        let surface = Arc::new(PassiveSurface::new(SurfaceKind::Fetch));
        let document = Document::new(Url::parse("https://a.b/watch").unwrap()).shared();
        let detector = Detector::builder(document.clone(), memory.clone())
            .surface(surface.clone())
            .build();
        assert!(detector.initialize());

        let rendering = async {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            html::load_html(
                &mut crate::lock(&document),
                r#"<body><script>var u = "https://cdn.example.com/s/master.m3u8";</script></body>"#,
            );
            surface.request("https://cdn.example.com/s/player.js");
            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert!(memory.urls().is_empty());
            Ok(())
        };
        observe_capture(&detector, rendering).await.unwrap();

        let result = collect_result("https://a.b/watch", "m3u8", &memory, vec![], Instant::now());
        assert_eq!(result.urls.len(), 1);
        assert_eq!(result.urls[0].url, "https://cdn.example.com/s/master.m3u8");
        assert_eq!(result.urls[0].source, "script-text");
        assert_eq!(detector.lifecycle(), crate::detector::Lifecycle::Disposed);
    }

    #[test]
    fn test_invalid_webhook_rejected() {
        let scanner = Scanner::new(ScanConfig::default(), false).unwrap();
        assert!(scanner.with_webhook("ftp://example.com/hook").is_err());
    }
}
