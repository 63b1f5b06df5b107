//! Static page fetcher with retry support.

use crate::types::{HttpConfig, Result, ScoutError};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A page retrieved over plain HTTP.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// Fetcher for target pages.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    config: HttpConfig,
}

impl PageFetcher {
    /// Create a new page fetcher.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    /// Fetch a page, retrying server and network errors.
    ///
    /// Client errors (4xx) fail immediately.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let mut retries = 0;

        loop {
            let err = match self.do_fetch(url).await {
                Ok(page) => {
                    debug!("Fetched page: {} ({} bytes)", page.url, page.body.len());
                    return Ok(page);
                }
                Err(e) => e,
            };

            if !should_retry(&err) {
                debug!("Not retrying {} - client error", url);
                return Err(err);
            }

            retries += 1;
            if retries > self.config.max_retries {
                if retries > 1 {
                    warn!("Failed to fetch {} after {} retries: {}", url, retries - 1, err);
                }
                return Err(err);
            }

            trace!("Retry {} for {}", retries, url);
            tokio::time::sleep(Duration::from_millis(500 * u64::from(retries))).await;
        }
    }

    async fn do_fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(FetchedPage {
            url: final_url,
            content_type,
            body,
        })
    }
}

/// Whether a failed fetch may succeed on retry.
fn should_retry(err: &ScoutError) -> bool {
    match err {
        ScoutError::HttpError(http_err) => http_err
            .status()
            .map_or(true, |status| !status.is_client_error()),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        let fetcher = PageFetcher::new(HttpConfig::default());
        assert!(fetcher.is_ok());
    }

    #[test]
    fn test_non_http_errors_are_retried() {
        let err = ScoutError::BodyError("connection reset".to_string());
        assert!(should_retry(&err));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_retry_delay() {
        let fetcher = PageFetcher::new(HttpConfig {
            max_retries: 0,
            ..HttpConfig::default()
        })
        .unwrap();
        assert!(fetcher.fetch("not a url").await.is_err());
    }
}
