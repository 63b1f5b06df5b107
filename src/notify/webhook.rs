//! Webhook delivery of reports.

use super::ReportChannel;
use crate::types::{Report, Result, ScoutError};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// Webhook request body.
#[derive(Serialize)]
struct WebhookPayload<'a> {
    target: &'a str,
    #[serde(flatten)]
    report: &'a Report,
}

/// Check that `endpoint` is an absolute http(s) URL.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    match Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ScoutError::ConfigError(format!(
            "webhook endpoint must be an http(s) URL: {}",
            endpoint
        ))),
    }
}

/// Posts every report as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
    target: String,
}

impl WebhookNotifier {
    /// Create a new webhook notifier for reports about `target`.
    pub fn new(endpoint: &str, target: &str) -> Result<Self> {
        validate_endpoint(endpoint)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            target: target.to_string(),
        })
    }

    /// Send one report.
    pub async fn send_report(&self, report: &Report) -> Result<()> {
        let body = WebhookPayload {
            target: &self.target,
            report,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            debug!("Webhook report delivered");
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Webhook rejected report ({}): {}", status, error_text);
            Err(ScoutError::WebhookError(format!("{}: {}", status, error_text)))
        }
    }
}

impl ReportChannel for WebhookNotifier {
    fn post_message(&self, report: Report) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, dropping webhook report");
            return;
        };

        let notifier = self.clone();
        handle.spawn(async move {
            if let Err(e) = notifier.send_report(&report).await {
                warn!("Webhook delivery failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceTag;

    #[test]
    fn test_rejects_non_http_endpoint() {
        assert!(WebhookNotifier::new("ftp://hooks.example.com", "https://a/").is_err());
        assert!(WebhookNotifier::new("https://hooks.example.com/x", "https://a/").is_ok());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("https://hooks.example.com/x").is_ok());
        assert!(validate_endpoint("http://127.0.0.1:8080/hook").is_ok());
        assert!(validate_endpoint("ftp://hooks.example.com").is_err());
        assert!(validate_endpoint("hooks.example.com/x").is_err());
        assert!(validate_endpoint("").is_err());
    }

    #[test]
    fn test_payload_shape() {
        let report = Report::url("https://a/x.m3u8".into(), SourceTag::Anchor);
        let payload = WebhookPayload {
            target: "https://a/",
            report: &report,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["target"], "https://a/");
        assert_eq!(json["type"], "url");
        assert_eq!(json["details"]["source"], "anchor");
    }

    #[test]
    fn test_post_without_runtime_is_dropped() {
        let notifier = WebhookNotifier::new("https://hooks.example.com/x", "https://a/").unwrap();
        notifier.post_message(Report::url("https://a/x.m3u8".into(), SourceTag::Anchor));
    }
}
