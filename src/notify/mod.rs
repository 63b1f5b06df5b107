//! Report channels.
//!
//! This module handles:
//! - The [`ReportChannel`] sink the detector posts to
//! - Colored console output
//! - Webhook delivery
//! - In-memory collection for sessions and tests

pub mod console;
pub mod webhook;

pub use console::ConsoleOutput;
pub use webhook::{validate_endpoint, WebhookNotifier};

use crate::lock;
use crate::types::{Report, ReportKind};
use std::sync::{Arc, Mutex};

/// External sink for detection and error reports.
///
/// Called after the detector released its locks, so implementations may
/// call back into the detector.
pub trait ReportChannel: Send + Sync {
    fn post_message(&self, report: Report);
}

/// Collects reports in memory.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    reports: Mutex<Vec<Report>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report received so far, in order.
    pub fn reports(&self) -> Vec<Report> {
        lock(&self.reports).clone()
    }

    /// URLs of the URL reports received so far.
    pub fn urls(&self) -> Vec<String> {
        lock(&self.reports)
            .iter()
            .filter_map(|r| r.detected_url().map(str::to_string))
            .collect()
    }

    /// Error reports received so far.
    pub fn errors(&self) -> Vec<Report> {
        lock(&self.reports)
            .iter()
            .filter(|r| r.kind == ReportKind::Error)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.reports).clear();
    }
}

impl ReportChannel for MemoryChannel {
    fn post_message(&self, report: Report) {
        lock(&self.reports).push(report);
    }
}

/// Forwards every report to several channels.
#[derive(Default)]
pub struct Fanout {
    channels: Vec<Arc<dyn ReportChannel>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: Arc<dyn ReportChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl ReportChannel for Fanout {
    fn post_message(&self, report: Report) {
        for channel in &self.channels {
            channel.post_message(report.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, ErrorRecord, SourceTag};

    #[test]
    fn test_memory_channel() {
        let channel = MemoryChannel::new();
        channel.post_message(Report::url("https://a/x.m3u8".into(), SourceTag::Anchor));
        channel.post_message(Report::error(
            &ErrorRecord::new(ErrorKind::Interception, "install:fetch", "boom").critical(),
        ));

        assert_eq!(channel.urls(), vec!["https://a/x.m3u8"]);
        assert_eq!(channel.errors().len(), 1);
        assert_eq!(channel.reports().len(), 2);
        channel.clear();
        assert!(channel.reports().is_empty());
    }

    #[test]
    fn test_fanout() {
        let a = Arc::new(MemoryChannel::new());
        let b = Arc::new(MemoryChannel::new());
        let fanout = Fanout::new().with(a.clone()).with(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.post_message(Report::url("https://a/x.m3u8".into(), SourceTag::Anchor));
        assert_eq!(a.urls(), b.urls());
        assert_eq!(a.urls().len(), 1);
    }
}
