//! mediascout - Media resource detection for web pages.
//!
//! This library finds URLs of a configurable media resource pattern (by
//! default HLS manifests, `.m3u8`) in a monitored document by:
//! - Observing request URLs and response bodies through interception surfaces
//! - Scanning document elements, attributes and inline scripts
//! - Batching document mutations and rescanning on a schedule
//!
//! Each normalized URL is reported once per detector lifetime.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediascout::dom::html;
//! use mediascout::notify::MemoryChannel;
//! use mediascout::Detector;
//!
//! #[tokio::main]
//! async fn main() {
//!     let page = r#"<video src="/live/index.m3u8"></video>"#;
//!     let document = html::from_html(page, "https://example.com/".parse().unwrap()).shared();
//!     let channel = Arc::new(MemoryChannel::new());
//!
//!     let detector = Detector::builder(document, channel.clone()).build();
//!     detector.initialize();
//!     println!("Found {:?}", channel.urls());
//! }
//! ```

pub mod config;
pub mod detector;
pub mod discovery;
pub mod dom;
pub mod extract;
pub mod intercept;
pub mod notify;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod types;

pub mod browser;

pub use config::{Commands, Config, DetectorConfig, ScanConfig, SetupConfig};
pub use detector::{Detector, DetectorBuilder, DetectorStats, Lifecycle};
pub use scanner::Scanner;
pub use types::{
    Candidate, DetectedUrl, ErrorKind, ErrorRecord, Report, ReportKind, Result, ScanResult,
    ScoutError, SourceTag,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
