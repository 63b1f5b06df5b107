//! Page loading for scan sessions.
//!
//! This module handles loading a target into the monitored document from:
//! - A static HTTP fetch (HTML parsed into the document)
//! - A headless browser session (live network events and rendered DOM)

pub mod browser_capture;
pub mod page_fetcher;

pub use browser_capture::BrowserCapture;
pub use page_fetcher::{FetchedPage, PageFetcher};
