//! Pattern state and the report dedup cache.
//!
//! The pattern registry owns every cache derived from the resource pattern
//! so a pattern change invalidates them together.

mod cache;
mod pattern;

pub use cache::SeenSet;
pub use pattern::PatternRegistry;
