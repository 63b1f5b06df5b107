//! Content extraction: URL normalization, free-text matching, bounded JSON
//! traversal and base64 data URL decoding.
//!
//! These are pure functions. The detector routes what they return through
//! the match test and the dedup cache.

pub mod decode;
pub mod json;
pub mod normalize;
pub mod text;

pub use decode::decode_data_url;
pub use json::{find_strings, JsonLimits, JsonMatch};
pub use normalize::normalize_url;
pub use text::{contains_ignore_case, find_urls};
