//! Network interception surfaces.
//!
//! A surface is one request-issuing primitive of the host (a
//! request-with-callback object, a promise-returning fetch, a buffered media
//! source, a player library). The detector installs every registered surface
//! with a [`NetworkTap`]; the surface reports what it observes through the
//! tap and follows the decisions it returns.

mod passive;
mod tap;

pub use passive::PassiveSurface;
pub use tap::NetworkTap;

use crate::types::{Result, ScoutError};
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Kind of request-issuing primitive a surface wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// `open` / `send` / completion callback style requests.
    RequestCallback,
    /// Promise-returning fetch.
    Fetch,
    /// Buffered media source and object URLs.
    MediaSource,
    /// Player library source assignments.
    Player,
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestCallback => "request-callback",
            Self::Fetch => "fetch",
            Self::MediaSource => "media-source",
            Self::Player => "player",
        };
        f.write_str(name)
    }
}

/// One interceptable primitive, installed and removed by the detector.
pub trait InterceptSurface: Send + Sync {
    fn kind(&self) -> SurfaceKind;

    /// Start routing observations through `tap`.
    fn install(&self, tap: NetworkTap) -> Result<()>;

    /// Restore the unwrapped primitive. Must be safe to call when not installed.
    fn uninstall(&self);
}

/// Host-assigned identity of a request-with-callback object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// What a request-with-callback surface should do on `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendDecision {
    /// Let the underlying request go out.
    #[default]
    Proceed,
    /// Complete the request locally without network activity.
    CompleteSynthetically,
}

/// What a fetch surface should do before issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchDecision {
    #[default]
    Proceed,
    /// Resolve with an empty successful response instead.
    RespondEmpty,
}

/// Completed request-with-callback response.
#[derive(Debug, Clone, Default)]
pub struct CompletedResponse {
    /// Final response URL after redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Option<String>,
}

/// Future resolving to a cloned response body.
pub type BodyFuture = BoxFuture<'static, Result<String>>;

/// Response of a fetch surface. The body is read from a clone, so the
/// caller's response is never consumed.
pub struct FetchResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Option<BodyFuture>,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// MIME types accepted for source buffers of `pattern`.
pub fn media_mime_types(pattern: &str) -> &'static [&'static str] {
    match pattern.to_ascii_lowercase().as_str() {
        "m3u8" => &["application/x-mpegurl", "application/vnd.apple.mpegurl"],
        "flv" => &[
            "video/x-flv",
            "application/x-flv",
            "flv-application/octet-stream",
        ],
        "mp4" => &["video/mp4", "application/mp4"],
        "mpd" => &["application/dash+xml"],
        _ => &[],
    }
}

/// Whether a source buffer MIME type (parameters ignored) belongs to `pattern`.
pub fn is_media_mime(pattern: &str, mime: &str) -> bool {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_mime_types(pattern).contains(&essence.as_str())
}

/// Content types whose completed bodies are inspected.
pub fn is_textual(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type.map(str::to_ascii_lowercase) else {
        return true;
    };
    ct.is_empty()
        || ct.starts_with("text/")
        || ct.contains("json")
        || ct.contains("javascript")
        || ct.contains("xml")
        || ct.contains("mpegurl")
}

/// Content types whose fetch bodies are cloned and inspected.
pub fn is_fetch_extractable(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type.map(str::to_ascii_lowercase) else {
        return false;
    };
    ct.contains("json")
        || ct.contains("mpegurl")
        || ct.contains("dash+xml")
        || ct.starts_with("text/plain")
}

/// Whether a content type denotes JSON.
pub fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
}

/// Run `f`, converting a panic into an error.
pub(crate) fn isolated<T>(f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| ScoutError::Panicked(panic_message(payload)))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_mime_allow_list() {
        assert!(is_media_mime("m3u8", "application/vnd.apple.mpegURL"));
        assert!(is_media_mime("M3U8", "application/x-mpegURL; codecs=\"avc1\""));
        assert!(is_media_mime("flv", "flv-application/octet-stream"));
        assert!(!is_media_mime("m3u8", "video/mp4"));
        assert!(!is_media_mime("webm", "video/webm"));
    }

    #[test]
    fn test_content_type_classes() {
        assert!(is_textual(None));
        assert!(is_textual(Some("application/vnd.apple.mpegurl")));
        assert!(!is_textual(Some("video/mp2t")));

        assert!(is_fetch_extractable(Some("application/json; charset=utf-8")));
        assert!(is_fetch_extractable(Some("application/dash+xml")));
        assert!(!is_fetch_extractable(Some("text/html")));
        assert!(!is_fetch_extractable(None));
        assert!(is_json(Some("Application/JSON")));
    }

    #[test]
    fn test_isolated_contains_panics() {
        assert_eq!(isolated(|| 7).unwrap(), 7);
        let err = isolated(|| -> u8 { panic!("boom") }).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
