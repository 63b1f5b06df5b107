//! Core types and errors for the media detector.

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors that can occur while detecting media resources.
#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to install {surface} interceptor: {reason}")]
    InstallError { surface: String, reason: String },

    #[error("Response body unavailable: {0}")]
    BodyError(String),

    #[error("Webhook delivery failed: {0}")]
    WebhookError(String),

    #[error("Interception panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, ScoutError>;

/// Where a candidate string was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceTag {
    /// URL of an outgoing request.
    NetworkRequest,
    /// Final URL of a completed response.
    NetworkResponse,
    /// Free text of a response body.
    ResponseBody,
    /// String found while walking a JSON body, with its path.
    JsonPath(String),
    /// Value of a named element attribute.
    DomAttribute(String),
    /// `src`, `currentSrc` or a child `<source>` of a media element.
    MediaSrc,
    /// Resolved source of a media element fed by a media source object.
    MediaSourceElement,
    /// URL associated with a media source buffer.
    MediaSource,
    /// `href` of an anchor.
    Anchor,
    /// Value of a `data-*` attribute seen during a full scan.
    DataAttribute(String),
    /// Inline script text.
    ScriptText,
    /// String drained from the mutation queue.
    Mutation,
    /// Fast-path attribute change.
    AttributeChange,
    /// Assignment through a hooked `src` property.
    SrcSetter,
    /// The document's own location.
    DocumentLocation,
    /// Source handed to a player library.
    Player(String),
    /// Text decoded from a base64 data URL.
    Base64(Box<SourceTag>),
}

impl SourceTag {
    /// Whether the tag points at network traffic rather than the DOM.
    pub fn is_network(&self) -> bool {
        match self {
            Self::NetworkRequest
            | Self::NetworkResponse
            | Self::ResponseBody
            | Self::JsonPath(_)
            | Self::MediaSource => true,
            Self::Base64(inner) => inner.is_network(),
            _ => false,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkRequest => f.write_str("network-request"),
            Self::NetworkResponse => f.write_str("network-response"),
            Self::ResponseBody => f.write_str("response-body"),
            Self::JsonPath(path) => write!(f, "json-path:{}", path),
            Self::DomAttribute(name) => write!(f, "dom-attribute:{}", name),
            Self::MediaSrc => f.write_str("media-src"),
            Self::MediaSourceElement => f.write_str("media-source-element"),
            Self::MediaSource => f.write_str("media-source"),
            Self::Anchor => f.write_str("anchor"),
            Self::DataAttribute(name) => write!(f, "data-attribute:{}", name),
            Self::ScriptText => f.write_str("script-text"),
            Self::Mutation => f.write_str("mutation"),
            Self::AttributeChange => f.write_str("attribute-change"),
            Self::SrcSetter => f.write_str("src-setter"),
            Self::DocumentLocation => f.write_str("document-location"),
            Self::Player(api) => write!(f, "player:{}", api),
            Self::Base64(inner) => write!(f, "base64:{}", inner),
        }
    }
}

impl Serialize for SourceTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An unverified string suspected of being a media URL.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The raw value as discovered.
    pub value: String,
    /// Where it was discovered.
    pub source: SourceTag,
    /// Base for relative resolution; the document location when `None`.
    pub base: Option<Url>,
    /// Nesting level of encoded payloads this value came out of.
    pub depth: u8,
}

impl Candidate {
    pub fn new(value: impl Into<String>, source: SourceTag) -> Self {
        Self {
            value: value.into(),
            source,
            base: None,
            depth: 0,
        }
    }

    pub fn with_base(mut self, base: Option<Url>) -> Self {
        self.base = base;
        self
    }

    pub fn with_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }
}

/// Kind of a contained failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Malformed URL, JSON or encoded payload.
    Parse,
    /// Failure while wrapping or inside a wrapped request primitive.
    Interception,
    /// Failure while handling document events.
    Observer,
    /// Failure inside a scheduled scan tick.
    Scheduler,
}

/// A contained failure. Only critical records reach the report channel.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub context: String,
    pub error: String,
    pub critical: bool,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, context: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            kind,
            context: context.into(),
            error: error.to_string(),
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Report type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Url,
    Error,
}

/// Structured details attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReportDetails {
    Url { url: String, source: SourceTag },
    Error { context: String, error: String },
}

/// Payload posted to a report channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    #[serde(rename = "type")]
    pub kind: ReportKind,
    pub message: String,
    pub details: ReportDetails,
}

impl Report {
    /// A newly detected media URL.
    pub fn url(url: String, source: SourceTag) -> Self {
        Self {
            kind: ReportKind::Url,
            message: format!("Media resource detected via {}", source),
            details: ReportDetails::Url { url, source },
        }
    }

    /// A critical failure.
    pub fn error(record: &ErrorRecord) -> Self {
        Self {
            kind: ReportKind::Error,
            message: format!("Detector failure in {}", record.context),
            details: ReportDetails::Error {
                context: record.context.clone(),
                error: record.error.clone(),
            },
        }
    }

    /// The detected URL, if this is a URL report.
    pub fn detected_url(&self) -> Option<&str> {
        match &self.details {
            ReportDetails::Url { url, .. } => Some(url),
            ReportDetails::Error { .. } => None,
        }
    }
}

/// A URL found during a scan session.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedUrl {
    pub url: String,
    pub source: String,
}

/// Complete result for one scanned target.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    /// Target URL that was scanned.
    pub target: String,
    /// Resource pattern in effect.
    pub pattern: String,
    /// Detected media URLs in report order.
    pub urls: Vec<DetectedUrl>,
    /// Scan duration in seconds.
    pub duration_secs: f64,
    /// Any errors encountered during the session.
    pub errors: Vec<String>,
}

/// Configuration for HTTP requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            user_agent: "Mozilla/5.0 (compatible; mediascout/0.1)".to_string(),
        }
    }
}
