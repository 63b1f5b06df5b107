//! The active resource pattern and every cache derived from it.

use crate::config::DEFAULT_PATTERN;
use crate::dom::{ElementId, ElementSelector};
use regex::Regex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Characters that terminate a URL inside free text.
const URL_STOP_CHARS: &str = r#"\s'"<>()\[\]{},"#;

/// Whole-document selection kept for a short time.
#[derive(Debug, Clone)]
struct CachedSelection {
    elements: Vec<ElementId>,
    taken_at: Instant,
}

/// Holds the resource pattern and lazily built caches keyed by it.
#[derive(Debug)]
pub struct PatternRegistry {
    pattern: String,
    needle: String,
    match_regex: Option<Regex>,
    extract_regex: Option<Regex>,
    selector: Option<ElementSelector>,
    selection: Option<CachedSelection>,
}

impl PatternRegistry {
    /// Create a registry for `pattern`, falling back to the default when empty.
    pub fn new(pattern: &str) -> Self {
        let pattern = match pattern.trim() {
            "" => DEFAULT_PATTERN.to_string(),
            p => p.to_string(),
        };
        Self {
            needle: format!(".{}", pattern),
            pattern,
            match_regex: None,
            extract_regex: None,
            selector: None,
            selection: None,
        }
    }

    /// Current pattern token.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The literal `.` + pattern substring used for cheap rejects.
    pub fn needle(&self) -> &str {
        &self.needle
    }

    /// Replace the pattern. Returns false when nothing changed.
    pub fn set_pattern(&mut self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern == self.pattern {
            return false;
        }

        info!("Resource pattern changed: {} -> {}", self.pattern, pattern);
        self.pattern = pattern.to_string();
        self.needle = format!(".{}", pattern);
        self.invalidate();
        true
    }

    /// Drop every derived cache.
    pub fn invalidate(&mut self) {
        self.match_regex = None;
        self.extract_regex = None;
        self.selector = None;
        self.selection = None;
    }

    /// Whether a normalized URL points at a resource of the current pattern.
    pub fn matches(&mut self, url: &str) -> bool {
        if self.match_regex.is_none() {
            let source = format!(r"(?i)\.{}(?:[?#]|$)", regex::escape(&self.pattern));
            self.match_regex = compile(&source);
        }
        self.match_regex
            .as_ref()
            .is_some_and(|re| re.is_match(url))
    }

    /// Regex pulling pattern URLs out of free text.
    pub fn extract_regex(&mut self) -> Option<&Regex> {
        if self.extract_regex.is_none() {
            let boundary = if self
                .pattern
                .chars()
                .last()
                .is_some_and(|c| c.is_alphanumeric())
            {
                r"\b"
            } else {
                ""
            };
            let source = format!(
                r"(?i)[^{stop}]+\.{pattern}{boundary}(?:[?#][^{stop}]*)?",
                stop = URL_STOP_CHARS,
                pattern = regex::escape(&self.pattern),
                boundary = boundary,
            );
            self.extract_regex = compile(&source);
        }
        self.extract_regex.as_ref()
    }

    /// Whether `url` is a direct media URL: its path ends exactly in `.pattern`.
    ///
    /// Falls back to the match regex when the URL cannot be parsed.
    pub fn is_direct_media(&mut self, url: &str, base: &Url) -> bool {
        match base.join(url.trim()) {
            Ok(parsed) => parsed
                .path()
                .to_ascii_lowercase()
                .ends_with(&self.needle.to_ascii_lowercase()),
            Err(_) => self.matches(url),
        }
    }

    /// Element selector derived from the pattern.
    pub fn selector(&mut self) -> &ElementSelector {
        let pattern = &self.pattern;
        self.selector
            .get_or_insert_with(|| ElementSelector::new(pattern))
    }

    /// A whole-document selection taken less than `ttl` ago.
    pub fn cached_selection(&self, now: Instant, ttl: Duration) -> Option<&[ElementId]> {
        let cached = self.selection.as_ref()?;
        if now.saturating_duration_since(cached.taken_at) < ttl {
            Some(&cached.elements)
        } else {
            None
        }
    }

    /// Discard the cached whole-document selection.
    pub fn forget_selection(&mut self) {
        self.selection = None;
    }

    /// Remember a whole-document selection.
    pub fn store_selection(&mut self, elements: Vec<ElementId>, now: Instant) {
        debug!("Cached selection of {} elements", elements.len());
        self.selection = Some(CachedSelection {
            elements,
            taken_at: now,
        });
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN)
    }
}

fn compile(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Failed to compile pattern regex {}: {}", source, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract<'a>(registry: &mut PatternRegistry, text: &'a str) -> Vec<&'a str> {
        let re = registry.extract_regex().unwrap().clone();
        re.find_iter(text).map(|m| m.as_str()).collect()
    }

    #[test]
    fn test_default_pattern() {
        let registry = PatternRegistry::new("  ");
        assert_eq!(registry.pattern(), "m3u8");
        assert_eq!(registry.needle(), ".m3u8");
    }

    #[test]
    fn test_set_pattern_noops() {
        let mut registry = PatternRegistry::default();
        assert!(!registry.set_pattern(""));
        assert!(!registry.set_pattern("m3u8"));
        assert!(registry.set_pattern("flv"));
        assert_eq!(registry.pattern(), "flv");
    }

    #[test]
    fn test_matches() {
        let mut registry = PatternRegistry::default();
        assert!(registry.matches("https://cdn.example.com/live/index.m3u8"));
        assert!(registry.matches("https://cdn.example.com/live/index.M3U8?token=1"));
        assert!(!registry.matches("https://cdn.example.com/live/index.m3u8x"));
        assert!(!registry.matches("https://cdn.example.com/live/index.mp4"));
    }

    #[test]
    fn test_pattern_change_invalidates_match_cache() {
        let mut registry = PatternRegistry::default();
        assert!(registry.matches("https://a/x.m3u8"));
        assert!(!registry.matches("https://a/x.flv"));

        registry.set_pattern("flv");
        assert!(!registry.matches("https://a/x.m3u8"));
        assert!(registry.matches("https://a/x.flv"));
        assert_eq!(extract(&mut registry, "see https://a/x.flv now"), vec!["https://a/x.flv"]);
    }

    #[test]
    fn test_extract_regex() {
        let mut registry = PatternRegistry::default();
        let text = r#"var a = "https://cdn.example.com/a.m3u8?t=1#x", b = '/vod/b.m3u8'; (c.m3u8x)"#;
        assert_eq!(
            extract(&mut registry, text),
            vec!["https://cdn.example.com/a.m3u8?t=1#x", "/vod/b.m3u8"]
        );
    }

    #[test]
    fn test_is_direct_media() {
        let mut registry = PatternRegistry::default();
        let base = Url::parse("https://page.example.com/watch").unwrap();
        assert!(registry.is_direct_media("/live/index.m3u8?token=1", &base));
        assert!(registry.is_direct_media("https://cdn/x.M3U8", &base));
        assert!(!registry.is_direct_media("https://cdn/api?file=x.m3u8", &base));
        assert!(!registry.is_direct_media("https://cdn/x.m3u8.json", &base));
    }

    #[test]
    fn test_selection_cache_expires_and_invalidates() {
        let mut registry = PatternRegistry::default();
        let now = Instant::now();
        let ttl = Duration::from_secs(2);
        registry.store_selection(Vec::new(), now);

        assert!(registry.cached_selection(now + Duration::from_secs(1), ttl).is_some());
        assert!(registry.cached_selection(now + Duration::from_secs(3), ttl).is_none());

        registry.set_pattern("mpd");
        assert!(registry.cached_selection(now, ttl).is_none());
    }
}
