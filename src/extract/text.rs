//! Pattern URL extraction from free text.

use regex::Regex;

/// Substrings of `text` that look like pattern URLs.
///
/// Returns nothing unless `text` contains `needle`, so the regex only runs
/// over promising input.
pub fn find_urls<'t>(text: &'t str, needle: &str, re: &Regex) -> Vec<&'t str> {
    if !contains_ignore_case(text, needle) {
        return Vec::new();
    }
    re.find_iter(text).map(|m| m.as_str()).collect()
}

/// ASCII case-insensitive substring test without allocating.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return true;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PatternRegistry;

    #[test]
    fn test_cheap_reject() {
        let mut registry = PatternRegistry::default();
        let re = registry.extract_regex().unwrap().clone();
        assert!(find_urls("no manifests here", ".m3u8", &re).is_empty());
    }

    #[test]
    fn test_finds_urls_in_script() {
        let mut registry = PatternRegistry::default();
        let re = registry.extract_regex().unwrap().clone();
        let script = r#"player.setup({file: "https://cdn.example.com/live/Index.M3U8?token=abc"});
            var backup = '/backup/stream.m3u8';"#;
        assert_eq!(
            find_urls(script, ".m3u8", &re),
            vec!["https://cdn.example.com/live/Index.M3U8?token=abc", "/backup/stream.m3u8"]
        );
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("A.M3U8", ".m3u8"));
        assert!(!contains_ignore_case("m3u8", ".m3u8"));
        assert!(contains_ignore_case("anything", ""));
    }
}
