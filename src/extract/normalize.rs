//! URL canonicalization.

use url::Url;

/// Canonicalize `raw` into an absolute, comparison-stable URL.
///
/// Relative input resolves against `base`. The host is lower-cased, default
/// ports and the fragment are dropped, escaped and duplicate slashes collapse.
/// When the input cannot be parsed the cleaned string is returned as-is.
#[must_use]
pub fn normalize_url(raw: &str, base: Option<&Url>) -> String {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return cleaned;
    }

    let parsed = match base {
        Some(base) => base.join(&cleaned),
        None => Url::parse(&cleaned),
    };

    match parsed {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => cleaned,
    }
}

/// Trim, unescape `\/`, turn backslashes into slashes and collapse
/// duplicate path separators.
fn clean(raw: &str) -> String {
    let unescaped = raw.trim().replace("\\/", "/").replace('\\', "/");
    collapse_slashes(&unescaped)
}

fn collapse_slashes(s: &str) -> String {
    let (head, rest) = s.split_at(authority_end(s));
    let query_at = rest.find(['?', '#']).unwrap_or(rest.len());
    let (path, tail) = rest.split_at(query_at);

    let mut out = String::with_capacity(s.len());
    out.push_str(head);
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' && previous_slash {
            continue;
        }
        previous_slash = c == '/';
        out.push(c);
    }
    out.push_str(tail);
    out
}

/// Byte offset where the path starts, past any `scheme://authority` or a
/// scheme-relative `//authority` prefix.
fn authority_end(s: &str) -> usize {
    let authority_start = if s.starts_with("//") {
        2
    } else {
        match s.find("://") {
            Some(i) if is_scheme(&s[..i]) => i + 3,
            _ => return 0,
        }
    };

    s[authority_start..]
        .find(['/', '?', '#'])
        .map_or(s.len(), |i| authority_start + i)
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_forms() {
        let base = Url::parse("http://page.example/watch").unwrap();
        let expected = "http://host/a.ts";

        assert_eq!(normalize_url("//host/a.ts", Some(&base)), expected);
        assert_eq!(normalize_url("http://host:80/a.ts", Some(&base)), expected);
        assert_eq!(normalize_url("http://HOST/a.ts#frag", Some(&base)), expected);
        assert_eq!(normalize_url("  http://host/a.ts  ", None), expected);
    }

    #[test]
    fn test_relative_resolution() {
        let base = Url::parse("https://a.b/").unwrap();
        assert_eq!(normalize_url("/vod/x.m3u8", Some(&base)), "https://a.b/vod/x.m3u8");
        assert_eq!(
            normalize_url("https://a.b:443/x.m3u8", Some(&base)),
            "https://a.b/x.m3u8"
        );
    }

    #[test]
    fn test_escaped_and_duplicate_slashes() {
        assert_eq!(
            normalize_url(r"https:\/\/cdn.example.com\/live\/\/index.m3u8", None),
            "https://cdn.example.com/live/index.m3u8"
        );
        assert_eq!(
            normalize_url("https://cdn.example.com//a///b.m3u8?u=http://x//y", None),
            "https://cdn.example.com/a/b.m3u8?u=http://x//y"
        );
    }

    #[test]
    fn test_unparseable_returns_cleaned() {
        assert_eq!(normalize_url(" not a url.m3u8 ", None), "not a url.m3u8");
        assert_eq!(normalize_url("http://[::1/x.m3u8", None), "http://[::1/x.m3u8");
        assert_eq!(normalize_url("   ", None), "");
    }

    #[test]
    fn test_collapse_keeps_relative_query_intact() {
        assert_eq!(collapse_slashes("/a//b?next=//c"), "/a/b?next=//c");
        assert_eq!(collapse_slashes("//host//a"), "//host/a");
    }
}
