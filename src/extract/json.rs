//! Bounded breadth-first search of JSON documents.

use crate::config::DetectorConfig;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

/// Traversal bounds.
#[derive(Debug, Clone, Copy)]
pub struct JsonLimits {
    /// Values deeper than this are skipped.
    pub max_depth: usize,
    /// Traversal stops once the queue grows past this length.
    pub max_queue: usize,
    /// Members enqueued per object or array.
    pub max_members: usize,
}

impl JsonLimits {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            max_depth: config.json_max_depth,
            max_queue: config.json_max_queue,
            max_members: config.json_max_members,
        }
    }
}

impl Default for JsonLimits {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

/// A string value containing the needle, with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonMatch {
    /// Dotted path such as `data.items[0].url`, `$` for the root.
    pub path: String,
    pub value: String,
}

/// Collect every string under `root` containing `needle`, case-insensitively.
pub fn find_strings(root: &Value, needle: &str, limits: JsonLimits) -> Vec<JsonMatch> {
    let needle = needle.to_ascii_lowercase();
    let mut matches = Vec::new();
    let mut queue: VecDeque<(&Value, String, usize)> = VecDeque::new();
    queue.push_back((root, String::new(), 0));

    while let Some((value, path, depth)) = queue.pop_front() {
        if depth > limits.max_depth {
            continue;
        }

        match value {
            Value::String(s) if s.to_ascii_lowercase().contains(&needle) => {
                matches.push(JsonMatch {
                    path: if path.is_empty() { "$".to_string() } else { path },
                    value: s.clone(),
                });
            }
            Value::Array(items) => {
                for (i, item) in items.iter().take(limits.max_members).enumerate() {
                    queue.push_back((item, format!("{}[{}]", path, i), depth + 1));
                }
            }
            Value::Object(map) => {
                for (key, item) in map.iter().take(limits.max_members) {
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    queue.push_back((item, child, depth + 1));
                }
            }
            _ => {}
        }

        if queue.len() > limits.max_queue {
            debug!("JSON traversal stopped with {} queued values", queue.len());
            break;
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(levels: usize, match_at: usize) -> Value {
        let mut value = json!({ "end": true });
        for level in (0..levels).rev() {
            value = if level == match_at {
                json!({ "next": value, "url": "https://cdn/deep.m3u8" })
            } else {
                json!({ "next": value })
            };
        }
        value
    }

    #[test]
    fn test_paths() {
        let body = json!({
            "data": { "items": [ { "url": "https://cdn/a.m3u8" }, { "url": "https://cdn/b.mp4" } ] },
            "poster": "https://cdn/p.jpg"
        });
        let found = find_strings(&body, ".m3u8", JsonLimits::default());
        assert_eq!(
            found,
            vec![JsonMatch {
                path: "data.items[0].url".to_string(),
                value: "https://cdn/a.m3u8".to_string(),
            }]
        );
    }

    #[test]
    fn test_root_string() {
        let found = find_strings(&json!("/x.M3U8"), ".m3u8", JsonLimits::default());
        assert_eq!(found[0].path, "$");
    }

    #[test]
    fn test_deep_nesting_finds_shallow_match() {
        let body = nested(50, 5);
        let found = find_strings(&body, ".m3u8", JsonLimits::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "next.next.next.next.next.url");
    }

    #[test]
    fn test_match_past_max_depth_is_skipped() {
        let body = nested(50, 20);
        assert!(find_strings(&body, ".m3u8", JsonLimits::default()).is_empty());
    }

    #[test]
    fn test_member_and_queue_limits() {
        let mut items: Vec<Value> = (0..150).map(|i| json!(format!("/skip{}.txt", i))).collect();
        items.push(json!("/late.m3u8"));
        assert!(find_strings(&Value::Array(items), ".m3u8", JsonLimits::default()).is_empty());

        let wide: Vec<Value> = (0..100)
            .map(|i| {
                let inner: Vec<Value> = (0..100)
                    .map(|j| json!(format!("/{}-{}.m3u8", i, j)))
                    .collect();
                Value::Array(inner)
            })
            .collect();
        let found = find_strings(&Value::Array(wide), ".m3u8", JsonLimits::default());
        assert!(found.len() < 10_000);
        assert!(!found.iter().any(|m| m.value == "/99-99.m3u8"));
    }
}
