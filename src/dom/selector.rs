//! Element selector derived from the resource pattern.

use super::{Document, ElementId};

/// Generic class tokens that mark player containers.
const PLAYER_CLASS_TOKENS: &[&str] = &["video", "player"];

/// Attributes that commonly carry lazy-loaded media URLs.
const LAZY_SOURCE_ATTRS: &[&str] = &["data-src", "data-url"];

/// Selects elements likely to reference a media resource.
#[derive(Debug, Clone)]
pub struct ElementSelector {
    pattern: String,
}

impl ElementSelector {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_ascii_lowercase(),
        }
    }

    /// Whether `id` is selected.
    pub fn matches(&self, doc: &Document, id: ElementId) -> bool {
        let tag = doc.tag(id);
        if matches!(tag, "video" | "audio" | "source") {
            return true;
        }

        if tag == "a"
            && doc
                .attribute(id, "href")
                .is_some_and(|href| href.to_ascii_lowercase().contains(&self.pattern))
        {
            return true;
        }

        doc.attributes(id).iter().any(|(name, value)| {
            if LAZY_SOURCE_ATTRS.contains(&name.as_str()) || name.contains(&self.pattern) {
                return true;
            }
            name == "class"
                && value.split_whitespace().any(|class| {
                    let class = class.to_ascii_lowercase();
                    class.contains(&self.pattern)
                        || PLAYER_CLASS_TOKENS.iter().any(|token| class.contains(token))
                })
        })
    }

    /// Selected elements of `root`'s subtree in document order.
    pub fn select(&self, doc: &Document, root: ElementId) -> Vec<ElementId> {
        doc.subtree(root)
            .into_iter()
            .filter(|&id| self.matches(doc, id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn doc() -> Document {
        Document::new(Url::parse("https://a.b/").unwrap())
    }

    #[test]
    fn test_matches_media_and_lazy_attrs() {
        let mut doc = doc();
        let video = doc.create_element("video");
        let lazy = doc.create_element("div");
        let plain = doc.create_element("div");
        doc.set_attribute(lazy, "data-url", "/x");
        doc.set_attribute(plain, "id", "main");

        let selector = ElementSelector::new("m3u8");
        assert!(selector.matches(&doc, video));
        assert!(selector.matches(&doc, lazy));
        assert!(!selector.matches(&doc, plain));
    }

    #[test]
    fn test_matches_classes_and_attribute_names() {
        let mut doc = doc();
        let player = doc.create_element("div");
        let named = doc.create_element("div");
        let classed = doc.create_element("span");
        doc.set_attribute(player, "class", "main VideoPlayer");
        doc.set_attribute(named, "data-m3u8-src", "x");
        doc.set_attribute(classed, "class", "m3u8-box");

        let selector = ElementSelector::new("m3u8");
        assert!(selector.matches(&doc, player));
        assert!(selector.matches(&doc, named));
        assert!(selector.matches(&doc, classed));
    }

    #[test]
    fn test_anchor_requires_pattern_in_href() {
        let mut doc = doc();
        let hit = doc.create_element("a");
        let miss = doc.create_element("a");
        doc.set_attribute(hit, "href", "/live/INDEX.M3U8");
        doc.set_attribute(miss, "href", "/about");

        let selector = ElementSelector::new("m3u8");
        assert!(selector.matches(&doc, hit));
        assert!(!selector.matches(&doc, miss));
    }

    #[test]
    fn test_select_subtree() {
        let mut doc = doc();
        let body = doc.create_element("body");
        let audio = doc.create_element("audio");
        let p = doc.create_element("p");
        doc.append_child(doc.root(), body);
        doc.append_child(body, p);
        doc.append_child(body, audio);

        let selector = ElementSelector::new("m3u8");
        assert_eq!(selector.select(&doc, doc.root()), vec![audio]);
    }
}
