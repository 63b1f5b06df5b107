//! In-memory document model driven by a host.
//!
//! Elements live in an arena and are addressed by [`ElementId`] handles, so
//! scanners can remember which elements they inspected without holding
//! references into the tree. The document publishes [`DomEvent`]s to every
//! subscribed observer:
//! - mutation records for child insertions and attribute changes
//! - assignments through hooked `src` properties
//! - loaded media metadata
//! - location changes

pub mod html;
pub mod observer;
pub mod scanner;
pub mod selector;

pub use observer::{plan_batch, BatchPlan, MutationQueue, PendingItem};
pub use scanner::{DomScanner, ScanOutcome, ScanState};
pub use selector::ElementSelector;

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

/// Document shared between its host and a detector.
pub type SharedDocument = Arc<Mutex<Document>>;

/// Tags treated as media elements.
pub const MEDIA_TAGS: &[&str] = &["video", "audio"];

/// Stable handle of an element within one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(usize);

/// A single DOM change.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRecord {
    /// Elements inserted under `target`.
    ChildList {
        target: ElementId,
        added: Vec<ElementId>,
    },
    /// Attribute `name` of `target` was set or removed.
    Attributes { target: ElementId, name: String },
}

/// Notification delivered to document observers.
#[derive(Debug, Clone, PartialEq)]
pub enum DomEvent {
    Mutations(Vec<MutationRecord>),
    /// A value was assigned through a hooked `src` property.
    SrcAssigned { target: ElementId, value: String },
    /// Media metadata finished loading.
    MetadataLoaded { target: ElementId },
    /// The document location changed (history navigation, hash change).
    LocationChanged,
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    src_hooked: bool,
    current_src: Option<String>,
    duration: Option<f64>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            src_hooked: false,
            current_src: None,
            duration: None,
        }
    }
}

/// Arena-backed document.
#[derive(Debug)]
pub struct Document {
    elements: Vec<Element>,
    root: ElementId,
    location: Url,
    hidden: bool,
    observers: Vec<mpsc::UnboundedSender<DomEvent>>,
}

impl Document {
    /// Create an empty document with an `<html>` root element.
    pub fn new(location: Url) -> Self {
        Self {
            elements: vec![Element::new("html")],
            root: ElementId(0),
            location,
            hidden: false,
            observers: Vec::new(),
        }
    }

    /// Wrap the document for sharing with a detector.
    pub fn shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Whether the document is backgrounded.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Move to a new location, as history navigation or a hash change would.
    pub fn navigate(&mut self, location: Url) {
        debug!("Document location changed to {}", location);
        self.location = location;
        self.emit(DomEvent::LocationChanged);
    }

    /// Subscribe to document events. Dropping the receiver unsubscribes.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<DomEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> ElementId {
        self.elements.push(Element::new(tag));
        ElementId(self.elements.len() - 1)
    }

    /// Append `child` under `parent`, detaching it from its old parent first.
    pub fn append_child(&mut self, parent: ElementId, child: ElementId) {
        if self.element(parent).is_none() || self.element(child).is_none() {
            return;
        }
        if self.is_inclusive_ancestor(child, parent) {
            debug!("Refusing to append {:?} under its own descendant", child);
            return;
        }

        self.detach(child);
        if let Some(el) = self.element_mut(child) {
            el.parent = Some(parent);
        }
        if let Some(el) = self.element_mut(parent) {
            el.children.push(child);
        }

        if self.is_connected(parent) {
            self.emit(DomEvent::Mutations(vec![MutationRecord::ChildList {
                target: parent,
                added: vec![child],
            }]));
        }
    }

    /// Detach an element (and its subtree) from the tree.
    pub fn remove(&mut self, id: ElementId) {
        if id != self.root {
            self.detach(id);
        }
    }

    /// Set an attribute, emitting a mutation when the element is connected.
    pub fn set_attribute(&mut self, id: ElementId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let Some(el) = self.element_mut(id) else {
            return;
        };
        match el.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => el.attrs.push((name.clone(), value.to_string())),
        }
        self.attribute_changed(id, name);
    }

    pub fn remove_attribute(&mut self, id: ElementId, name: &str) {
        let name = name.to_ascii_lowercase();
        let Some(el) = self.element_mut(id) else {
            return;
        };
        let before = el.attrs.len();
        el.attrs.retain(|(n, _)| *n != name);
        if el.attrs.len() != before {
            self.attribute_changed(id, name);
        }
    }

    /// Assign the `src` property, as `element.src = value` would.
    pub fn set_src_property(&mut self, id: ElementId, value: &str) {
        let hooked = self.element(id).is_some_and(|el| el.src_hooked);
        if hooked {
            trace!("Hooked src assignment on {:?}: {}", id, value);
            self.emit(DomEvent::SrcAssigned {
                target: id,
                value: value.to_string(),
            });
        }
        self.set_attribute(id, "src", value);
    }

    /// Route future `src` property assignments of `id` to observers.
    pub fn hook_src(&mut self, id: ElementId) {
        if let Some(el) = self.element_mut(id) {
            el.src_hooked = true;
        }
    }

    pub fn is_src_hooked(&self, id: ElementId) -> bool {
        self.element(id).is_some_and(|el| el.src_hooked)
    }

    /// Set the source a media element is currently playing.
    pub fn set_current_src(&mut self, id: ElementId, value: Option<&str>) {
        if let Some(el) = self.element_mut(id) {
            el.current_src = value.map(str::to_string);
        }
    }

    pub fn current_src(&self, id: ElementId) -> Option<&str> {
        self.element(id)?.current_src.as_deref()
    }

    /// Record loaded media metadata and notify observers.
    pub fn load_metadata(&mut self, id: ElementId, duration: f64) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        el.duration = Some(duration);
        self.emit(DomEvent::MetadataLoaded { target: id });
    }

    pub fn duration(&self, id: ElementId) -> Option<f64> {
        self.element(id)?.duration
    }

    pub fn set_text(&mut self, id: ElementId, text: &str) {
        if let Some(el) = self.element_mut(id) {
            el.text = text.to_string();
        }
    }

    pub fn text(&self, id: ElementId) -> &str {
        self.element(id).map(|el| el.text.as_str()).unwrap_or("")
    }

    /// Lower-case tag name, empty for unknown handles.
    pub fn tag(&self, id: ElementId) -> &str {
        self.element(id).map(|el| el.tag.as_str()).unwrap_or("")
    }

    pub fn attribute(&self, id: ElementId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self, id: ElementId) -> &[(String, String)] {
        self.element(id).map(|el| el.attrs.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.element(id)?.parent
    }

    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.element(id).map(|el| el.children.as_slice()).unwrap_or(&[])
    }

    pub fn is_media(&self, id: ElementId) -> bool {
        MEDIA_TAGS.contains(&self.tag(id))
    }

    /// Whether the element is attached to the document root.
    pub fn is_connected(&self, id: ElementId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// `root` and all its descendants in document order.
    pub fn subtree(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        if self.element(root).is_none() {
            return out;
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Text of every connected `<script>` without a `src` attribute.
    pub fn inline_scripts(&self) -> Vec<String> {
        self.subtree(self.root)
            .into_iter()
            .filter(|&id| self.tag(id) == "script" && self.attribute(id, "src").is_none())
            .map(|id| self.text(id).to_string())
            .filter(|text| !text.is_empty())
            .collect()
    }

    fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0)
    }

    fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(id.0)
    }

    fn is_inclusive_ancestor(&self, ancestor: ElementId, node: ElementId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    fn detach(&mut self, id: ElementId) {
        let Some(old_parent) = self.element_mut(id).and_then(|el| el.parent.take()) else {
            return;
        };
        if let Some(parent) = self.element_mut(old_parent) {
            parent.children.retain(|&c| c != id);
        }
    }

    fn attribute_changed(&mut self, id: ElementId, name: String) {
        if self.is_connected(id) {
            self.emit(DomEvent::Mutations(vec![MutationRecord::Attributes {
                target: id,
                name,
            }]));
        }
    }

    fn emit(&mut self, event: DomEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new(Url::parse("https://a.b/").unwrap())
    }

    #[test]
    fn test_append_and_subtree_order() {
        let mut doc = doc();
        let body = doc.create_element("BODY");
        let video = doc.create_element("video");
        let source = doc.create_element("source");
        let anchor = doc.create_element("a");
        doc.append_child(doc.root(), body);
        doc.append_child(body, video);
        doc.append_child(video, source);
        doc.append_child(body, anchor);

        assert_eq!(doc.tag(body), "body");
        assert_eq!(doc.subtree(doc.root()), vec![doc.root(), body, video, source, anchor]);
        assert!(doc.is_media(video));
        assert!(doc.is_connected(source));
    }

    #[test]
    fn test_events_only_for_connected_elements() {
        let mut doc = doc();
        let mut rx = doc.observe();
        let div = doc.create_element("div");
        doc.set_attribute(div, "data-src", "/x.m3u8");
        assert!(rx.try_recv().is_err());

        doc.append_child(doc.root(), div);
        assert_eq!(
            rx.try_recv().unwrap(),
            DomEvent::Mutations(vec![MutationRecord::ChildList {
                target: doc.root(),
                added: vec![div],
            }])
        );

        doc.set_attribute(div, "SRC", "/y.m3u8");
        assert_eq!(
            rx.try_recv().unwrap(),
            DomEvent::Mutations(vec![MutationRecord::Attributes {
                target: div,
                name: "src".to_string(),
            }])
        );
        assert_eq!(doc.attribute(div, "src"), Some("/y.m3u8"));
    }

    #[test]
    fn test_hooked_src_assignment() {
        let mut doc = doc();
        let video = doc.create_element("video");
        doc.append_child(doc.root(), video);
        let mut rx = doc.observe();

        doc.set_src_property(video, "/a.m3u8");
        assert!(matches!(rx.try_recv(), Ok(DomEvent::Mutations(_))));

        doc.hook_src(video);
        doc.set_src_property(video, "/b.m3u8");
        assert_eq!(
            rx.try_recv().unwrap(),
            DomEvent::SrcAssigned {
                target: video,
                value: "/b.m3u8".to_string(),
            }
        );
        assert_eq!(doc.attribute(video, "src"), Some("/b.m3u8"));
    }

    #[test]
    fn test_reparent_and_cycles() {
        let mut doc = doc();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        doc.append_child(doc.root(), a);
        doc.append_child(a, b);
        doc.append_child(b, a);
        assert_eq!(doc.parent(a), Some(doc.root()));

        doc.append_child(doc.root(), b);
        assert!(doc.children(a).is_empty());
        doc.remove(b);
        assert!(!doc.is_connected(b));
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let mut doc = doc();
        let rx = doc.observe();
        drop(rx);
        doc.navigate(Url::parse("https://a.b/#2").unwrap());
        assert!(doc.observers.is_empty());
    }

    #[test]
    fn test_inline_scripts() {
        let mut doc = doc();
        let inline = doc.create_element("script");
        let external = doc.create_element("script");
        doc.set_text(inline, "var u = '/a.m3u8';");
        doc.set_attribute(external, "src", "/app.js");
        doc.append_child(doc.root(), inline);
        doc.append_child(doc.root(), external);
        assert_eq!(doc.inline_scripts(), vec!["var u = '/a.m3u8';".to_string()]);
    }
}
