//! Populate a [`Document`] from HTML markup.

use super::{Document, ElementId};
use scraper::{ElementRef, Html};
use tracing::debug;
use url::Url;

/// Parse `markup` into a fresh document located at `location`.
pub fn from_html(markup: &str, location: Url) -> Document {
    let mut doc = Document::new(location);
    load_html(&mut doc, markup);
    doc
}

/// Parse `markup` and append its elements under the document root.
///
/// Each subtree is built detached and then attached in one step, so observers
/// see one child-list mutation per top-level element.
pub fn load_html(doc: &mut Document, markup: &str) {
    let parsed = Html::parse_document(markup);
    let html = parsed.root_element();

    for (name, value) in html.value().attrs() {
        doc.set_attribute(doc.root(), name, value);
    }

    let mut attached = 0usize;
    for child in html.children().filter_map(ElementRef::wrap) {
        let id = build_subtree(doc, child);
        doc.append_child(doc.root(), id);
        attached += 1;
    }

    debug!("Loaded {} top-level elements from HTML", attached);
}

fn build_subtree(doc: &mut Document, top: ElementRef<'_>) -> ElementId {
    let top_id = create(doc, top);
    let mut stack = vec![(top, top_id)];

    while let Some((node, id)) = stack.pop() {
        for child in node.children().filter_map(ElementRef::wrap) {
            let child_id = create(doc, child);
            doc.append_child(id, child_id);
            stack.push((child, child_id));
        }
    }

    top_id
}

fn create(doc: &mut Document, node: ElementRef<'_>) -> ElementId {
    let el = node.value();
    let id = doc.create_element(el.name());
    for (name, value) in el.attrs() {
        doc.set_attribute(id, name, value);
    }

    let text: String = node
        .children()
        .filter_map(|child| child.value().as_text().map(|t| &**t))
        .collect();
    if !text.trim().is_empty() {
        doc.set_text(id, &text);
    }
    id
}
