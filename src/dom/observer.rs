//! Debounced coalescing of document mutations.

use super::{Document, ElementId, ElementSelector, MutationRecord};
use crate::types::{Candidate, SourceTag};
use std::collections::HashSet;
use tokio::task::JoinHandle;
use tracing::trace;

/// Attributes whose matching values skip the queue.
const FAST_PATH_ATTRS: &[&str] = &["src", "data-src", "href"];

/// Work item waiting for the debounce timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingItem {
    /// A string for the content extractor.
    Text(String),
    /// An element whose neighbourhood needs a rescan.
    Subtree(ElementId),
}

/// Deduplicating, insertion-ordered set of pending items plus the handle of
/// the timer that will drain it.
#[derive(Debug, Default)]
pub struct MutationQueue {
    items: Vec<PendingItem>,
    index: HashSet<PendingItem>,
    timer: Option<JoinHandle<()>>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item. Returns false when it was already pending.
    pub fn stage(&mut self, item: PendingItem) -> bool {
        if self.index.contains(&item) {
            return false;
        }
        self.index.insert(item.clone());
        self.items.push(item);
        true
    }

    /// Whether a drain timer is pending.
    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Store the drain timer. Later stages do not reset it.
    pub fn arm(&mut self, timer: JoinHandle<()>) {
        if let Some(old) = self.timer.replace(timer) {
            old.abort();
        }
    }

    /// Take every pending item, strings first, and forget the timer.
    pub fn drain(&mut self) -> (Vec<String>, Vec<ElementId>) {
        self.timer = None;
        self.index.clear();

        let mut texts = Vec::new();
        let mut roots = Vec::new();
        for item in self.items.drain(..) {
            match item {
                PendingItem::Text(text) => texts.push(text),
                PendingItem::Subtree(id) => roots.push(id),
            }
        }
        (texts, roots)
    }

    /// Drop every pending item and cancel the timer.
    pub fn clear(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.items.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What to do with one batch of mutation records.
#[derive(Debug, Default)]
pub struct BatchPlan {
    /// Fast-path attribute values routed right away.
    pub immediate: Vec<Candidate>,
    /// Added media elements needing an immediate media scan.
    pub media: Vec<ElementId>,
    /// Items for the mutation queue.
    pub staged: Vec<PendingItem>,
}

/// Classify a batch of records against the current pattern.
pub fn plan_batch(
    doc: &Document,
    records: &[MutationRecord],
    needle: &str,
    selector: &ElementSelector,
) -> BatchPlan {
    let needle = needle.to_ascii_lowercase();
    let mut plan = BatchPlan::default();

    for record in records {
        match record {
            MutationRecord::ChildList { added, .. } => {
                for &id in added {
                    if doc.is_media(id) {
                        plan.media.push(id);
                    }
                    for (_, value) in doc.attributes(id) {
                        if !value.is_empty() {
                            plan.staged.push(PendingItem::Text(value.clone()));
                        }
                    }
                    if selector.matches(doc, id) {
                        plan.staged.push(PendingItem::Subtree(id));
                    }
                }
            }
            MutationRecord::Attributes { target, name } => {
                let Some(value) = doc.attribute(*target, name).filter(|v| !v.is_empty()) else {
                    continue;
                };
                if FAST_PATH_ATTRS.contains(&name.as_str())
                    && value.to_ascii_lowercase().contains(&needle)
                {
                    trace!("Fast-path {} change on {:?}: {}", name, target, value);
                    plan.immediate
                        .push(Candidate::new(value, SourceTag::AttributeChange));
                } else {
                    plan.staged.push(PendingItem::Text(value.to_string()));
                }
            }
        }
    }

    plan
}
