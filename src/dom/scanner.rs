//! Selector-driven inspection of document elements.

use super::{Document, ElementId};
use crate::config::DetectorConfig;
use crate::registry::PatternRegistry;
use crate::types::{Candidate, SourceTag};
use std::collections::{HashMap, HashSet};
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

/// Scan bookkeeping that outlives a single pass.
#[derive(Debug, Default)]
pub struct ScanState {
    last_full_scan: Option<Instant>,
    throttle: HashMap<ElementId, Instant>,
    hooked: HashSet<ElementId>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.last_full_scan = None;
        self.throttle.clear();
        self.hooked.clear();
    }

    /// Make the next whole-document pass a full scan.
    pub fn expire_full_scan(&mut self) {
        self.last_full_scan = None;
    }

    fn full_scan_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_full_scan
            .map_or(true, |last| now.saturating_duration_since(last) >= interval)
    }

    fn attribute_scan_due(&mut self, id: ElementId, now: Instant, interval: Duration) -> bool {
        match self.throttle.get(&id) {
            Some(&last) if now.saturating_duration_since(last) < interval => false,
            _ => {
                self.throttle.insert(id, now);
                true
            }
        }
    }
}

/// Result of one scan pass.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<Candidate>,
    /// Whether this pass was a full scan.
    pub full: bool,
    /// Number of selected elements inspected.
    pub inspected: usize,
}

/// Runs scan passes over a document.
#[derive(Debug, Clone)]
pub struct DomScanner {
    selector_ttl: Duration,
    attribute_throttle: Duration,
    full_scan_interval: Duration,
}

impl DomScanner {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            selector_ttl: config.selector_ttl,
            attribute_throttle: config.attribute_throttle,
            full_scan_interval: config.full_scan_interval,
        }
    }

    /// Scan the subtree of `root`, or the whole document when `None`.
    ///
    /// Whole-document passes become full scans at most once per
    /// `full_scan_interval`. The caller schedules the inline script pass
    /// when the outcome is full.
    pub fn scan(
        &self,
        state: &mut ScanState,
        patterns: &mut PatternRegistry,
        doc: &mut Document,
        root: Option<ElementId>,
        now: Instant,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        let selected = match root {
            Some(root) => patterns.selector().select(doc, root),
            None => {
                let cached = patterns
                    .cached_selection(now, self.selector_ttl)
                    .map(<[ElementId]>::to_vec);
                match cached {
                    Some(cached) => cached,
                    None => {
                        let fresh = patterns.selector().select(doc, doc.root());
                        patterns.store_selection(fresh.clone(), now);
                        fresh
                    }
                }
            }
        };

        let mut visited = HashSet::with_capacity(selected.len());
        for id in selected {
            if !doc.is_connected(id) || !visited.insert(id) {
                continue;
            }
            outcome.inspected += 1;

            if state.attribute_scan_due(id, now, self.attribute_throttle) {
                scan_attributes(doc, id, &mut outcome.candidates);
            }
            if doc.is_media(id) {
                outcome.candidates.extend(self.scan_media(state, doc, id));
            }
            if doc.tag(id) == "a" {
                scan_anchor(doc, id, &mut outcome.candidates);
            }
        }

        if root.is_none() && state.full_scan_due(now, self.full_scan_interval) {
            state.last_full_scan = Some(now);
            outcome.full = true;
            self.full_scan(state, doc, now, &mut outcome.candidates);
        }

        debug!(
            "DOM scan inspected {} elements, {} candidates (full: {})",
            outcome.inspected,
            outcome.candidates.len(),
            outcome.full
        );
        outcome
    }

    /// Media sources of `id` plus a one-time `src` property hook.
    pub fn scan_media(
        &self,
        state: &mut ScanState,
        doc: &mut Document,
        id: ElementId,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if let Some(src) = doc.attribute(id, "src").filter(|s| !s.is_empty()) {
            candidates.push(Candidate::new(src, SourceTag::MediaSrc));
        }
        if let Some(current) = doc.current_src(id).filter(|s| !s.is_empty()) {
            candidates.push(Candidate::new(current, SourceTag::MediaSrc));
        }
        for &child in doc.children(id) {
            if doc.tag(child) != "source" {
                continue;
            }
            if let Some(src) = doc.attribute(child, "src").filter(|s| !s.is_empty()) {
                candidates.push(Candidate::new(src, SourceTag::MediaSrc));
            }
        }

        if state.hooked.insert(id) {
            trace!("Hooking src property of {:?}", id);
            doc.hook_src(id);
        }
        candidates
    }

    fn full_scan(
        &self,
        state: &mut ScanState,
        doc: &Document,
        now: Instant,
        out: &mut Vec<Candidate>,
    ) {
        for id in doc.subtree(doc.root()) {
            for (name, value) in doc.attributes(id) {
                if name.starts_with("data-") && !value.is_empty() {
                    out.push(Candidate::new(
                        value.as_str(),
                        SourceTag::DataAttribute(name.clone()),
                    ));
                }
            }
            if doc.tag(id) == "a" {
                scan_anchor(doc, id, out);
            }
        }

        let throttle = self.attribute_throttle;
        state
            .throttle
            .retain(|_, &mut last| now.saturating_duration_since(last) < throttle);
    }
}

fn scan_attributes(doc: &Document, id: ElementId, out: &mut Vec<Candidate>) {
    for (name, value) in doc.attributes(id) {
        if !value.is_empty() {
            out.push(Candidate::new(
                value.as_str(),
                SourceTag::DomAttribute(name.clone()),
            ));
        }
    }
}

fn scan_anchor(doc: &Document, id: ElementId, out: &mut Vec<Candidate>) {
    if let Some(href) = doc.attribute(id, "href").filter(|h| !h.is_empty()) {
        out.push(Candidate::new(href, SourceTag::Anchor));
    }
}
