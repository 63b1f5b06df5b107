//! Detector lifecycle and candidate routing.
//!
//! A [`Detector`] is bound to one [`SharedDocument`] and one report channel.
//! [`Detector::initialize`] installs the interception surfaces, subscribes to
//! document events, runs a full scan and starts the scan scheduler. Every
//! candidate string, whatever its origin, goes through the same route:
//! normalize, match against the pattern, check the seen set, report.
//!
//! State lives behind one mutex. When the document is needed as well, the
//! state lock is taken first. Reports are posted only after both locks are
//! released.

use crate::config::DetectorConfig;
use crate::dom::{
    plan_batch, DomEvent, DomScanner, ElementId, MutationQueue, MutationRecord, ScanState,
    SharedDocument,
};
use crate::extract::{self, JsonLimits};
use crate::intercept::{isolated, is_json, InterceptSurface, NetworkTap, RequestId};
use crate::lock;
use crate::notify::ReportChannel;
use crate::registry::{PatternRegistry, SeenSet};
use crate::scheduler::{self, Scheduler, Tick};
use crate::types::{Candidate, ErrorKind, ErrorRecord, Report, Result, ScoutError, SourceTag};
use lru::LruCache;
use std::collections::HashSet;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Lifecycle of a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Active,
    Disposed,
}

/// Counters for one detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    /// URL reports posted.
    pub reported: usize,
    /// Errors recorded, critical or not.
    pub errors: usize,
    /// Critical errors posted to the channel.
    pub critical_errors: usize,
    /// URLs currently in the seen set.
    pub seen: usize,
    /// Items waiting in the mutation queue.
    pub pending: usize,
}

/// Mutable detector state.
pub(crate) struct DetectorState {
    pub(crate) config: DetectorConfig,
    lifecycle: Lifecycle,
    epoch: u64,
    location: Url,
    seen: SeenSet,
    pub(crate) patterns: PatternRegistry,
    scanner: DomScanner,
    scan: ScanState,
    queue: MutationQueue,
    /// URLs of opened request-with-callback objects not yet sent.
    pub(crate) requests: LruCache<RequestId, String>,
    /// Media elements waiting for loaded metadata.
    pub(crate) watches: HashSet<ElementId>,
    tasks: Vec<JoinHandle<()>>,
    outbox: Vec<Report>,
    stats: DetectorStats,
}

impl DetectorState {
    fn new(config: DetectorConfig, location: Url) -> Self {
        Self {
            seen: SeenSet::new(config.seen_capacity),
            patterns: PatternRegistry::new(&config.pattern),
            scanner: DomScanner::new(&config),
            scan: ScanState::new(),
            queue: MutationQueue::new(),
            requests: LruCache::new(
                NonZeroUsize::new(config.max_open_requests).unwrap_or(NonZeroUsize::MIN),
            ),
            watches: HashSet::new(),
            tasks: Vec::new(),
            outbox: Vec::new(),
            stats: DetectorStats::default(),
            lifecycle: Lifecycle::Uninitialized,
            epoch: 0,
            location,
            config,
        }
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.lifecycle == Lifecycle::Active && self.epoch == epoch
    }

    /// Whether `url` is a direct media URL relative to the document.
    pub(crate) fn is_direct_media(&mut self, url: &str) -> bool {
        self.patterns.is_direct_media(url, &self.location)
    }

    /// Normalize, match, dedup and report one candidate.
    pub(crate) fn route(&mut self, candidate: Candidate) {
        let raw = candidate.value.trim();
        if raw.is_empty() {
            return;
        }
        if raw.contains("base64,") {
            self.route_encoded(candidate);
            return;
        }

        let base = candidate.base.as_ref().unwrap_or(&self.location);
        let url = extract::normalize_url(raw, Some(base));
        trace!("Candidate {} from {}", url, candidate.source);

        if !self.patterns.matches(&url) || self.seen.has(&url) {
            return;
        }

        self.seen.add(&url);
        self.stats.reported += 1;
        info!("Detected {} via {}", url, candidate.source);
        self.outbox.push(Report::url(url, candidate.source));
    }

    fn route_encoded(&mut self, candidate: Candidate) {
        if candidate.depth >= self.config.max_base64_depth {
            debug!("Skipping data URL nested {} levels deep", candidate.depth);
            return;
        }

        match extract::decode_data_url(&candidate.value) {
            Ok(Some(decoded)) => {
                let source = SourceTag::Base64(Box::new(candidate.source));
                self.ingest_text(&decoded, source, candidate.base, candidate.depth + 1);
            }
            Ok(None) => {}
            Err(e) => self.record(ErrorRecord::new(ErrorKind::Parse, "base64", e)),
        }
    }

    /// Extract pattern URLs from free text and route each one.
    pub(crate) fn ingest_text(
        &mut self,
        text: &str,
        source: SourceTag,
        base: Option<Url>,
        depth: u8,
    ) {
        let Some(re) = self.patterns.extract_regex().cloned() else {
            return;
        };
        let needle = self.patterns.needle().to_string();

        for found in extract::find_urls(text, &needle, &re) {
            self.route(
                Candidate::new(found, source.clone())
                    .with_base(base.clone())
                    .with_depth(depth),
            );
        }
    }

    /// Walk a JSON body and route every string containing the pattern.
    pub(crate) fn ingest_json(&mut self, body: &str, base: Option<Url>) {
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                self.record(ErrorRecord::new(ErrorKind::Parse, "json-body", e));
                return;
            }
        };

        let limits = JsonLimits::from_config(&self.config);
        for found in extract::find_strings(&value, self.patterns.needle(), limits) {
            self.route(
                Candidate::new(found.value, SourceTag::JsonPath(found.path))
                    .with_base(base.clone()),
            );
        }
    }

    /// Inspect a response body, as JSON or as text depending on its type.
    pub(crate) fn process_body(&mut self, body: &str, content_type: Option<&str>, base: Option<Url>) {
        if !extract::contains_ignore_case(body, self.patterns.needle()) {
            return;
        }

        if is_json(content_type) {
            self.ingest_json(body, base);
        } else {
            self.ingest_text(body, SourceTag::ResponseBody, base, 0);
        }
    }

    /// Log an error, and post it when critical.
    pub(crate) fn record(&mut self, record: ErrorRecord) {
        self.stats.errors += 1;
        if record.critical {
            warn!(
                "Critical {:?} error in {}: {}",
                record.kind, record.context, record.error
            );
            self.stats.critical_errors += 1;
            self.outbox.push(Report::error(&record));
        } else {
            debug!("{:?} error in {}: {}", record.kind, record.context, record.error);
        }
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }
}

/// Shared core of a detector, referenced weakly by its tasks and taps.
pub(crate) struct Inner {
    me: Weak<Inner>,
    state: Mutex<DetectorState>,
    document: SharedDocument,
    channel: Arc<dyn ReportChannel>,
    surfaces: Vec<Arc<dyn InterceptSurface>>,
}

impl Inner {
    /// Run `f` on the state, then post queued reports with no lock held.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut DetectorState) -> R) -> R {
        let (result, outbox) = {
            let mut state = lock(&self.state);
            let result = f(&mut state);
            (result, mem::take(&mut state.outbox))
        };

        for report in outbox {
            self.channel.post_message(report);
        }
        result
    }

    /// Like [`Inner::with_state`], but only while `epoch` is current.
    pub(crate) fn with_live<R: Default>(
        &self,
        epoch: u64,
        f: impl FnOnce(&mut DetectorState) -> R,
    ) -> R {
        self.with_state(|state| {
            if state.is_current(epoch) {
                f(state)
            } else {
                R::default()
            }
        })
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        lock(&self.state).is_current(epoch)
    }

    pub(crate) fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub(crate) fn spawn_tracked(&self, epoch: u64, task: JoinHandle<()>) {
        let stale = self.with_state(|state| {
            if state.is_current(epoch) {
                state.track(task);
                None
            } else {
                Some(task)
            }
        });
        if let Some(task) = stale {
            task.abort();
        }
    }

    fn install_surfaces(&self, epoch: u64) {
        for surface in &self.surfaces {
            let kind = surface.kind();
            let tap = NetworkTap::new(self.me.clone(), epoch);
            match isolated(|| surface.install(tap)).and_then(|result| result) {
                Ok(()) => debug!("Installed {} interceptor", kind),
                Err(e) => {
                    let error = ScoutError::InstallError {
                        surface: kind.to_string(),
                        reason: e.to_string(),
                    };
                    let record = ErrorRecord::new(
                        ErrorKind::Interception,
                        format!("install:{}", kind),
                        error,
                    );
                    self.with_state(|state| state.record(record.critical()));
                }
            }
        }
    }

    fn uninstall_surfaces(&self) {
        for surface in &self.surfaces {
            if let Err(e) = isolated(|| surface.uninstall()) {
                warn!("Failed to uninstall {} interceptor: {}", surface.kind(), e);
            }
        }
    }

    fn spawn_observer(&self, mut events: UnboundedReceiver<DomEvent>, epoch: u64) -> JoinHandle<()> {
        let me = self.me.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = me.upgrade() else {
                    break;
                };
                if !inner.is_current(epoch) {
                    break;
                }
                if let Err(e) = isolated(|| inner.handle_event(event, epoch)) {
                    inner.with_live(epoch, |state| {
                        state.record(ErrorRecord::new(ErrorKind::Observer, "dom-event", e))
                    });
                }
            }
            trace!("Document observer stopped");
        })
    }

    fn handle_event(&self, event: DomEvent, epoch: u64) {
        match event {
            DomEvent::Mutations(records) => self.on_mutations(&records, epoch),
            DomEvent::SrcAssigned { value, .. } => self.with_live(epoch, |state| {
                state.route(Candidate::new(value, SourceTag::SrcSetter))
            }),
            DomEvent::MetadataLoaded { target } => self.on_metadata(target, epoch),
            DomEvent::LocationChanged => self.on_location_changed(epoch),
        }
    }

    fn on_mutations(&self, records: &[MutationRecord], epoch: u64) {
        self.with_live(epoch, |state| {
            let mut doc = lock(&self.document);
            let needle = state.patterns.needle().to_string();
            let plan = plan_batch(&doc, records, &needle, state.patterns.selector());

            let mut candidates = plan.immediate;
            for id in plan.media {
                candidates.extend(state.scanner.scan_media(&mut state.scan, &mut doc, id));
            }
            drop(doc);

            for candidate in candidates {
                state.route(candidate);
            }
            for item in plan.staged {
                state.queue.stage(item);
            }

            if !state.queue.is_empty() && !state.queue.is_armed() {
                let timer = self.spawn_debounce(epoch, state.config.debounce);
                state.queue.arm(timer);
            }
        });
    }

    fn spawn_debounce(&self, epoch: u64, delay: Duration) -> JoinHandle<()> {
        let me = self.me.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let Some(inner) = me.upgrade() else {
                return;
            };
            if let Err(e) = isolated(|| inner.drain_queue(epoch)) {
                inner.with_live(epoch, |state| {
                    state.record(ErrorRecord::new(ErrorKind::Observer, "mutation-drain", e))
                });
            }
        })
    }

    /// Drain the mutation queue: strings first, then subtree rescans.
    fn drain_queue(&self, epoch: u64) {
        let targets = self.with_live(epoch, |state| {
            let (texts, roots) = state.queue.drain();
            debug!(
                "Draining {} strings and {} subtrees",
                texts.len(),
                roots.len()
            );

            for text in texts {
                if text.contains("base64,") {
                    state.route(Candidate::new(text, SourceTag::Mutation));
                } else {
                    state.ingest_text(&text, SourceTag::Mutation, None, 0);
                }
            }

            let doc = lock(&self.document);
            let mut targets: Vec<Option<ElementId>> = Vec::new();
            for root in roots {
                let target = doc.parent(root);
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            targets
        });

        for target in targets {
            self.scan(target, epoch);
        }
    }

    fn on_metadata(&self, target: ElementId, epoch: u64) {
        self.with_live(epoch, |state| {
            if !state.watches.contains(&target) {
                return;
            }

            let doc = lock(&self.document);
            if !doc.duration(target).is_some_and(|d| d > 0.0) {
                return;
            }
            let source = doc
                .current_src(target)
                .or_else(|| doc.attribute(target, "src"))
                .map(str::to_string);
            drop(doc);

            state.watches.remove(&target);
            if let Some(source) = source {
                state.route(Candidate::new(source, SourceTag::MediaSourceElement));
            }
        });
    }

    fn on_location_changed(&self, epoch: u64) {
        let location = lock(&self.document).location().clone();
        let changed = self.with_live(epoch, |state| {
            info!("Location changed to {}", location);
            state.location = location.clone();
            state.route(Candidate::new(location.as_str(), SourceTag::DocumentLocation));
            true
        });
        if changed {
            self.scan(None, epoch);
        }
    }

    /// Scan the subtree of `root`, or the whole document.
    fn scan(&self, root: Option<ElementId>, epoch: u64) {
        if self.scan_pass(root, epoch, false) {
            self.schedule_script_pass(epoch);
        }
    }

    /// One scan pass. Returns whether it was a full scan.
    ///
    /// `force` bypasses the selection cache and the full-scan interval.
    fn scan_pass(&self, root: Option<ElementId>, epoch: u64, force: bool) -> bool {
        let now = Instant::now();
        self.with_live(epoch, |state| {
            if force {
                state.patterns.forget_selection();
                state.scan.expire_full_scan();
            }

            let mut doc = lock(&self.document);
            let outcome = state
                .scanner
                .scan(&mut state.scan, &mut state.patterns, &mut doc, root, now);
            if outcome.full {
                let before = state.watches.len();
                state
                    .watches
                    .retain(|&id| doc.is_connected(id) && doc.is_media(id));
                if state.watches.len() != before {
                    debug!("Dropped {} stale metadata watches", before - state.watches.len());
                }
            }
            drop(doc);

            for candidate in outcome.candidates {
                state.route(candidate);
            }
            outcome.full
        })
    }

    /// Inspect inline scripts on a later turn of the event loop.
    fn schedule_script_pass(&self, epoch: u64) {
        let me = self.me.clone();
        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Some(inner) = me.upgrade() {
                inner.inspect_scripts(epoch);
            }
        });
        self.spawn_tracked(epoch, task);
    }

    fn inspect_scripts(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }

        let scripts = lock(&self.document).inline_scripts();
        trace!("Inspecting {} inline scripts", scripts.len());
        self.with_live(epoch, |state| {
            for script in &scripts {
                state.ingest_text(script, SourceTag::ScriptText, None, 0);
            }
        });
    }
}

impl Tick for Inner {
    fn alive(&self, epoch: u64) -> bool {
        self.is_current(epoch)
    }

    fn is_hidden(&self) -> bool {
        lock(&self.document).is_hidden()
    }

    fn tick(&self, epoch: u64) -> Result<()> {
        self.scan(None, epoch);
        Ok(())
    }

    fn tick_failed(&self, epoch: u64, error: ScoutError) {
        self.with_live(epoch, |state| {
            state.record(ErrorRecord::new(ErrorKind::Scheduler, "scan-tick", error))
        });
    }
}

/// Builder for [`Detector`].
pub struct DetectorBuilder {
    document: SharedDocument,
    channel: Arc<dyn ReportChannel>,
    config: DetectorConfig,
    surfaces: Vec<Arc<dyn InterceptSurface>>,
}

impl DetectorBuilder {
    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an interception surface.
    pub fn surface(mut self, surface: Arc<dyn InterceptSurface>) -> Self {
        self.surfaces.push(surface);
        self
    }

    pub fn build(self) -> Detector {
        let location = lock(&self.document).location().clone();
        let state = DetectorState::new(self.config, location);
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            state: Mutex::new(state),
            document: self.document,
            channel: self.channel,
            surfaces: self.surfaces,
        });
        Detector { inner }
    }
}

/// Media resource detector bound to one document.
pub struct Detector {
    inner: Arc<Inner>,
}

impl Detector {
    /// Start building a detector for `document` posting to `channel`.
    pub fn builder(document: SharedDocument, channel: Arc<dyn ReportChannel>) -> DetectorBuilder {
        DetectorBuilder {
            document,
            channel,
            config: DetectorConfig::default(),
            surfaces: Vec::new(),
        }
    }

    /// Activate the detector. Returns false when it was already active.
    ///
    /// Must be called within a tokio runtime.
    pub fn initialize(&self) -> bool {
        let inner = &self.inner;
        let activated = inner.with_state(|state| {
            if state.lifecycle == Lifecycle::Active {
                return None;
            }
            state.lifecycle = Lifecycle::Active;
            Some((
                state.epoch,
                state.patterns.pattern().to_string(),
                Scheduler::new(state.config.scan_interval, state.config.max_scan_interval),
            ))
        });
        let Some((epoch, pattern, schedule)) = activated else {
            debug!("Detector already active");
            return false;
        };

        info!("Initializing detector (pattern: .{})", pattern);
        inner.install_surfaces(epoch);

        let (location, events) = {
            let mut doc = lock(&inner.document);
            (doc.location().clone(), doc.observe())
        };
        inner.with_state(|state| state.location = location.clone());

        inner.spawn_tracked(epoch, inner.spawn_observer(events, epoch));
        inner.scan(None, epoch);
        inner.spawn_tracked(epoch, scheduler::spawn(inner.me.clone(), epoch, schedule));
        inner.with_live(epoch, |state| {
            state.route(Candidate::new(location.as_str(), SourceTag::DocumentLocation))
        });
        true
    }

    /// Tear the detector down. Returns false when it was not active.
    ///
    /// In-flight work started before the call has no further effect.
    pub fn dispose(&self) -> bool {
        let inner = &self.inner;
        let tasks = inner.with_state(|state| {
            if state.lifecycle != Lifecycle::Active {
                return None;
            }
            state.lifecycle = Lifecycle::Disposed;
            state.epoch += 1;
            state.seen.clear();
            state.queue.clear();
            state.scan.clear();
            state.patterns.invalidate();
            state.requests.clear();
            state.watches.clear();
            Some(mem::take(&mut state.tasks))
        });
        let Some(tasks) = tasks else {
            return false;
        };

        for task in tasks {
            task.abort();
        }
        inner.uninstall_surfaces();
        info!("Detector disposed");
        true
    }

    /// Run a last full scan, inline scripts included, then dispose.
    ///
    /// Staged mutations are drained first, so nothing waiting on a timer is
    /// lost. Returns false when the detector was not active.
    pub fn finish(&self) -> bool {
        let Some(epoch) = self.active_epoch() else {
            return false;
        };

        let inner = &self.inner;
        inner.drain_queue(epoch);
        if inner.scan_pass(None, epoch, true) {
            inner.inspect_scripts(epoch);
        }
        self.dispose()
    }

    /// Change the resource pattern. Returns false when nothing changed.
    pub fn set_pattern(&self, pattern: &str) -> bool {
        self.inner.with_state(|state| state.patterns.set_pattern(pattern))
    }

    pub fn pattern(&self) -> String {
        self.inner.with_state(|state| state.patterns.pattern().to_string())
    }

    /// Scan the subtree of `root`, or the whole document, right now.
    /// Returns false when the detector is not active.
    pub fn scan_now(&self, root: Option<ElementId>) -> bool {
        match self.active_epoch() {
            Some(epoch) => {
                self.inner.scan(root, epoch);
                true
            }
            None => false,
        }
    }

    fn active_epoch(&self) -> Option<u64> {
        self.inner.with_state(|state| {
            (state.lifecycle == Lifecycle::Active).then_some(state.epoch)
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.with_state(|state| state.lifecycle)
    }

    pub fn stats(&self) -> DetectorStats {
        self.inner.with_state(|state| DetectorStats {
            seen: state.seen.len(),
            pending: state.queue.len(),
            ..state.stats
        })
    }

    pub fn document(&self) -> &SharedDocument {
        &self.inner.document
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.dispose();
    }
}
