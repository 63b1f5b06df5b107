//! Detector-side handle given to installed surfaces.

use super::{
    is_fetch_extractable, is_media_mime, is_textual, isolated, CompletedResponse, FetchDecision,
    FetchResponse, RequestId, SendDecision,
};
use crate::detector::{DetectorState, Inner};
use crate::lock;
use crate::types::{Candidate, ErrorKind, ErrorRecord, Result, SourceTag};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use url::Url;

/// Handle through which a surface reports observations and receives
/// decisions.
///
/// A tap belongs to one activation of its detector. After `dispose()` (or a
/// re-initialization) every call is a no-op returning the default decision.
/// Failures inside a call are recorded and never reach the surface.
#[derive(Clone)]
pub struct NetworkTap {
    inner: Weak<Inner>,
    epoch: u64,
}

impl fmt::Debug for NetworkTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkTap")
            .field("epoch", &self.epoch)
            .field("live", &self.is_live())
            .finish()
    }
}

impl NetworkTap {
    pub(crate) fn new(inner: Weak<Inner>, epoch: u64) -> Self {
        Self { inner, epoch }
    }

    /// Whether the activation this tap belongs to is still running.
    pub fn is_live(&self) -> bool {
        self.live().is_some()
    }

    fn live(&self) -> Option<Arc<Inner>> {
        let inner = self.inner.upgrade()?;
        inner.is_current(self.epoch).then_some(inner)
    }

    /// Run `f` against live state, containing panics.
    fn guarded<T: Default>(&self, context: &'static str, f: impl FnOnce(&mut DetectorState) -> T) -> T {
        let Some(inner) = self.live() else {
            return T::default();
        };

        match isolated(|| inner.with_live(self.epoch, f)) {
            Ok(value) => value,
            Err(e) => {
                inner.with_live(self.epoch, |state| {
                    state.record(ErrorRecord::new(ErrorKind::Interception, context, e))
                });
                T::default()
            }
        }
    }

    /// A request-with-callback object was opened for `url`.
    ///
    /// The URL is remembered until `send`. Objects opened but never sent are
    /// evicted oldest first once `max_open_requests` is reached.
    pub fn on_open(&self, id: RequestId, url: &str) {
        self.guarded("request:open", |state| {
            state.requests.put(id, url.to_string());
            if state.is_direct_media(url) {
                state.route(Candidate::new(url, SourceTag::NetworkRequest));
            }
        })
    }

    /// The request is about to be sent.
    pub fn on_send(&self, id: RequestId) -> SendDecision {
        self.guarded("request:send", |state| {
            let Some(url) = state.requests.pop(&id) else {
                return SendDecision::Proceed;
            };

            if state.config.short_circuit_direct_media && state.is_direct_media(&url) {
                debug!("Completing direct media request locally: {}", url);
                return SendDecision::CompleteSynthetically;
            }

            state.route(Candidate::new(url, SourceTag::NetworkRequest));
            SendDecision::Proceed
        })
    }

    /// The request completed.
    pub fn on_complete(&self, id: RequestId, response: CompletedResponse) {
        self.guarded("request:complete", |state| {
            state.requests.pop(&id);
            if response.url.is_empty() {
                return;
            }

            state.route(Candidate::new(response.url.as_str(), SourceTag::NetworkResponse));
            let content_type = response.content_type.as_deref();
            if let Some(body) = response.body.as_deref().filter(|_| is_textual(content_type)) {
                let base = Url::parse(&response.url).ok();
                state.process_body(body, content_type, base);
            }
        })
    }

    /// A fetch for `url` is about to be issued.
    pub fn before_fetch(&self, url: &str) -> FetchDecision {
        self.guarded("fetch:request", |state| {
            let direct = state.is_direct_media(url);
            state.route(Candidate::new(url, SourceTag::NetworkRequest));

            if direct && state.config.short_circuit_direct_media {
                debug!("Answering direct media fetch locally: {}", url);
                FetchDecision::RespondEmpty
            } else {
                FetchDecision::Proceed
            }
        })
    }

    /// A fetch resolved. Extractable bodies are read on a separate task.
    ///
    /// Must be called within a tokio runtime when a body is supplied.
    pub fn after_fetch(&self, response: FetchResponse) {
        let FetchResponse {
            url,
            content_type,
            body,
        } = response;

        self.guarded("fetch:response", |state| {
            state.route(Candidate::new(url.as_str(), SourceTag::NetworkResponse))
        });

        let Some(body) = body.filter(|_| is_fetch_extractable(content_type.as_deref())) else {
            return;
        };
        if !self.is_live() {
            return;
        }

        let tap = self.clone();
        tokio::spawn(async move {
            let result = body.await;
            tap.finish_body(&url, content_type.as_deref(), result);
        });
    }

    fn finish_body(&self, url: &str, content_type: Option<&str>, body: Result<String>) {
        self.guarded("fetch:body", |state| match body {
            Ok(text) => {
                trace!("Read {} byte body of {}", text.len(), url);
                state.process_body(&text, content_type, Url::parse(url).ok());
            }
            Err(e) => state.record(ErrorRecord::new(ErrorKind::Interception, "fetch:body", e)),
        })
    }

    /// A source buffer with `mime` was attached, optionally fed from `url`.
    pub fn on_source_buffer(&self, mime: &str, url: Option<&str>) {
        self.guarded("media-source:buffer", |state| {
            let Some(url) = url.filter(|u| !u.is_empty()) else {
                return;
            };
            if is_media_mime(state.patterns.pattern(), mime) {
                state.route(Candidate::new(url, SourceTag::MediaSource));
            } else {
                trace!("Ignoring source buffer of type {}", mime);
            }
        })
    }

    /// An object URL was created for a media source.
    ///
    /// After a short deferral, every media element playing `object_url`
    /// gets a one-shot watch for loaded metadata.
    pub fn on_object_url(&self, object_url: &str) {
        let delay = self.guarded("media-source:object-url", |state| {
            Some(state.config.object_url_delay)
        });
        let Some(delay) = delay else {
            return;
        };

        let tap = self.clone();
        let object_url = object_url.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tap.arm_metadata_watches(&object_url);
        });
    }

    fn arm_metadata_watches(&self, object_url: &str) {
        let Some(inner) = self.live() else {
            return;
        };
        let document = inner.document().clone();

        self.guarded("media-source:watch", |state| {
            let doc = lock(&document);
            let mut armed = 0usize;
            for id in doc.subtree(doc.root()) {
                if doc.is_media(id) && doc.attribute(id, "src") == Some(object_url) {
                    state.watches.insert(id);
                    armed += 1;
                }
            }
            debug!("Armed {} metadata watches for {}", armed, object_url);
        })
    }

    /// A player library was handed a source through `api`.
    pub fn on_player_source(&self, api: &str, url: &str) {
        self.guarded("player:source", |state| {
            state.route(Candidate::new(url, SourceTag::Player(api.to_string())))
        })
    }
}
