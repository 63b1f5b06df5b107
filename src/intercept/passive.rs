//! Surface for hosts that only observe traffic.

use super::{BodyFuture, FetchDecision, FetchResponse, InterceptSurface, NetworkTap, SurfaceKind};
use crate::lock;
use crate::types::Result;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Surface fed by a host that sees traffic after the fact, such as a
/// DevTools network event stream or a static page fetch.
///
/// Decisions returned by the tap cannot be enforced here, so direct media
/// requests always reach the network.
#[derive(Debug)]
pub struct PassiveSurface {
    kind: SurfaceKind,
    tap: Mutex<Option<NetworkTap>>,
}

impl PassiveSurface {
    pub fn new(kind: SurfaceKind) -> Self {
        Self {
            kind,
            tap: Mutex::new(None),
        }
    }

    /// The tap of the current installation, if any.
    pub fn tap(&self) -> Option<NetworkTap> {
        lock(&self.tap).clone()
    }

    /// Report an outgoing request.
    pub fn request(&self, url: &str) {
        let Some(tap) = self.tap() else {
            return;
        };
        if tap.before_fetch(url) == FetchDecision::RespondEmpty {
            trace!("Direct media request observed passively: {}", url);
        }
    }

    /// Report a received response, with a future for its body when the
    /// host can read it.
    pub fn response(&self, url: &str, content_type: Option<&str>, body: Option<BodyFuture>) {
        let Some(tap) = self.tap() else {
            return;
        };
        tap.after_fetch(FetchResponse {
            url: url.to_string(),
            content_type: content_type.map(str::to_string),
            body,
        });
    }
}

impl InterceptSurface for PassiveSurface {
    fn kind(&self) -> SurfaceKind {
        self.kind
    }

    fn install(&self, tap: NetworkTap) -> Result<()> {
        debug!("Passive {} surface attached", self.kind);
        *lock(&self.tap) = Some(tap);
        Ok(())
    }

    fn uninstall(&self) {
        lock(&self.tap).take();
    }
}
