//! Broadcast relay
//!
//! Optional server-side fan-out: every raw inbound frame is forwarded,
//! unmodified, to every *other* connected session. Used for multi-viewer
//! setups where monitoring clients want to see all charge point traffic.
//!
//! The relay is independent of the protocol engine — it taps frames before
//! dispatch and never touches correlation state, so a deployment without it
//! simply omits the tap. Forwarding is best-effort: a peer that cannot be
//! reached is logged and skipped, never aborting processing of the
//! original message.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::session::{InboundTap, SharedSessionRegistry};

pub struct BroadcastRelay {
    registry: SharedSessionRegistry,
}

impl BroadcastRelay {
    pub fn new(registry: SharedSessionRegistry) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    /// Forward a raw frame from `origin` to every other connected session.
    pub fn forward(&self, origin: &str, raw: &str) {
        // Snapshot first; sessions may connect or drop while we iterate
        for (charge_point_id, session) in self.registry.snapshot() {
            if charge_point_id == origin {
                continue;
            }
            if let Err(e) = session.send_raw(raw.to_string()) {
                warn!(
                    origin,
                    peer = charge_point_id.as_str(),
                    error = %e,
                    "Failed to relay frame to peer"
                );
            } else {
                debug!(
                    origin,
                    peer = charge_point_id.as_str(),
                    "Relayed frame to peer"
                );
            }
        }
    }
}

impl InboundTap for BroadcastRelay {
    fn on_frame(&self, origin: &str, raw: &str) {
        self.forward(origin, raw);
    }
}
