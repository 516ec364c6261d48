//! Typed publish/subscribe hub decoupling the SDK components
//!
//! Handlers are invoked synchronously on the emitting task. Components
//! that need to do async work in response to an event spawn a task from
//! inside the handler; the facade wiring in `room.rs` does exactly that.

use crate::error::{require_non_empty, Result};
use crate::hub::{TrackAddedMeta, TrackAvailableMeta};
use crate::registry::Stream;
use crate::types::{ClientId, RoomId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// A committed stream became known to the registry
pub const STREAM_ADDED: &str = "stream_added";
/// A committed stream was removed from the registry
pub const STREAM_REMOVED: &str = "stream_removed";
/// The signaling channel finished opening its push connection
pub const CHANNEL_CONNECTED: &str = "channel_connected";
/// The signaling channel was torn down by `disconnect`
pub const CHANNEL_DISCONNECTED: &str = "channel_disconnected";
/// The peer session opened its peer-connection primitive
pub const PEER_CONNECTED: &str = "peer_connected";
/// The peer session tore down its peer-connection primitive
pub const PEER_DISCONNECTED: &str = "peer_disconnected";

/// Hub pushed an ICE candidate for this client
pub const SIGNAL_CANDIDATE: &str = "signal_candidate";
/// Hub pushed an offer (hub-initiated renegotiation)
pub const SIGNAL_OFFER: &str = "signal_offer";
/// Hub acknowledged locally-added tracks
pub const SIGNAL_TRACKS_ADDED: &str = "signal_tracks_added";
/// Hub announced tracks published by other participants
pub const SIGNAL_TRACKS_AVAILABLE: &str = "signal_tracks_available";
/// Hub granted a previously-deferred renegotiation window
pub const SIGNAL_ALLOWED_RENEGOTIATION: &str = "signal_allowed_renegotiation";

/// A moderator asked the hub to remove clients from the room
pub const CLIENT_REMOVED: &str = "client_removed";

/// Payload carried by every bus emission
#[derive(Debug, Clone)]
pub enum SdkEvent {
    /// Events that carry no payload
    None,
    StreamAdded(Arc<Stream>),
    StreamRemoved(Arc<Stream>),
    PeerConnected {
        room_id: RoomId,
        client_id: ClientId,
    },
    Candidate(RTCIceCandidateInit),
    Offer(RTCSessionDescription),
    TracksAdded(HashMap<String, TrackAddedMeta>),
    TracksAvailable(HashMap<String, TrackAvailableMeta>),
    ClientRemoved {
        client_ids: Vec<String>,
    },
}

type Handler = Arc<dyn Fn(&SdkEvent) + Send + Sync>;

/// Minimal event bus: named events, multiple handlers per name,
/// synchronous fan-out. Emitting a name nobody listens to is a no-op.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`. Multiple handlers may share one
    /// name; invocation order on emit is unspecified.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&SdkEvent) + Send + Sync + 'static,
    ) -> Result<()> {
        require_non_empty(event, "event name")?;
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Invoke every currently-registered handler for `event`. Handlers
    /// are cloned out before invocation so a handler may register or
    /// remove handlers without deadlocking.
    pub fn emit(&self, event: &str, payload: &SdkEvent) {
        let handlers: Vec<Handler> = match self.handlers.read().get(event) {
            Some(list) => list.clone(),
            None => return,
        };

        trace!(event, handler_count = handlers.len(), "Emitting event");
        for handler in handlers {
            handler(payload);
        }
    }

    /// Number of handlers registered for `event`
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }
}
