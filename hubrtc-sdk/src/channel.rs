//! Signaling channel: the hub's server-push event stream
//!
//! One long-lived SSE connection per (room, client) scope. Hub push
//! events are decoded and re-emitted on the event bus as typed
//! signaling events; the peer session subscribes through the facade
//! wiring, never through a direct reference, so both sides can be
//! tested in isolation.

use crate::config::SdkConfig;
use crate::error::{require_non_empty, Result};
use crate::event::{
    EventBus, SdkEvent, CHANNEL_CONNECTED, CHANNEL_DISCONNECTED, SIGNAL_ALLOWED_RENEGOTIATION,
    SIGNAL_CANDIDATE, SIGNAL_OFFER, SIGNAL_TRACKS_ADDED, SIGNAL_TRACKS_AVAILABLE,
};
use crate::hub::HubClient;
use crate::types::{ClientId, RoomId};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection state of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental server-sent-events decoder. Feed raw chunks, get back
/// complete events; partial frames are buffered across chunks.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
    event_name: String,
    data_lines: Vec<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() || !self.event_name.is_empty() {
                    events.push(SseEvent {
                        event: if self.event_name.is_empty() {
                            "message".to_string()
                        } else {
                            std::mem::take(&mut self.event_name)
                        },
                        data: self.data_lines.join("\n"),
                    });
                    self.event_name.clear();
                    self.data_lines.clear();
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.event_name = rest.trim_start().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_string());
            } else if line.starts_with(':') {
                // keep-alive comment
            }
            // id:/retry: fields are not used by the hub
        }
        events
    }
}

/// Guard ensuring a single in-flight reconnect attempt at a time
#[derive(Default)]
pub(crate) struct ReconnectGuard {
    in_flight: AtomicBool,
}

impl ReconnectGuard {
    /// Returns true if the caller won the right to reconnect
    pub fn try_begin(&self) -> bool {
        !self.in_flight.swap(true, Ordering::SeqCst)
    }

    pub fn finish(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Long-lived server-push receive channel scoped to (room, client)
pub struct SignalingChannel {
    http: reqwest::Client,
    hub: Arc<HubClient>,
    bus: Arc<EventBus>,
    state: RwLock<ChannelState>,
    scope: RwLock<Option<(RoomId, ClientId)>>,
    cancel: Mutex<Option<CancellationToken>>,
    reconnect_guard: ReconnectGuard,
    reconnect_delay: Duration,
    fast_failure_window: Duration,
}

impl SignalingChannel {
    pub fn new(hub: Arc<HubClient>, bus: Arc<EventBus>, config: &SdkConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            hub,
            bus,
            state: RwLock::new(ChannelState::Disconnected),
            scope: RwLock::new(None),
            cancel: Mutex::new(None),
            reconnect_guard: ReconnectGuard::default(),
            reconnect_delay: config.reconnect_delay,
            fast_failure_window: config.fast_failure_window,
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Open the push channel. A channel that is already connecting or
    /// connected is left alone.
    pub fn connect(self: &Arc<Self>, room_id: RoomId, client_id: ClientId) -> Result<()> {
        require_non_empty(room_id.as_str(), "room id")?;
        require_non_empty(client_id.as_str(), "client id")?;

        {
            let mut state = self.state.write();
            if *state != ChannelState::Disconnected {
                debug!(state = ?*state, "Channel already active, ignoring connect");
                return Ok(());
            }
            *state = ChannelState::Connecting;
        }

        *self.scope.write() = Some((room_id, client_id));

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(cancel).await;
        });
        Ok(())
    }

    /// Tear down listeners and close the transport. Idempotent.
    pub fn disconnect(&self) {
        let cancel = self.cancel.lock().take();
        let was_active = {
            let mut state = self.state.write();
            let active = *state != ChannelState::Disconnected;
            *state = ChannelState::Disconnected;
            active
        };
        *self.scope.write() = None;

        if let Some(token) = cancel {
            token.cancel();
        }
        if was_active {
            info!("Signaling channel disconnected");
            self.bus.emit(CHANNEL_DISCONNECTED, &SdkEvent::None);
        }
    }

    /// Receive loop: open the SSE stream, dispatch events, and on
    /// transport failure run exactly one guarded reconnect attempt.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some((room_id, client_id)) = self.scope.read().clone() else {
                return;
            };
            let url = self.hub.events_url(&room_id, &client_id);
            *self.state.write() = ChannelState::Connecting;

            let opened_at = Instant::now();
            let response = tokio::select! {
                () = cancel.cancelled() => return,
                resp = self
                    .http
                    .get(&url)
                    .header("Accept", "text/event-stream")
                    .send() => resp,
            };

            match response {
                Ok(resp) if resp.status().is_success() => {
                    *self.state.write() = ChannelState::Connected;
                    info!(room_id = %room_id, client_id = %client_id, "Signaling channel connected");
                    self.bus.emit(CHANNEL_CONNECTED, &SdkEvent::None);

                    let mut decoder = SseDecoder::new();
                    let mut stream = resp.bytes_stream();
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            chunk = stream.next() => match chunk {
                                Some(Ok(bytes)) => {
                                    for event in decoder.feed(&bytes) {
                                        self.dispatch(event);
                                    }
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "Signaling stream error");
                                    break;
                                }
                                None => {
                                    debug!("Signaling stream closed by hub");
                                    break;
                                }
                            },
                        }
                    }
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "Signaling channel rejected by hub");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open signaling channel");
                }
            }

            *self.state.write() = ChannelState::Disconnected;
            if cancel.is_cancelled() {
                return;
            }

            // Single in-flight reconnect; a concurrent failure path that
            // loses this race does not spawn a second attempt.
            if !self.reconnect_guard.try_begin() {
                debug!("Reconnect already in progress, dropping duplicate attempt");
                return;
            }

            // A channel that died within ~1s of opening is failing fast;
            // wait before retrying to avoid a hot loop. A channel that
            // had been up longer reconnects immediately.
            if opened_at.elapsed() < self.fast_failure_window {
                debug!(delay = ?self.reconnect_delay, "Fast failure, delaying reconnect");
                tokio::select! {
                    () = cancel.cancelled() => {
                        self.reconnect_guard.finish();
                        return;
                    }
                    () = tokio::time::sleep(self.reconnect_delay) => {}
                }
            }
            self.reconnect_guard.finish();
        }
    }

    /// Translate one hub push event into its typed bus emission
    fn dispatch(&self, event: SseEvent) {
        match event.event.as_str() {
            "candidate" => match serde_json::from_str(&event.data) {
                Ok(candidate) => {
                    self.bus
                        .emit(SIGNAL_CANDIDATE, &SdkEvent::Candidate(candidate));
                }
                Err(e) => warn!(error = %e, "Malformed candidate event"),
            },
            "offer" => match serde_json::from_str(&event.data) {
                Ok(offer) => {
                    self.bus.emit(SIGNAL_OFFER, &SdkEvent::Offer(offer));
                }
                Err(e) => warn!(error = %e, "Malformed offer event"),
            },
            "tracks_added" => match serde_json::from_str(&event.data) {
                Ok(tracks) => {
                    self.bus
                        .emit(SIGNAL_TRACKS_ADDED, &SdkEvent::TracksAdded(tracks));
                }
                Err(e) => warn!(error = %e, "Malformed tracks_added event"),
            },
            "tracks_available" => match serde_json::from_str(&event.data) {
                Ok(tracks) => {
                    self.bus.emit(
                        SIGNAL_TRACKS_AVAILABLE,
                        &SdkEvent::TracksAvailable(tracks),
                    );
                }
                Err(e) => warn!(error = %e, "Malformed tracks_available event"),
            },
            "allowed_renegotiation" => {
                // Reserved extension point: acknowledged, no action yet
                self.bus.emit(SIGNAL_ALLOWED_RENEGOTIATION, &SdkEvent::None);
            }
            other => debug!(event = other, "Ignoring unknown hub event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: candidate\ndata: {\"candidate\":\"a=1\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "candidate");
        assert_eq!(events[0].data, "{\"candidate\":\"a=1\"}");
    }

    #[test]
    fn test_sse_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: offer\nda").is_empty());
        let events = decoder.feed(b"ta: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "offer");
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn test_sse_multiple_events_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "a");
        assert_eq!(events[1].data, "2");
    }

    #[test]
    fn test_sse_comment_and_crlf_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\r\nevent: x\r\ndata: y\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "x");
        assert_eq!(events[0].data, "y");
    }

    #[test]
    fn test_sse_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_reconnect_guard_single_flight() {
        let guard = ReconnectGuard::default();
        assert!(guard.try_begin());
        // A second failure arriving mid-reconnect must not win
        assert!(!guard.try_begin());
        guard.finish();
        assert!(guard.try_begin());
    }

    #[tokio::test]
    async fn test_connect_requires_ids() {
        let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(SignalingChannel::new(hub, bus, &SdkConfig::default()));

        assert!(channel
            .connect(RoomId::from(""), ClientId::from("c1"))
            .is_err());
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(SignalingChannel::new(hub, bus, &SdkConfig::default()));

        channel.disconnect();
        channel.disconnect();
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_dispatch_candidate_emits_typed_event() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.on(SIGNAL_CANDIDATE, move |payload| {
            if let SdkEvent::Candidate(c) = payload {
                assert!(c.candidate.contains("udp"));
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        let channel = SignalingChannel::new(hub, bus, &SdkConfig::default());
        channel.dispatch(SseEvent {
            event: "candidate".to_string(),
            data: r#"{"candidate":"candidate:1 1 udp 2130706431 10.0.0.1 54321 typ host"}"#
                .to_string(),
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_malformed_payload_is_swallowed() {
        let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
        let bus = Arc::new(EventBus::new());
        let channel = SignalingChannel::new(hub, bus, &SdkConfig::default());
        channel.dispatch(SseEvent {
            event: "offer".to_string(),
            data: "not json".to_string(),
        });
    }
}
