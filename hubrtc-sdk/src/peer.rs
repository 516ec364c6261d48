//! Peer session lifecycle and negotiation
//!
//! One [`PeerSession`] owns at most one peer-connection primitive per
//! (room, client) scope. It drives both negotiation directions against
//! the hub, forwards locally-gathered ICE candidates, commits inbound
//! streams into the registry and carries the per-connection telemetry
//! (bandwidth sampling, video quality reporting).
//!
//! Continuations fired from transport callbacks are guarded by a
//! liveness epoch: `disconnect` bumps the epoch, so a callback queued
//! against the previous connection finds a stale epoch and returns
//! without touching the new state.

use crate::bandwidth::BandwidthController;
use crate::config::SdkConfig;
use crate::error::{require_non_empty, Error, Result};
use crate::event::{
    EventBus, SdkEvent, CLIENT_REMOVED, PEER_CONNECTED, PEER_DISCONNECTED, STREAM_ADDED,
    STREAM_REMOVED,
};
use crate::hub::HubClient;
use crate::quality::{DataChannelSink, VideoQualityReporter};
use crate::registry::{Stream, StreamRegistry, StreamTrack};
use crate::types::{ClientId, RoomId, StreamOrigin, StreamSource, TrackId};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Label of the telemetry data channel opened by this client
const INTERNAL_CHANNEL_LABEL: &str = "internal";
/// Label of the hub-opened moderation channel
const MODERATOR_CHANNEL_LABEL: &str = "moderator";

/// Negotiation progress for one peer connection. Exactly one
/// offer/answer round may be in flight at a time; a second trigger
/// while `Negotiating` is dropped, not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No round has completed yet
    Idle,
    /// An offer/answer round is in flight
    Negotiating,
    /// The last round completed successfully
    Stable,
}

/// Single entry point into the negotiating state
pub(crate) struct NegotiationGate {
    state: Mutex<NegotiationState>,
}

impl NegotiationGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(NegotiationState::Idle),
        }
    }

    /// Move to `Negotiating` if no round is in flight. Returns the
    /// previous resting state so a silently-abandoned attempt can
    /// restore it, or `None` if a round is already running.
    pub fn try_begin(&self) -> Option<NegotiationState> {
        let mut state = self.state.lock();
        match *state {
            NegotiationState::Negotiating => None,
            prev => {
                *state = NegotiationState::Negotiating;
                Some(prev)
            }
        }
    }

    pub fn finish(&self, next: NegotiationState) {
        *self.state.lock() = next;
    }

    #[cfg(test)]
    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }
}

/// Description of one local stream to publish
pub struct LocalStreamSpec {
    pub source: StreamSource,
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RemoveClientData {
    #[serde(rename = "clientIDs")]
    client_ids: Vec<String>,
}

/// Owns the peer-connection primitive for one room membership
pub struct PeerSession {
    hub: Arc<HubClient>,
    bus: Arc<EventBus>,
    registry: Arc<StreamRegistry>,
    config: SdkConfig,
    pc: RwLock<Option<Arc<RTCPeerConnection>>>,
    scope: RwLock<Option<(RoomId, ClientId)>>,
    negotiation: NegotiationGate,
    bandwidth: RwLock<Option<Arc<BandwidthController>>>,
    quality: RwLock<Option<Arc<VideoQualityReporter>>>,
    /// Stream key → RTP senders created for its tracks
    senders: Mutex<HashMap<String, Vec<Arc<RTCRtpSender>>>>,
    /// Serializes concurrent `connect` calls so only one builds the
    /// peer-connection primitive
    connect_lock: tokio::sync::Mutex<()>,
    /// Bumped on disconnect; continuations holding an older value bail
    epoch: AtomicU64,
}

impl PeerSession {
    #[must_use]
    pub fn new(
        hub: Arc<HubClient>,
        bus: Arc<EventBus>,
        registry: Arc<StreamRegistry>,
        config: SdkConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub,
            bus,
            registry,
            config,
            pc: RwLock::new(None),
            scope: RwLock::new(None),
            negotiation: NegotiationGate::new(),
            bandwidth: RwLock::new(None),
            quality: RwLock::new(None),
            senders: Mutex::new(HashMap::new()),
            connect_lock: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
        })
    }

    /// Open the peer connection for `(room_id, client_id)`. Calling
    /// `connect` while already connected is a no-op.
    pub async fn connect(self: &Arc<Self>, room_id: RoomId, client_id: ClientId) -> Result<()> {
        require_non_empty(room_id.as_str(), "room id")?;
        require_non_empty(client_id.as_str(), "client id")?;

        // The primitive is built across several awaits; holding the
        // lock for the whole build means the loser of a concurrent
        // connect race sees the winner's primitive and no-ops.
        let _connecting = self.connect_lock.lock().await;
        if self.pc.read().is_some() {
            debug!(room_id = %room_id, client_id = %client_id, "Peer already connected");
            return Ok(());
        }

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let interceptors = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);
        let epoch = self.epoch.load(Ordering::Acquire);

        let bandwidth = BandwidthController::new(
            Arc::clone(&pc),
            self.config.effective_stats_interval(),
        );
        bandwidth.spawn_sampler();

        // Telemetry channel; quality reports queue until it opens
        let internal = pc.create_data_channel(INTERNAL_CHANNEL_LABEL, None).await?;
        let reporter = VideoQualityReporter::new(
            Arc::new(DataChannelSink::new(Arc::clone(&internal))),
            self.config.video_size_report_interval,
        );
        {
            let reporter = Arc::downgrade(&reporter);
            internal.on_open(Box::new(move || {
                Box::pin(async move {
                    if let Some(reporter) = reporter.upgrade() {
                        reporter.mark_sink_open().await;
                    }
                })
            }));
        }

        self.register_callbacks(&pc, epoch);

        *self.scope.write() = Some((room_id.clone(), client_id.clone()));
        *self.bandwidth.write() = Some(bandwidth);
        *self.quality.write() = Some(reporter);
        *self.pc.write() = Some(pc);

        info!(room_id = %room_id, client_id = %client_id, "Peer connected");
        self.bus.emit(
            PEER_CONNECTED,
            &SdkEvent::PeerConnected { room_id, client_id },
        );
        Ok(())
    }

    fn register_callbacks(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>, epoch: u64) {
        let weak = Arc::downgrade(self);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let weak = weak.clone();
            Box::pin(async move {
                let (Some(this), Some(candidate)) = (weak.upgrade(), candidate) else {
                    return;
                };
                if !this.is_live(epoch) {
                    return;
                }
                this.forward_candidate(candidate).await;
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_negotiation_needed(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else { return };
                if !this.is_live(epoch) {
                    return;
                }
                this.negotiate_as_caller(epoch).await;
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else { return };
                if !this.is_live(epoch) {
                    return;
                }
                this.handle_remote_track(track);
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else { return };
                if channel.label() == MODERATOR_CHANNEL_LABEL {
                    this.watch_moderator_channel(&channel);
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state| {
            debug!(state = %state, "Peer connection state changed");
            Box::pin(async {})
        }));
    }

    /// Close the peer connection and drop the per-connection telemetry.
    /// Safe to call repeatedly; only the first call acts.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(pc) = self.pc.write().take() else {
            return Ok(());
        };
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.negotiation.finish(NegotiationState::Idle);

        if let Some(bandwidth) = self.bandwidth.write().take() {
            bandwidth.stop();
        }
        if let Some(reporter) = self.quality.write().take() {
            reporter.stop();
        }
        self.senders.lock().clear();
        let scope = self.scope.write().take();

        pc.close().await?;

        if let Some((room_id, client_id)) = scope {
            info!(room_id = %room_id, client_id = %client_id, "Peer disconnected");
        }
        self.bus.emit(PEER_DISCONNECTED, &SdkEvent::None);
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.pc.read().is_some()
    }

    #[must_use]
    pub fn scope(&self) -> Option<(RoomId, ClientId)> {
        self.scope.read().clone()
    }

    #[must_use]
    pub fn bandwidth(&self) -> Option<Arc<BandwidthController>> {
        self.bandwidth.read().clone()
    }

    #[must_use]
    pub fn quality_reporter(&self) -> Option<Arc<VideoQualityReporter>> {
        self.quality.read().clone()
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    /// Fire-and-forget candidate upload; trickle ICE tolerates loss
    async fn forward_candidate(&self, candidate: RTCIceCandidate) {
        let Some((room_id, client_id)) = self.scope() else {
            return;
        };
        let init = match candidate.to_json() {
            Ok(init) => init,
            Err(e) => {
                warn!(error = %e, "Failed to serialize local candidate");
                return;
            }
        };
        if let Err(e) = self.hub.send_candidate(&room_id, &client_id, &init).await {
            warn!(error = %e, "Failed to forward local candidate");
        }
    }

    /// Caller-initiated negotiation. Asks the hub for permission first;
    /// a denial abandons the attempt silently and the next
    /// negotiation-needed signal retries.
    async fn negotiate_as_caller(&self, epoch: u64) {
        let Some((room_id, client_id)) = self.scope() else {
            return;
        };
        let Some(prev) = self.negotiation.try_begin() else {
            debug!("Negotiation already in flight, dropping trigger");
            return;
        };

        let allowed = match self.hub.is_negotiate_allowed(&room_id, &client_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(error = %e, "Negotiation permission check failed");
                self.negotiation.finish(NegotiationState::Idle);
                return;
            }
        };
        if !allowed {
            debug!(room_id = %room_id, client_id = %client_id, "Negotiation denied, abandoning");
            self.negotiation.finish(prev);
            return;
        }

        if let Err(e) = self.run_offer_round(&room_id, &client_id, epoch).await {
            warn!(error = %e, "Negotiation failed");
            self.negotiation.finish(NegotiationState::Idle);
            return;
        }
        self.negotiation.finish(NegotiationState::Stable);
    }

    async fn run_offer_round(&self, room_id: &RoomId, client_id: &ClientId, epoch: u64) -> Result<()> {
        let pc = self.peer_connection()?;
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer.clone()).await?;

        let answer = self.hub.negotiate(room_id, client_id, &offer).await?;
        if !self.is_live(epoch) {
            debug!("Session torn down during negotiation, dropping answer");
            return Ok(());
        }
        pc.set_remote_description(answer).await?;
        Ok(())
    }

    /// Hub-initiated negotiation: the mirror of the caller path. The
    /// hub pushed an offer, we answer and report the answer back.
    pub async fn handle_hub_offer(&self, offer: RTCSessionDescription) {
        let Some((room_id, client_id)) = self.scope() else {
            return;
        };
        if self.negotiation.try_begin().is_none() {
            debug!("Negotiation already in flight, dropping hub offer");
            return;
        }

        if let Err(e) = self.run_answer_round(&room_id, &client_id, offer).await {
            warn!(error = %e, "Failed to answer hub offer");
            self.negotiation.finish(NegotiationState::Idle);
            return;
        }
        self.negotiation.finish(NegotiationState::Stable);
    }

    async fn run_answer_round(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        offer: RTCSessionDescription,
    ) -> Result<()> {
        let pc = self.peer_connection()?;
        pc.set_remote_description(offer).await?;
        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer.clone()).await?;
        // Reporting back completes the hub's round; its response body
        // carries nothing we need.
        self.hub.negotiate(room_id, client_id, &answer).await?;
        Ok(())
    }

    /// Apply a hub-pushed remote candidate. A candidate arriving before
    /// any remote description is discarded, not queued: the hub
    /// re-delivers and a fresh round supersedes it.
    pub async fn apply_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        let pc = self.peer_connection()?;
        if pc.remote_description().await.is_none() {
            debug!("Discarding candidate before remote description");
            return Ok(());
        }
        pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Commit an inbound track. A draft announced for its stream wins
    /// over the remote/media defaults; the first track of a stream
    /// commits it, later tracks append.
    fn handle_remote_track(&self, track: Arc<TrackRemote>) {
        let stream_id = track.stream_id();
        let track_id = track.id();
        let draft_source = self
            .registry
            .get_draft(&stream_id)
            .and_then(|d| d.source)
            .unwrap_or(StreamSource::Media);

        if let Some(bandwidth) = self.bandwidth() {
            bandwidth.register_remote_track(track.ssrc(), TrackId::from(track_id.as_str()), draft_source);
        }

        info!(stream_id = %stream_id, track_id = %track_id, "Remote track attached");
        self.commit_inbound_track(&stream_id, StreamTrack::Remote(track));
    }

    /// First track of a stream commits and announces it; later tracks
    /// append without re-announcing, so consumers render each stream
    /// once.
    fn commit_inbound_track(&self, stream_id: &str, track: StreamTrack) {
        if let Some(existing) = self.registry.get_stream(stream_id) {
            existing.add_track(track);
            debug!(stream_id = %stream_id, "Appended track to committed stream");
            return;
        }
        match self.registry.promote_draft(
            stream_id,
            StreamOrigin::Remote,
            StreamSource::Media,
            vec![track],
        ) {
            Ok(stream) => {
                self.bus.emit(STREAM_ADDED, &SdkEvent::StreamAdded(stream));
            }
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "Failed to commit inbound stream");
            }
        }
    }

    fn watch_moderator_channel(self: &Arc<Self>, channel: &Arc<RTCDataChannel>) {
        debug!("Moderator channel opened by hub");
        let bus = Arc::clone(&self.bus);
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            let bus = Arc::clone(&bus);
            Box::pin(async move {
                let control: ControlMessage = match serde_json::from_slice(&message.data) {
                    Ok(control) => control,
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed moderator message");
                        return;
                    }
                };
                if control.kind != "remove-client" {
                    return;
                }
                match serde_json::from_value::<RemoveClientData>(control.data) {
                    Ok(data) => {
                        bus.emit(
                            CLIENT_REMOVED,
                            &SdkEvent::ClientRemoved {
                                client_ids: data.client_ids,
                            },
                        );
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed remove-client payload"),
                }
            })
        }));
    }

    /// Publish a local stream: add its tracks to the connection, commit
    /// it and announce it. Adding tracks fires negotiation-needed.
    pub async fn add_local_stream(&self, key: &str, spec: LocalStreamSpec) -> Result<Arc<Stream>> {
        require_non_empty(key, "stream key")?;
        let pc = self.peer_connection()?;

        let mut senders = Vec::with_capacity(spec.tracks.len());
        for track in &spec.tracks {
            senders.push(pc.add_track(Arc::clone(track)).await?);
        }
        self.senders.lock().insert(key.to_string(), senders);

        let stream = Stream::new(key, StreamOrigin::Local, spec.source)
            .with_tracks(spec.tracks.into_iter().map(StreamTrack::Local).collect());
        let stream = self.registry.add_stream(stream)?;

        info!(stream_id = key, source = stream.source.as_str(), "Local stream published");
        self.bus
            .emit(STREAM_ADDED, &SdkEvent::StreamAdded(Arc::clone(&stream)));
        Ok(stream)
    }

    /// Unpublish a stream: drop its RTP senders and remove it from the
    /// registry. Removing an unknown key is a no-op.
    pub async fn remove_stream(&self, key: &str) -> Result<()> {
        require_non_empty(key, "stream key")?;

        let senders = self.senders.lock().remove(key);
        if let (Some(senders), Ok(pc)) = (senders, self.peer_connection()) {
            for sender in senders {
                if let Err(e) = pc.remove_track(&sender).await {
                    warn!(stream_id = key, error = %e, "Failed to remove RTP sender");
                }
            }
        }

        if let Some(stream) = self.registry.remove_stream(key)? {
            info!(stream_id = key, "Local stream removed");
            self.bus
                .emit(STREAM_REMOVED, &SdkEvent::StreamRemoved(stream));
        }
        Ok(())
    }

    #[must_use]
    pub fn get_stream(&self, id: &str) -> Option<Arc<Stream>> {
        self.registry.get_stream(id)
    }

    #[must_use]
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.registry.streams()
    }

    fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        self.pc.read().clone().ok_or(Error::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Arc<PeerSession> {
        let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
        PeerSession::new(
            hub,
            Arc::new(EventBus::new()),
            Arc::new(StreamRegistry::new()),
            SdkConfig::default(),
        )
    }

    #[test]
    fn test_negotiation_gate_single_round() {
        let gate = NegotiationGate::new();
        assert_eq!(gate.try_begin(), Some(NegotiationState::Idle));
        // Second trigger loses while the round is in flight
        assert_eq!(gate.try_begin(), None);

        gate.finish(NegotiationState::Stable);
        assert_eq!(gate.state(), NegotiationState::Stable);
        // A completed round can be renegotiated
        assert_eq!(gate.try_begin(), Some(NegotiationState::Stable));
    }

    #[test]
    fn test_negotiation_gate_restores_previous_state() {
        let gate = NegotiationGate::new();
        gate.finish(NegotiationState::Stable);

        let prev = gate.try_begin().unwrap();
        // Denied attempt puts the resting state back
        gate.finish(prev);
        assert_eq!(gate.state(), NegotiationState::Stable);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_ids() {
        let session = session();
        let err = session
            .connect(RoomId::from(""), ClientId::from("c1"))
            .await
            .expect_err("empty room id must fail");
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let session = session();
        session
            .connect(RoomId::from("r1"), ClientId::from("c1"))
            .await
            .unwrap();
        assert!(session.is_connected());
        let first = session.peer_connection().unwrap();

        // Second connect must not replace the primitive
        session
            .connect(RoomId::from("r1"), ClientId::from("c1"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &session.peer_connection().unwrap()));

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let session = session();
        session.disconnect().await.unwrap();

        session
            .connect(RoomId::from("r1"), ClientId::from("c1"))
            .await
            .unwrap();
        session.disconnect().await.unwrap();
        assert!(!session.is_connected());
        assert!(session.scope().is_none());
        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_emits_peer_connected_once() {
        use std::sync::atomic::AtomicUsize;

        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            bus.on(PEER_CONNECTED, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
        let session = PeerSession::new(
            hub,
            bus,
            Arc::new(StreamRegistry::new()),
            SdkConfig::default(),
        );
        session
            .connect(RoomId::from("r1"), ClientId::from("c1"))
            .await
            .unwrap();
        session
            .connect(RoomId::from("r1"), ClientId::from("c1"))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        session.disconnect().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_connects_create_single_primitive() {
        use std::sync::atomic::AtomicUsize;

        for iteration in 0..20 {
            let bus = Arc::new(EventBus::new());
            let count = Arc::new(AtomicUsize::new(0));
            {
                let count = Arc::clone(&count);
                bus.on(PEER_CONNECTED, move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
            let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
            let session = PeerSession::new(
                hub,
                bus,
                Arc::new(StreamRegistry::new()),
                SdkConfig::default(),
            );

            let s1 = Arc::clone(&session);
            let s2 = Arc::clone(&session);
            let (a, b) = tokio::join!(
                tokio::spawn(
                    async move { s1.connect(RoomId::from("r1"), ClientId::from("c1")).await }
                ),
                tokio::spawn(
                    async move { s2.connect(RoomId::from("r1"), ClientId::from("c1")).await }
                ),
            );
            a.unwrap().unwrap();
            b.unwrap().unwrap();

            assert_eq!(
                count.load(Ordering::SeqCst),
                1,
                "iteration {iteration}: exactly one primitive must be created"
            );
            session.disconnect().await.unwrap();
        }
    }

    #[test]
    fn test_second_inbound_track_same_stream_announces_once() {
        use std::sync::atomic::AtomicUsize;

        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            bus.on(STREAM_ADDED, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        let hub = Arc::new(HubClient::new("http://hub.local").unwrap());
        let session = PeerSession::new(
            hub,
            bus,
            Arc::new(StreamRegistry::new()),
            SdkConfig::default(),
        );

        session.commit_inbound_track("s1", local_track("t1", "s1"));
        session.commit_inbound_track("s1", local_track("t2", "s1"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let stream = session.get_stream("s1").unwrap();
        assert_eq!(stream.track_count(), 2);
        assert!(stream.contains_track("t2"));
    }

    fn local_track(id: &str, stream_id: &str) -> StreamTrack {
        use webrtc::api::media_engine::MIME_TYPE_OPUS;
        use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
        use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

        StreamTrack::Local(Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            stream_id.to_owned(),
        )))
    }

    #[tokio::test]
    async fn test_add_local_stream_requires_connection() {
        let session = session();
        let err = session
            .add_local_stream(
                "s1",
                LocalStreamSpec {
                    source: StreamSource::Media,
                    tracks: vec![],
                },
            )
            .await
            .expect_err("must fail while disconnected");
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_remove_unknown_stream_is_noop() {
        let session = session();
        session.remove_stream("never-added").await.unwrap();
    }

    #[tokio::test]
    async fn test_candidate_before_connection_fails_with_not_connected() {
        let session = session();
        let err = session
            .apply_remote_candidate(RTCIceCandidateInit::default())
            .await
            .expect_err("no connection");
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_discarded() {
        let session = session();
        session
            .connect(RoomId::from("r1"), ClientId::from("c1"))
            .await
            .unwrap();

        // No remote description yet: discarded without error
        session
            .apply_remote_candidate(RTCIceCandidateInit {
                candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        session.disconnect().await.unwrap();
    }
}
