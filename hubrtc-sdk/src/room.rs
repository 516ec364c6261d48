//! Room client: composition root and event wiring
//!
//! [`RoomClient`] owns the whole component graph for one room
//! membership and wires the components together over the event bus.
//! The signaling channel and the peer session never hold references to
//! each other; every cross-component reaction below is a bus handler
//! registered here.

use crate::channel::SignalingChannel;
use crate::config::SdkConfig;
use crate::error::Result;
use crate::event::{
    EventBus, SdkEvent, CLIENT_REMOVED, PEER_CONNECTED, PEER_DISCONNECTED, SIGNAL_CANDIDATE,
    SIGNAL_OFFER, SIGNAL_TRACKS_ADDED, SIGNAL_TRACKS_AVAILABLE,
};
use crate::hub::{ClientInfo, HubClient, RoomInfo, TrackSource, TrackSubscription};
use crate::peer::PeerSession;
use crate::registry::{DraftStream, Stream, StreamRegistry};
use crate::types::{ClientId, RoomId, StreamOrigin, StreamSource};
use std::sync::Arc;
use tracing::warn;

/// SDK entry point for one room membership
pub struct RoomClient {
    hub: Arc<HubClient>,
    bus: Arc<EventBus>,
    registry: Arc<StreamRegistry>,
    peer: Arc<PeerSession>,
    channel: Arc<SignalingChannel>,
}

impl RoomClient {
    pub fn new(config: SdkConfig) -> Result<Self> {
        let hub = Arc::new(HubClient::new(&config.hub_base_url)?);
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(StreamRegistry::new());
        let peer = PeerSession::new(
            Arc::clone(&hub),
            Arc::clone(&bus),
            Arc::clone(&registry),
            config.clone(),
        );
        let channel = Arc::new(SignalingChannel::new(
            Arc::clone(&hub),
            Arc::clone(&bus),
            &config,
        ));

        let client = Self {
            hub,
            bus,
            registry,
            peer,
            channel,
        };
        client.wire()?;
        Ok(client)
    }

    /// Register the cross-component bus handlers. Handlers hold weak
    /// references back into the graph; the bus outliving a component
    /// must not keep it alive.
    fn wire(&self) -> Result<()> {
        // Peer lifecycle drives the signaling channel
        let channel = Arc::downgrade(&self.channel);
        self.bus.on(PEER_CONNECTED, move |payload| {
            let SdkEvent::PeerConnected { room_id, client_id } = payload else {
                return;
            };
            let Some(channel) = channel.upgrade() else {
                return;
            };
            if let Err(e) = channel.connect(room_id.clone(), client_id.clone()) {
                warn!(error = %e, "Failed to open signaling channel");
            }
        })?;

        let channel = Arc::downgrade(&self.channel);
        self.bus.on(PEER_DISCONNECTED, move |_| {
            if let Some(channel) = channel.upgrade() {
                channel.disconnect();
            }
        })?;

        // Hub-pushed signaling feeds the peer session
        let peer = Arc::downgrade(&self.peer);
        self.bus.on(SIGNAL_CANDIDATE, move |payload| {
            let SdkEvent::Candidate(candidate) = payload else {
                return;
            };
            let Some(peer) = peer.upgrade() else { return };
            let candidate = candidate.clone();
            tokio::spawn(async move {
                if let Err(e) = peer.apply_remote_candidate(candidate).await {
                    warn!(error = %e, "Failed to apply remote candidate");
                }
            });
        })?;

        let peer = Arc::downgrade(&self.peer);
        self.bus.on(SIGNAL_OFFER, move |payload| {
            let SdkEvent::Offer(offer) = payload else {
                return;
            };
            let Some(peer) = peer.upgrade() else { return };
            let offer = offer.clone();
            tokio::spawn(async move {
                peer.handle_hub_offer(offer).await;
            });
        })?;

        // Hub registered our tracks; report which source each belongs to
        let registry = Arc::clone(&self.registry);
        let hub = Arc::clone(&self.hub);
        let peer = Arc::downgrade(&self.peer);
        self.bus.on(SIGNAL_TRACKS_ADDED, move |payload| {
            let SdkEvent::TracksAdded(tracks) = payload else {
                return;
            };
            let sources: Vec<TrackSource> = tracks
                .keys()
                .map(|track_id| {
                    let source = registry
                        .find_stream_by_track(track_id)
                        .map_or(StreamSource::Media, |s| s.source);
                    TrackSource {
                        track_id: track_id.clone(),
                        source: source.as_str().to_string(),
                    }
                })
                .collect();

            let Some(peer) = peer.upgrade() else { return };
            let Some((room_id, client_id)) = peer.scope() else {
                return;
            };
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                if let Err(e) = hub.set_track_sources(&room_id, &client_id, &sources).await {
                    warn!(error = %e, "Failed to report track sources");
                }
            });
        })?;

        // Other participants published tracks; draft them and subscribe
        let registry = Arc::clone(&self.registry);
        let hub = Arc::clone(&self.hub);
        let peer = Arc::downgrade(&self.peer);
        self.bus.on(SIGNAL_TRACKS_AVAILABLE, move |payload| {
            let SdkEvent::TracksAvailable(tracks) = payload else {
                return;
            };
            let mut subscriptions = Vec::with_capacity(tracks.len());
            for (track_id, meta) in tracks {
                let draft = DraftStream {
                    origin: Some(StreamOrigin::Remote),
                    source: Some(StreamSource::from(meta.source.as_str())),
                    client_id: Some(meta.client_id.clone()),
                    client_name: (!meta.client_name.is_empty())
                        .then(|| meta.client_name.clone()),
                };
                if let Err(e) = registry.add_draft(&meta.stream_id, draft) {
                    warn!(stream_id = %meta.stream_id, error = %e, "Skipping bad track announcement");
                    continue;
                }
                subscriptions.push(TrackSubscription {
                    client_id: meta.client_id.clone(),
                    stream_id: meta.stream_id.clone(),
                    track_id: track_id.clone(),
                });
            }

            let Some(peer) = peer.upgrade() else { return };
            let Some((room_id, client_id)) = peer.scope() else {
                return;
            };
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                if let Err(e) = hub
                    .subscribe_tracks(&room_id, &client_id, &subscriptions)
                    .await
                {
                    warn!(error = %e, "Failed to subscribe to available tracks");
                }
            });
        })?;

        // A moderator removed us from the room
        let peer = Arc::downgrade(&self.peer);
        self.bus.on(CLIENT_REMOVED, move |payload| {
            let SdkEvent::ClientRemoved { client_ids } = payload else {
                return;
            };
            let Some(peer) = peer.upgrade() else { return };
            let Some((_, client_id)) = peer.scope() else {
                return;
            };
            if !client_ids.iter().any(|id| id == client_id.as_str()) {
                return;
            }
            tokio::spawn(async move {
                if let Err(e) = peer.disconnect().await {
                    warn!(error = %e, "Failed to disconnect removed client");
                }
            });
        })?;

        Ok(())
    }

    pub async fn create_room(&self, name: &str) -> Result<RoomInfo> {
        self.hub.create_room(name).await
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<RoomInfo> {
        self.hub.get_room(room_id).await
    }

    /// Register this participant with the hub
    pub async fn create_client(&self, room_id: &RoomId) -> Result<ClientInfo> {
        self.hub.register_client(room_id).await
    }

    /// Connect the peer session for `(room_id, client_id)` and return
    /// it. The signaling channel opens as a side effect of the peer
    /// connecting, through the bus wiring above.
    pub async fn create_peer(
        &self,
        room_id: RoomId,
        client_id: ClientId,
    ) -> Result<Arc<PeerSession>> {
        self.peer.connect(room_id, client_id).await?;
        Ok(Arc::clone(&self.peer))
    }

    pub async fn leave_room(&self, room_id: &RoomId, client_id: &ClientId) -> Result<()> {
        self.hub.leave_room(room_id, client_id).await?;
        self.peer.disconnect().await
    }

    pub async fn terminate_room(&self, room_id: &RoomId) -> Result<()> {
        self.hub.terminate_room(room_id).await
    }

    /// Subscribe to a named SDK event, e.g. [`crate::event::STREAM_ADDED`]
    pub fn on(&self, event: &str, handler: impl Fn(&SdkEvent) + Send + Sync + 'static) -> Result<()> {
        self.bus.on(event, handler)
    }

    #[must_use]
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.registry.streams()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<PeerSession> {
        &self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::TrackAvailableMeta;
    use std::collections::HashMap;

    #[test]
    fn test_new_rejects_invalid_hub_url() {
        let config = SdkConfig {
            hub_base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(RoomClient::new(config).is_err());
    }

    #[tokio::test]
    async fn test_tracks_available_creates_screen_draft() {
        let client = RoomClient::new(SdkConfig::default()).unwrap();

        let mut tracks = HashMap::new();
        tracks.insert(
            "t-screen".to_string(),
            TrackAvailableMeta {
                client_id: "c2".to_string(),
                client_name: "Bee".to_string(),
                stream_id: "s-screen".to_string(),
                source: "screen".to_string(),
            },
        );
        client
            .bus
            .emit(SIGNAL_TRACKS_AVAILABLE, &SdkEvent::TracksAvailable(tracks));

        let draft = client.registry.get_draft("s-screen").unwrap();
        assert_eq!(draft.source, Some(StreamSource::Screen));
        assert_eq!(draft.origin, Some(StreamOrigin::Remote));
        assert_eq!(draft.client_name.as_deref(), Some("Bee"));
        assert_eq!(client.registry.draft_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_announcement_keeps_single_draft() {
        let client = RoomClient::new(SdkConfig::default()).unwrap();

        let mut tracks = HashMap::new();
        tracks.insert(
            "t1".to_string(),
            TrackAvailableMeta {
                client_id: "c2".to_string(),
                client_name: String::new(),
                stream_id: "s1".to_string(),
                source: "media".to_string(),
            },
        );
        let payload = SdkEvent::TracksAvailable(tracks);
        client.bus.emit(SIGNAL_TRACKS_AVAILABLE, &payload);
        client.bus.emit(SIGNAL_TRACKS_AVAILABLE, &payload);

        assert_eq!(client.registry.draft_count(), 1);
    }

    #[tokio::test]
    async fn test_client_removed_ignores_other_clients() {
        let client = RoomClient::new(SdkConfig::default()).unwrap();
        client
            .peer()
            .connect(RoomId::from("r1"), ClientId::from("c1"))
            .await
            .unwrap();

        client.bus.emit(
            CLIENT_REMOVED,
            &SdkEvent::ClientRemoved {
                client_ids: vec!["someone-else".to_string()],
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(client.peer().is_connected());

        client.peer().disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_on_registers_public_handler() {
        let client = RoomClient::new(SdkConfig::default()).unwrap();
        client.on(crate::event::STREAM_ADDED, |_| {}).unwrap();
        assert_eq!(client.bus.handler_count(crate::event::STREAM_ADDED), 1);
    }
}
