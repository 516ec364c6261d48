//! `HubRTC` client SDK
//!
//! This crate implements the client side of a hub-mediated WebRTC
//! conferencing system: the hub terminates every peer connection,
//! forwards media between participants and pushes signaling events to
//! each client over a per-client server-sent-events stream.
//!
//! ## Architecture
//!
//! - **`RoomClient`**: Composition root for one room membership
//! - **`PeerSession`**: Owns the peer-connection primitive and drives
//!   offer/answer negotiation against the hub
//! - **`SignalingChannel`**: Server-push receive loop with guarded
//!   reconnect
//! - **`StreamRegistry`**: Committed streams plus out-of-order metadata
//!   drafts
//! - **`BandwidthController`**: Periodic transport statistics sampling
//! - **`VideoQualityReporter`**: Reports rendered video sizes back to
//!   the hub so simulcast layer selection can follow the UI
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hubrtc_sdk::{RoomClient, SdkConfig, STREAM_ADDED};
//!
//! let client = RoomClient::new(SdkConfig::default())?;
//! let room = client.create_room("standup").await?;
//! let me = client.create_client(&room.id.clone().into()).await?;
//! client.on(STREAM_ADDED, |event| {
//!     // render the new stream
//! })?;
//! let peer = client
//!     .create_peer(room.id.into(), me.client_id.into())
//!     .await?;
//! ```

mod bandwidth;
mod channel;
mod config;
mod error;
mod event;
mod hub;
mod peer;
mod quality;
mod registry;
mod room;
mod types;

pub use bandwidth::{BandwidthController, InboundTrackStat, OutboundTrackStat};
pub use channel::{ChannelState, SignalingChannel};
pub use config::SdkConfig;
pub use error::{Error, Result};
pub use event::{
    EventBus, SdkEvent, CHANNEL_CONNECTED, CHANNEL_DISCONNECTED, CLIENT_REMOVED, PEER_CONNECTED,
    PEER_DISCONNECTED, STREAM_ADDED, STREAM_REMOVED,
};
pub use hub::{
    ClientInfo, HubClient, RoomInfo, TrackAddedMeta, TrackAvailableMeta, TrackSource,
    TrackSubscription,
};
pub use peer::{LocalStreamSpec, NegotiationState, PeerSession};
pub use quality::{
    DataChannelSink, ReportSink, SurfaceState, VideoQualityReporter, VideoSizeData, VideoSurface,
};
pub use registry::{DraftStream, Stream, StreamRegistry, StreamTrack};
pub use room::RoomClient;
pub use types::{ClientId, RoomId, StreamOrigin, StreamSource, TrackId, TrackKind, VideoSize};
