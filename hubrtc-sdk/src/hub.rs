//! Hub HTTP Client
//!
//! REST side of the hub service. Every response carries the
//! `{code, ok, message, data}` envelope; a response with `ok = false`
//! maps to [`Error::Hub`], except the negotiation-permission check
//! where a denial is an ordinary `false`.

use crate::error::{require_non_empty, Error, Result};
use crate::types::{ClientId, RoomId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Response envelope wrapping every hub REST payload
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    ok: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// Room metadata returned by create/get room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Participant registration returned by the register endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
}

/// Per-track metadata in a `tracks_added` push event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAddedMeta {
    pub stream_id: String,
}

/// Per-track metadata in a `tracks_available` push event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAvailableMeta {
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub stream_id: String,
    pub source: String,
}

/// Bookkeeping entry reported back after `tracks_added`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSource {
    pub track_id: String,
    pub source: String,
}

/// Subscription request entry for a remotely-published track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSubscription {
    pub client_id: String,
    pub stream_id: String,
    pub track_id: String,
}

#[derive(Debug, Deserialize)]
struct NegotiateAnswer {
    answer: RTCSessionDescription,
}

/// Hub REST client. One `reqwest::Client` per SDK instance, passed in
/// explicitly by the composition root.
pub struct HubClient {
    http: Client,
    base_url: String,
}

impl HubClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| Error::InvalidArgument(format!("invalid hub base url: {e}")))?;
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    /// URL of the server-push event stream for one (room, client) scope
    #[must_use]
    pub fn events_url(&self, room_id: &RoomId, client_id: &ClientId) -> String {
        format!("{}/rooms/{}/events/{}", self.base_url, room_id, client_id)
    }

    pub async fn create_room(&self, name: &str) -> Result<RoomInfo> {
        let url = format!("{}/rooms/create", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        parse(resp).await
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<RoomInfo> {
        require_non_empty(room_id.as_str(), "room id")?;
        let url = format!("{}/rooms/{}", self.base_url, room_id);
        let resp = self.http.get(&url).send().await?;
        parse(resp).await
    }

    pub async fn register_client(&self, room_id: &RoomId) -> Result<ClientInfo> {
        require_non_empty(room_id.as_str(), "room id")?;
        let url = format!("{}/rooms/{}/register", self.base_url, room_id);
        let resp = self.http.post(&url).send().await?;
        parse(resp).await
    }

    /// Forward one locally-gathered ICE candidate. Fire-and-forget at
    /// the protocol level: the caller does not retry on failure.
    pub async fn send_candidate(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        candidate: &RTCIceCandidateInit,
    ) -> Result<()> {
        self.require_scope(room_id, client_id)?;
        let url = format!("{}/rooms/{}/candidate/{}", self.base_url, room_id, client_id);
        let resp = self.http.put(&url).json(candidate).send().await?;
        expect_ok(resp).await
    }

    /// Ask whether the hub currently permits renegotiation for this
    /// client. A denial is a normal `false`, not an error.
    pub async fn is_negotiate_allowed(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
    ) -> Result<bool> {
        self.require_scope(room_id, client_id)?;
        let url = format!(
            "{}/rooms/{}/isallownegotiate/{}",
            self.base_url, room_id, client_id
        );
        let resp = self.http.post(&url).send().await?;
        let envelope: Envelope<serde_json::Value> = resp.json().await?;
        debug!(
            room_id = %room_id,
            client_id = %client_id,
            allowed = envelope.ok,
            "Negotiation permission checked"
        );
        Ok(envelope.ok)
    }

    /// Send a local session description, receive the hub's answer
    pub async fn negotiate(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        description: &RTCSessionDescription,
    ) -> Result<RTCSessionDescription> {
        self.require_scope(room_id, client_id)?;
        let url = format!("{}/rooms/{}/negotiate/{}", self.base_url, room_id, client_id);
        let resp = self.http.put(&url).json(description).send().await?;
        let answer: NegotiateAnswer = parse(resp).await?;
        Ok(answer.answer)
    }

    pub async fn leave_room(&self, room_id: &RoomId, client_id: &ClientId) -> Result<()> {
        self.require_scope(room_id, client_id)?;
        let url = format!("{}/rooms/{}/leave/{}", self.base_url, room_id, client_id);
        let resp = self.http.delete(&url).send().await?;
        expect_ok(resp).await
    }

    pub async fn terminate_room(&self, room_id: &RoomId) -> Result<()> {
        require_non_empty(room_id.as_str(), "room id")?;
        let url = format!("{}/rooms/{}/end", self.base_url, room_id);
        let resp = self.http.put(&url).send().await?;
        expect_ok(resp).await
    }

    /// Report which source each locally-published track belongs to so
    /// the hub broadcasts correct metadata to other participants.
    pub async fn set_track_sources(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        sources: &[TrackSource],
    ) -> Result<()> {
        self.require_scope(room_id, client_id)?;
        let url = format!(
            "{}/rooms/{}/settracksources/{}",
            self.base_url, room_id, client_id
        );
        let resp = self.http.put(&url).json(sources).send().await?;
        expect_ok(resp).await
    }

    pub async fn subscribe_tracks(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        subscriptions: &[TrackSubscription],
    ) -> Result<()> {
        self.require_scope(room_id, client_id)?;
        let url = format!(
            "{}/rooms/{}/subscribetracks/{}",
            self.base_url, room_id, client_id
        );
        let resp = self.http.put(&url).json(subscriptions).send().await?;
        expect_ok(resp).await
    }

    fn require_scope(&self, room_id: &RoomId, client_id: &ClientId) -> Result<()> {
        require_non_empty(room_id.as_str(), "room id")?;
        require_non_empty(client_id.as_str(), "client id")
    }
}

async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let envelope: Envelope<T> = resp.json().await?;
    if !envelope.ok {
        return Err(Error::Hub {
            code: envelope.code,
            message: envelope.message,
        });
    }
    envelope
        .data
        .ok_or_else(|| Error::Transport("hub response missing data".to_string()))
}

async fn expect_ok(resp: reqwest::Response) -> Result<()> {
    let envelope: Envelope<serde_json::Value> = resp.json().await?;
    if !envelope.ok {
        return Err(Error::Hub {
            code: envelope.code,
            message: envelope.message,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HubClient::new("http://hub.local/v1/").unwrap();
        assert_eq!(
            client.events_url(&RoomId::from("r1"), &ClientId::from("c1")),
            "http://hub.local/v1/rooms/r1/events/c1"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            HubClient::new("not a url"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_ids_fail_before_io() {
        let client = HubClient::new("http://hub.local").unwrap();
        let err = client
            .get_room(&RoomId::from(""))
            .await
            .expect_err("empty room id must fail");
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = client
            .leave_room(&RoomId::from("r1"), &ClientId::from(""))
            .await
            .expect_err("empty client id must fail");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_envelope_deserialization() {
        let json = r#"{"code":200,"ok":true,"message":"ok","data":{"id":"r1","name":"demo"}}"#;
        let envelope: Envelope<RoomInfo> = serde_json::from_str(json).unwrap();
        assert!(envelope.ok);
        assert_eq!(envelope.data.unwrap().name, "demo");
    }

    #[test]
    fn test_track_available_meta_deserialization() {
        let json = r#"{"client_id":"c2","client_name":"Bee","stream_id":"s9","source":"screen"}"#;
        let meta: TrackAvailableMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.source, "screen");
        assert_eq!(meta.stream_id, "s9");
    }
}
