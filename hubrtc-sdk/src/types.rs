//! Common types used throughout the SDK

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a hub room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a registered room participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a media track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TrackId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<webrtc::rtp_transceiver::rtp_codec::RTPCodecType> for TrackKind {
    fn from(codec_type: webrtc::rtp_transceiver::rtp_codec::RTPCodecType) -> Self {
        match codec_type {
            webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

impl From<&str> for TrackKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "audio" => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Where a stream was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOrigin {
    Local,
    Remote,
}

/// What a stream carries: camera/microphone media or a screen share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Media,
    Screen,
}

impl StreamSource {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Media => "media",
            Self::Screen => "screen",
        }
    }
}

impl From<&str> for StreamSource {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "screen" => Self::Screen,
            _ => Self::Media,
        }
    }
}

/// Desired rendered size for a remote video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl VideoSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size reported for a surface that is not currently visible
    #[must_use]
    pub const fn hidden() -> Self {
        Self {
            width: 0,
            height: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_roundtrip() {
        let room = RoomId::from("r-1");
        assert_eq!(room.as_str(), "r-1");
        assert_eq!(room.to_string(), "r-1");

        let client = ClientId::from("c-1".to_string());
        assert_eq!(client.as_str(), "c-1");
    }

    #[test]
    fn test_track_kind_from_str() {
        assert_eq!(TrackKind::from("audio"), TrackKind::Audio);
        assert_eq!(TrackKind::from("Audio"), TrackKind::Audio);
        assert_eq!(TrackKind::from("video"), TrackKind::Video);
        assert_eq!(TrackKind::from("unknown"), TrackKind::Video);
    }

    #[test]
    fn test_stream_source_from_str() {
        assert_eq!(StreamSource::from("screen"), StreamSource::Screen);
        assert_eq!(StreamSource::from("media"), StreamSource::Media);
        assert_eq!(StreamSource::from(""), StreamSource::Media);
    }

    #[test]
    fn test_stream_source_serde_lowercase() {
        let json = serde_json::to_string(&StreamSource::Screen).unwrap();
        assert_eq!(json, "\"screen\"");
    }

    #[test]
    fn test_hidden_video_size() {
        let size = VideoSize::hidden();
        assert_eq!(size.width, 0);
        assert_eq!(size.height, 0);
    }
}
