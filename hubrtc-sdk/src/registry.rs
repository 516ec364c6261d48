//! Stream bookkeeping: committed streams plus out-of-order drafts
//!
//! The registry keeps two independent maps. Committed streams are the
//! authoritative set the UI renders from. Drafts hold metadata the hub
//! announced (via `tracks_available`) before the corresponding track
//! attached locally; promotion from draft to committed stream is an
//! explicit call made by the peer session, never automatic.

use crate::error::{require_non_empty, Result};
use crate::types::{StreamOrigin, StreamSource, TrackKind};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// One media track inside a stream, local or remote
#[derive(Clone)]
pub enum StreamTrack {
    Local(Arc<dyn TrackLocal + Send + Sync>),
    Remote(Arc<TrackRemote>),
}

impl StreamTrack {
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Local(track) => track.id().to_string(),
            Self::Remote(track) => track.id(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Local(track) => TrackKind::from(track.kind()),
            Self::Remote(track) => TrackKind::from(track.kind()),
        }
    }
}

impl fmt::Debug for StreamTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(track) => write!(f, "StreamTrack::Local({})", track.id()),
            Self::Remote(track) => write!(f, "StreamTrack::Remote({})", track.id()),
        }
    }
}

/// A committed media/data stream known to the registry
pub struct Stream {
    /// Stable identifier, typically the underlying media-stream id
    pub id: String,
    pub origin: StreamOrigin,
    pub source: StreamSource,
    /// Hub client that published this stream (remote streams only)
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    tracks: RwLock<Vec<StreamTrack>>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
}

impl Stream {
    #[must_use]
    pub fn new(id: impl Into<String>, origin: StreamOrigin, source: StreamSource) -> Self {
        Self {
            id: id.into(),
            origin,
            source,
            client_id: None,
            client_name: None,
            tracks: RwLock::new(Vec::new()),
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client_id: Option<String>, client_name: Option<String>) -> Self {
        self.client_id = client_id;
        self.client_name = client_name;
        self
    }

    #[must_use]
    pub fn with_tracks(self, tracks: Vec<StreamTrack>) -> Self {
        *self.tracks.write() = tracks;
        self
    }

    pub fn add_track(&self, track: StreamTrack) {
        self.tracks.write().push(track);
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<StreamTrack> {
        self.tracks.read().clone()
    }

    #[must_use]
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.read().iter().map(StreamTrack::id).collect()
    }

    #[must_use]
    pub fn contains_track(&self, track_id: &str) -> bool {
        self.tracks.read().iter().any(|t| t.id() == track_id)
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }

    #[must_use]
    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::Relaxed)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::Relaxed)
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::Relaxed);
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("source", &self.source)
            .field("client_id", &self.client_id)
            .field("track_count", &self.track_count())
            .finish()
    }
}

/// Provisional metadata for a stream whose track has not yet attached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftStream {
    pub origin: Option<StreamOrigin>,
    pub source: Option<StreamSource>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
}

impl DraftStream {
    /// Merge `other` into `self`, last write wins per field. Fields
    /// absent from `other` keep their current value.
    pub fn merge(&mut self, other: DraftStream) {
        if other.origin.is_some() {
            self.origin = other.origin;
        }
        if other.source.is_some() {
            self.source = other.source;
        }
        if other.client_id.is_some() {
            self.client_id = other.client_id;
        }
        if other.client_name.is_some() {
            self.client_name = other.client_name;
        }
    }
}

/// Authoritative set of known streams plus drafts, keyed by stream id
#[derive(Default)]
pub struct StreamRegistry {
    streams: RwLock<IndexMap<String, Arc<Stream>>>,
    drafts: RwLock<HashMap<String, DraftStream>>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a stream. Replaces any previous stream with the same id.
    pub fn add_stream(&self, stream: Stream) -> Result<Arc<Stream>> {
        require_non_empty(&stream.id, "stream id")?;
        let stream = Arc::new(stream);
        self.streams
            .write()
            .insert(stream.id.clone(), Arc::clone(&stream));
        Ok(stream)
    }

    pub fn remove_stream(&self, id: &str) -> Result<Option<Arc<Stream>>> {
        require_non_empty(id, "stream id")?;
        Ok(self.streams.write().shift_remove(id))
    }

    #[must_use]
    pub fn get_stream(&self, id: &str) -> Option<Arc<Stream>> {
        self.streams.read().get(id).cloned()
    }

    #[must_use]
    pub fn has_stream(&self, id: &str) -> bool {
        self.streams.read().contains_key(id)
    }

    /// Snapshot of all committed streams in insertion order
    #[must_use]
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.read().values().cloned().collect()
    }

    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Find the committed stream containing `track_id`, if any
    #[must_use]
    pub fn find_stream_by_track(&self, track_id: &str) -> Option<Arc<Stream>> {
        self.streams
            .read()
            .values()
            .find(|s| s.contains_track(track_id))
            .cloned()
    }

    /// Create or update a draft for `id`, merging field-wise
    pub fn add_draft(&self, id: &str, draft: DraftStream) -> Result<()> {
        require_non_empty(id, "stream id")?;
        let mut drafts = self.drafts.write();
        match drafts.get_mut(id) {
            Some(existing) => existing.merge(draft),
            None => {
                drafts.insert(id.to_string(), draft);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get_draft(&self, id: &str) -> Option<DraftStream> {
        self.drafts.read().get(id).cloned()
    }

    pub fn remove_draft(&self, id: &str) -> Option<DraftStream> {
        self.drafts.write().remove(id)
    }

    #[must_use]
    pub fn draft_count(&self) -> usize {
        self.drafts.read().len()
    }

    /// Promote the draft for `id` (if any) into a committed stream.
    /// Draft fields win over the supplied defaults; the draft entry is
    /// consumed so promotion happens exactly once.
    pub fn promote_draft(
        &self,
        id: &str,
        default_origin: StreamOrigin,
        default_source: StreamSource,
        tracks: Vec<StreamTrack>,
    ) -> Result<Arc<Stream>> {
        require_non_empty(id, "stream id")?;
        let draft = self.remove_draft(id).unwrap_or_default();

        debug!(
            stream_id = id,
            had_draft = draft != DraftStream::default(),
            "Promoting stream"
        );

        let stream = Stream::new(
            id,
            draft.origin.unwrap_or(default_origin),
            draft.source.unwrap_or(default_source),
        )
        .with_client(draft.client_id, draft.client_name)
        .with_tracks(tracks);

        self.add_stream(stream)
    }
}
