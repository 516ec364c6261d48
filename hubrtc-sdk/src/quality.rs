//! Video quality reporting
//!
//! Watches rendering surfaces for size and visibility changes and tells
//! the hub the resolution each remote video track is actually rendered
//! at, so upstream simulcast layer selection can follow the UI. Reports
//! travel over the `internal` data channel as `video_size` messages.

use crate::error::Result;
use crate::types::{TrackId, VideoSize};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

#[cfg(test)]
use mockall::automock;

/// What the embedder last told us about one rendering surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceState {
    pub size: VideoSize,
    pub visible: bool,
}

impl SurfaceState {
    /// The size worth reporting: the rendered size while visible,
    /// 0x0 otherwise so the hub can stop sending the layer entirely.
    #[must_use]
    pub fn desired_size(&self) -> VideoSize {
        if self.visible {
            self.size
        } else {
            VideoSize::hidden()
        }
    }
}

/// A rendering surface bound to one remote video track. The embedding
/// application owns the surface and pushes size/visibility updates into
/// it; observers receive the coalesced latest state.
pub struct VideoSurface {
    id: String,
    track_id: TrackId,
    tx: watch::Sender<SurfaceState>,
}

impl VideoSurface {
    #[must_use]
    pub fn new(track_id: TrackId) -> Self {
        let initial = SurfaceState {
            size: VideoSize::hidden(),
            visible: false,
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            id: Uuid::new_v4().to_string(),
            track_id,
            tx,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    pub fn set_size(&self, size: VideoSize) {
        self.tx.send_modify(|state| state.size = size);
    }

    pub fn set_visible(&self, visible: bool) {
        self.tx.send_modify(|state| state.visible = visible);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SurfaceState> {
        self.tx.subscribe()
    }
}

/// Payload of one `video_size` report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSizeData {
    pub track_id: String,
    pub width: u32,
    pub height: u32,
}

/// Transport for quality reports. The production implementation wraps
/// the `internal` data channel; tests substitute a mock.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Whether a report sent now would actually go out
    fn is_open(&self) -> bool;

    async fn send(&self, report: VideoSizeData) -> Result<()>;
}

/// [`ReportSink`] over an `RTCDataChannel`
pub struct DataChannelSink {
    channel: Arc<RTCDataChannel>,
}

impl DataChannelSink {
    #[must_use]
    pub fn new(channel: Arc<RTCDataChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ReportSink for DataChannelSink {
    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, report: VideoSizeData) -> Result<()> {
        let message = serde_json::json!({
            "type": "video_size",
            "data": report,
        });
        let payload = Bytes::from(serde_json::to_vec(&message)?);
        self.channel.send(&payload).await?;
        Ok(())
    }
}

/// Observes surfaces and reports desired sizes per track, at most one
/// report per track per `interval`. Reports due while the sink is
/// closed are parked per track and flushed when the sink opens.
pub struct VideoQualityReporter {
    sink: Arc<dyn ReportSink>,
    interval: Duration,
    watchers: DashMap<String, CancellationToken>,
    pending: Mutex<HashMap<String, VideoSizeData>>,
}

impl VideoQualityReporter {
    #[must_use]
    pub fn new(sink: Arc<dyn ReportSink>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            sink,
            interval,
            watchers: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Start watching a surface. Observing an already-observed surface
    /// is a no-op; the existing watcher keeps running.
    pub fn observe(self: &Arc<Self>, surface: &VideoSurface) {
        if self.watchers.contains_key(surface.id()) {
            return;
        }
        let cancel = CancellationToken::new();
        self.watchers
            .insert(surface.id().to_string(), cancel.clone());

        let this = Arc::clone(self);
        let track_id = surface.track_id().clone();
        let mut rx = surface.subscribe();
        tokio::spawn(async move {
            let mut last_sent: Option<Instant> = None;
            loop {
                // Initial state counts as a change; afterwards wait for
                // the surface to move.
                if last_sent.is_some() {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }

                if let Some(prev) = last_sent {
                    let elapsed = prev.elapsed();
                    if elapsed < this.interval {
                        // Hold the report until the window reopens; the
                        // watch channel keeps only the latest state, so
                        // intermediate sizes coalesce away.
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(this.interval - elapsed) => {}
                        }
                    }
                }

                let state = *rx.borrow_and_update();
                this.dispatch(VideoSizeData {
                    track_id: track_id.to_string(),
                    width: state.desired_size().width,
                    height: state.desired_size().height,
                })
                .await;
                last_sent = Some(Instant::now());
            }
        });
    }

    /// Stop watching a surface. Unknown surfaces are a no-op.
    pub fn unobserve(&self, surface: &VideoSurface) {
        if let Some((_, cancel)) = self.watchers.remove(surface.id()) {
            cancel.cancel();
        }
    }

    /// Stop every watcher. Parked reports are discarded with the
    /// reporter; a new session gets fresh surfaces.
    pub fn stop(&self) {
        for entry in &self.watchers {
            entry.value().cancel();
        }
        self.watchers.clear();
    }

    /// The sink became writable; flush reports parked while it was
    /// closed. Each parked track is sent exactly once.
    pub async fn mark_sink_open(&self) {
        let parked: Vec<VideoSizeData> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, report)| report).collect()
        };
        for report in parked {
            debug!(track_id = %report.track_id, "Flushing deferred video size report");
            if let Err(e) = self.sink.send(report).await {
                warn!(error = %e, "Failed to flush deferred video size report");
            }
        }
    }

    async fn dispatch(&self, report: VideoSizeData) {
        if !self.sink.is_open() {
            self.pending
                .lock()
                .insert(report.track_id.clone(), report);
            return;
        }
        if let Err(e) = self.sink.send(report).await {
            warn!(error = %e, "Failed to send video size report");
        }
    }
}
