//! Bandwidth statistics sampling
//!
//! Samples the peer-connection transport statistics on an interval and
//! derives the available outgoing bitrate plus per-track bitrates. The
//! delta math lives in [`StatsLedger`], which has no dependency on the
//! peer-connection primitive so it can be tested directly.

use crate::types::{StreamSource, TrackId, TrackKind};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Latest sample for one inbound track
#[derive(Debug, Clone)]
pub struct InboundTrackStat {
    pub kind: TrackKind,
    pub source: StreamSource,
    pub bytes_received: u64,
    /// bits per second; 0 until a second sample exists
    pub bitrate: u64,
    pub last_sampled: Instant,
}

/// Latest sample for one outbound track
#[derive(Debug, Clone)]
pub struct OutboundTrackStat {
    pub kind: TrackKind,
    /// Simulcast layer id; empty string when non-simulcast
    pub rid: String,
    pub bytes_sent: u64,
    pub bitrate: u64,
    pub last_sampled: Instant,
}

/// Bitrate from two cumulative byte counters sampled `elapsed` apart:
/// `(Δbytes * 8 / Δms) * 1000` bits per second.
#[must_use]
pub(crate) fn compute_bitrate(prev_bytes: u64, bytes: u64, elapsed: Duration) -> u64 {
    let delta = bytes.saturating_sub(prev_bytes);
    let elapsed_ms = elapsed.as_millis() as u64;
    if elapsed_ms == 0 {
        return 0;
    }
    (delta as f64 * 8.0 / elapsed_ms as f64 * 1000.0) as u64
}

/// Per-track accumulators plus the available-bandwidth estimate.
/// Entries are created lazily on first observation and never removed;
/// the whole ledger is dropped with the controller at disconnect.
#[derive(Default)]
pub(crate) struct StatsLedger {
    inbound: DashMap<String, InboundTrackStat>,
    outbound: DashMap<String, OutboundTrackStat>,
    available: RwLock<Option<u64>>,
}

impl StatsLedger {
    pub fn record_inbound(
        &self,
        id: &str,
        kind: TrackKind,
        source: StreamSource,
        bytes_received: u64,
        now: Instant,
    ) {
        match self.inbound.get_mut(id) {
            Some(mut entry) => {
                let elapsed = now.duration_since(entry.last_sampled);
                entry.bitrate = compute_bitrate(entry.bytes_received, bytes_received, elapsed);
                entry.bytes_received = bytes_received;
                entry.last_sampled = now;
                entry.source = source;
            }
            None => {
                // First observation seeds the counters; no delta yet
                self.inbound.insert(
                    id.to_string(),
                    InboundTrackStat {
                        kind,
                        source,
                        bytes_received,
                        bitrate: 0,
                        last_sampled: now,
                    },
                );
            }
        }
    }

    pub fn record_outbound(
        &self,
        id: &str,
        kind: TrackKind,
        rid: String,
        bytes_sent: u64,
        now: Instant,
    ) {
        match self.outbound.get_mut(id) {
            Some(mut entry) => {
                let elapsed = now.duration_since(entry.last_sampled);
                entry.bitrate = compute_bitrate(entry.bytes_sent, bytes_sent, elapsed);
                entry.bytes_sent = bytes_sent;
                entry.last_sampled = now;
                entry.rid = rid;
            }
            None => {
                self.outbound.insert(
                    id.to_string(),
                    OutboundTrackStat {
                        kind,
                        rid,
                        bytes_sent,
                        bitrate: 0,
                        last_sampled: now,
                    },
                );
            }
        }
    }

    pub fn set_available(&self, bits_per_sec: u64) {
        *self.available.write() = Some(bits_per_sec);
    }

    pub fn available(&self) -> Option<u64> {
        *self.available.read()
    }

    pub fn inbound_stat(&self, id: &str) -> Option<InboundTrackStat> {
        self.inbound.get(id).map(|e| e.clone())
    }

    pub fn outbound_stat(&self, id: &str) -> Option<OutboundTrackStat> {
        self.outbound.get(id).map(|e| e.clone())
    }

    pub fn video_outbound_count(&self) -> usize {
        self.outbound
            .iter()
            .filter(|e| e.kind == TrackKind::Video)
            .count()
    }

    pub fn audio_outbound_count(&self) -> usize {
        self.outbound
            .iter()
            .filter(|e| e.kind == TrackKind::Audio)
            .count()
    }

    /// Sum of outbound video bitrates across simulcast layers. Returns
    /// `None` when any contributing track's latest bitrate is 0: a zero
    /// means "not yet measurable", and a partial sum would be
    /// misleading rather than merely imprecise.
    pub fn total_video_outbound_bitrate(&self) -> Option<u64> {
        let mut total = 0u64;
        for entry in &self.outbound {
            if entry.kind != TrackKind::Video {
                continue;
            }
            if entry.bitrate == 0 {
                return None;
            }
            total += entry.bitrate;
        }
        Some(total)
    }
}

/// Samples one peer connection's statistics on a fixed interval
pub struct BandwidthController {
    pc: Arc<RTCPeerConnection>,
    ledger: StatsLedger,
    /// ssrc → (track id, source) learned from track attaches, used to
    /// label inbound RTP reports
    remote_tracks: DashMap<u32, (TrackId, StreamSource)>,
    last_sample: Mutex<Instant>,
    interval: Duration,
    cancel: CancellationToken,
}

/// Minimum gap between two samples regardless of who requests them
const MIN_SAMPLE_GAP: Duration = Duration::from_millis(1000);

impl BandwidthController {
    #[must_use]
    pub fn new(pc: Arc<RTCPeerConnection>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            pc,
            ledger: StatsLedger::default(),
            remote_tracks: DashMap::new(),
            // Allow the first sample to run immediately
            last_sample: Mutex::new(Instant::now() - MIN_SAMPLE_GAP),
            interval: interval.max(MIN_SAMPLE_GAP),
            cancel: CancellationToken::new(),
        })
    }

    /// Start the periodic sampling task
    pub fn spawn_sampler(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => this.sample().await,
                }
            }
            debug!("Bandwidth sampler stopped");
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Label inbound stats for a newly-attached remote track
    pub fn register_remote_track(&self, ssrc: u32, track_id: TrackId, source: StreamSource) {
        self.remote_tracks.insert(ssrc, (track_id, source));
    }

    /// Pull a fresh statistics report and fold it into the ledger.
    /// No-op when the previous sample is less than 1s old.
    pub async fn sample(&self) {
        {
            let mut last = self.last_sample.lock();
            let now = Instant::now();
            if now.duration_since(*last) < MIN_SAMPLE_GAP {
                trace!("Skipping sample inside minimum gap");
                return;
            }
            *last = now;
        }

        let report = self.pc.get_stats().await;
        let now = Instant::now();

        for (id, report_type) in report.reports {
            match report_type {
                StatsReportType::InboundRTP(stats) => {
                    let kind = TrackKind::from(&*stats.kind);
                    let (key, source) = match self.remote_tracks.get(&stats.ssrc) {
                        Some(entry) => (entry.0.to_string(), entry.1),
                        None => (id.clone(), StreamSource::Media),
                    };
                    self.ledger
                        .record_inbound(&key, kind, source, stats.bytes_received, now);
                }
                StatsReportType::OutboundRTP(stats) => {
                    let kind = TrackKind::from(&*stats.kind);
                    // Absent rid means non-simulcast; keep the empty string
                    let rid = stats
                        .rid
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    self.ledger
                        .record_outbound(&id, kind, rid, stats.bytes_sent, now);
                }
                StatsReportType::CandidatePair(stats) => {
                    if stats.available_outgoing_bitrate > 0.0 {
                        self.ledger
                            .set_available(stats.available_outgoing_bitrate as u64);
                    }
                }
                _ => {}
            }
        }
    }

    /// Force a fresh sample (subject to the 1s gap) and return the
    /// current available-outgoing-bandwidth estimate, bits per second.
    /// `None` means "unknown", never zero.
    pub async fn available(&self) -> Option<u64> {
        self.sample().await;
        self.ledger.available()
    }

    #[must_use]
    pub fn video_outbound_track_count(&self) -> usize {
        self.ledger.video_outbound_count()
    }

    #[must_use]
    pub fn audio_outbound_track_count(&self) -> usize {
        self.ledger.audio_outbound_count()
    }

    /// Aggregate outbound video bitrate; `None` while any layer is
    /// still unmeasurable.
    #[must_use]
    pub fn total_video_outbound_bitrate(&self) -> Option<u64> {
        self.ledger.total_video_outbound_bitrate()
    }

    #[must_use]
    pub fn inbound_stat(&self, track_id: &str) -> Option<InboundTrackStat> {
        self.ledger.inbound_stat(track_id)
    }

    #[must_use]
    pub fn outbound_stat(&self, id: &str) -> Option<OutboundTrackStat> {
        self.ledger.outbound_stat(id)
    }
}

impl Drop for BandwidthController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_math() {
        // 1000 bytes over 1000ms: (1000*8/1000)*1000 = 8000 bits/s
        assert_eq!(
            compute_bitrate(1000, 2000, Duration::from_millis(1000)),
            8000
        );
        // Same delta over 500ms doubles the rate
        assert_eq!(
            compute_bitrate(1000, 2000, Duration::from_millis(500)),
            16000
        );
    }

    #[test]
    fn test_bitrate_zero_elapsed() {
        assert_eq!(compute_bitrate(0, 1000, Duration::ZERO), 0);
    }

    #[test]
    fn test_bitrate_counter_reset_does_not_underflow() {
        assert_eq!(compute_bitrate(5000, 100, Duration::from_millis(1000)), 0);
    }

    #[test]
    fn test_first_observation_seeds_only() {
        let ledger = StatsLedger::default();
        let t0 = Instant::now();
        ledger.record_inbound("t1", TrackKind::Video, StreamSource::Media, 1000, t0);

        let stat = ledger.inbound_stat("t1").unwrap();
        assert_eq!(stat.bitrate, 0);
        assert_eq!(stat.bytes_received, 1000);
    }

    #[test]
    fn test_second_sample_computes_delta() {
        let ledger = StatsLedger::default();
        let t0 = Instant::now();
        ledger.record_inbound("t1", TrackKind::Video, StreamSource::Media, 1000, t0);
        ledger.record_inbound(
            "t1",
            TrackKind::Video,
            StreamSource::Media,
            2000,
            t0 + Duration::from_millis(1000),
        );

        let stat = ledger.inbound_stat("t1").unwrap();
        assert_eq!(stat.bitrate, 8000);
        assert_eq!(stat.bytes_received, 2000);
    }

    #[test]
    fn test_outbound_tracks_rid() {
        let ledger = StatsLedger::default();
        let t0 = Instant::now();
        ledger.record_outbound("o1", TrackKind::Video, "h".to_string(), 500, t0);

        let stat = ledger.outbound_stat("o1").unwrap();
        assert_eq!(stat.rid, "h");
        assert_eq!(stat.bitrate, 0);
    }

    #[test]
    fn test_outbound_counts_by_kind() {
        let ledger = StatsLedger::default();
        let t0 = Instant::now();
        ledger.record_outbound("v1", TrackKind::Video, String::new(), 100, t0);
        ledger.record_outbound("v2", TrackKind::Video, String::new(), 100, t0);
        ledger.record_outbound("a1", TrackKind::Audio, String::new(), 100, t0);

        assert_eq!(ledger.video_outbound_count(), 2);
        assert_eq!(ledger.audio_outbound_count(), 1);
    }

    #[test]
    fn test_aggregate_none_while_any_track_unmeasured() {
        let ledger = StatsLedger::default();
        let t0 = Instant::now();
        ledger.record_outbound("v1", TrackKind::Video, "h".to_string(), 1000, t0);
        ledger.record_outbound("v2", TrackKind::Video, "l".to_string(), 1000, t0);

        // Both layers only seeded: no estimate
        assert_eq!(ledger.total_video_outbound_bitrate(), None);

        let t1 = t0 + Duration::from_millis(1000);
        ledger.record_outbound("v1", TrackKind::Video, "h".to_string(), 2000, t1);

        // v1 measurable, v2 still zero: still no estimate rather than
        // a partial sum
        assert_eq!(ledger.total_video_outbound_bitrate(), None);

        ledger.record_outbound("v2", TrackKind::Video, "l".to_string(), 1500, t1);
        assert_eq!(ledger.total_video_outbound_bitrate(), Some(8000 + 4000));
    }

    #[test]
    fn test_aggregate_ignores_audio() {
        let ledger = StatsLedger::default();
        let t0 = Instant::now();
        ledger.record_outbound("a1", TrackKind::Audio, String::new(), 0, t0);
        // No video tracks at all: an empty sum is a valid zero
        assert_eq!(ledger.total_video_outbound_bitrate(), Some(0));
    }

    #[test]
    fn test_available_unset_is_none() {
        let ledger = StatsLedger::default();
        assert_eq!(ledger.available(), None);
        ledger.set_available(250_000);
        assert_eq!(ledger.available(), Some(250_000));
    }
}
