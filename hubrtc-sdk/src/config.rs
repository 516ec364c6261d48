//! SDK Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SDK configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Base URL of the hub service, e.g. `https://hub.example.com/v1`
    pub hub_base_url: String,
    /// STUN/TURN server URLs handed to the peer-connection primitive
    pub ice_servers: Vec<String>,
    /// Interval between transport statistics samples (floored at 1s)
    #[serde(with = "duration_secs")]
    pub stats_interval: Duration,
    /// Minimum gap between two `video_size` reports for the same track
    #[serde(with = "duration_secs")]
    pub video_size_report_interval: Duration,
    /// Delay before reconnecting a signaling channel that failed fast
    #[serde(with = "duration_secs")]
    pub reconnect_delay: Duration,
    /// A channel that errors within this window of opening is treated
    /// as fast-failing and waits `reconnect_delay` before retrying
    #[serde(with = "duration_secs")]
    pub fast_failure_window: Duration,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            hub_base_url: "http://localhost:8080".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            stats_interval: Duration::from_secs(3),
            video_size_report_interval: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(3),
            fast_failure_window: Duration::from_secs(1),
        }
    }
}

impl SdkConfig {
    /// Stats sampling interval with the 1s floor applied. Two samples
    /// are never taken closer together than this.
    #[must_use]
    pub fn effective_stats_interval(&self) -> Duration {
        self.stats_interval.max(Duration::from_secs(1))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
