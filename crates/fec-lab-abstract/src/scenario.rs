use crate::packet::HEADER_LEN;
use crate::schedule::FloatSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Static,
    Adaptive,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Static => "static_flexfec",
            Mode::Adaptive => "adaptive_engine",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SSRC/PT identifiers so that the link writer and the receiver can classify
/// media vs repair packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpIds {
    pub media_ssrc: u32,
    pub fec_ssrc: u32,
    pub media_pt: u8,
    pub fec_pt: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderSpec {
    pub packet_rate_hz: u32,
    pub payload_bytes: usize,
    pub start_seq: u16,
    pub start_ts: u32,
    pub timestamp_step: u32,
    /// Virtual offset of the first media packet.
    pub start: Duration,
}

impl SenderSpec {
    /// Inter-packet gap; `None` when the packet rate is invalid.
    pub fn interval(&self) -> Option<Duration> {
        if self.packet_rate_hz == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.packet_rate_hz as f64))
        }
    }

    pub fn media_bitrate_bps(&self, include_header: bool) -> f64 {
        let size = self.payload_bytes + if include_header { HEADER_LEN } else { 0 };
        self.packet_rate_hz as f64 * size as f64 * 8.0
    }
}

/// Declarative loss-model description. Model state is instantiated with the
/// run seed at run start, so Gilbert-Elliott state never leaks across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LossSpec {
    Bernoulli {
        /// Drop probability over virtual time.
        schedule: FloatSchedule,
    },
    GilbertElliott {
        /// Transition probability Good -> Bad.
        p_gb: f64,
        /// Transition probability Bad -> Good.
        p_bg: f64,
        /// Drop probability in the Good state.
        p_good: f64,
        /// Drop probability in the Bad state.
        p_bad: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub base_one_way_delay: Duration,
    /// Jitter magnitude; per-packet offsets are drawn from [-jitter, +jitter].
    pub jitter: Duration,
    /// Zero means an unbounded queue.
    pub max_queue_delay: Duration,
    /// Capacity in bits/s over virtual time; `None` means an infinite wire
    /// with zero serialization time.
    pub capacity_bps: Option<FloatSchedule>,
    pub loss: Option<LossSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub duration: Duration,
    pub ids: RtpIds,
    pub sender: SenderSpec,

    /// Source window size: media packets per repair group.
    pub k: u32,
    /// Repair packets per group in static mode (and the adaptive baseline).
    pub static_r: u32,

    pub stats_interval: Duration,
    /// Bandwidth-estimate schedule handed to the policy engine.
    pub bwe: Option<FloatSchedule>,
    pub rtt_ms: u32,
    pub jitter_ms: u32,
    pub playout_deadline: Duration,

    pub link: LinkSpec,
}
