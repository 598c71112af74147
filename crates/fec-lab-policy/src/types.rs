use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One periodic network sample pushed by the simulation kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub rtt_ms: u32,
    pub jitter_ms: u32,
    /// Pre-FEC media loss fraction over the sample window, in [0, 1].
    pub loss_rate: f64,
    /// Bandwidth estimate in bits/s.
    pub target_bitrate: f64,
    /// Actually transmitted bits/s over the sample window.
    pub current_bitrate: f64,
    /// Virtual time of the sample.
    pub timestamp: Duration,
}

/// Coverage layout requested by a decision. Translated to the encoder's own
/// coverage enum by the bridge that wires engine and encoder together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoverageMode {
    #[default]
    Window,
    Interleaved,
    Burst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FecPlan {
    pub enabled: bool,
    pub num_media_packets: u32,
    pub num_fec_packets: u32,
    pub target_overhead: f64,
    pub coverage_mode: CoverageMode,
    pub interleave_stride: u32,
    pub burst_span: u32,
    pub reason: String,
}

impl FecPlan {
    /// Equality that ignores the human-readable reason: two plans that differ
    /// only in reason are the same configuration.
    pub fn same_config(&self, other: &FecPlan) -> bool {
        self.enabled == other.enabled
            && self.num_media_packets == other.num_media_packets
            && self.num_fec_packets == other.num_fec_packets
            && self.coverage_mode == other.coverage_mode
            && self.interleave_stride == other.interleave_stride
            && self.burst_span == other.burst_span
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub fec: FecPlan,
}

/// Receives decisions the engine publishes. Called on the engine thread.
pub trait DecisionSink: Send {
    fn publish(&self, decision: &PolicyDecision);
}

/// Notified after the engine has processed a stats sample, whether or not a
/// decision was published. This is the handshake that keeps the kernel's
/// virtual time and the engine in lockstep.
pub trait SampleObserver: Send {
    fn on_sample(&self, stats: &NetworkStats, decision: &PolicyDecision, changed: bool);
}

impl<F: Fn(&PolicyDecision) + Send> DecisionSink for F {
    fn publish(&self, decision: &PolicyDecision) {
        self(decision)
    }
}
