use fec_lab_abstract::Mode;
use serde::Serialize;
use std::time::Duration;

/// End-of-run counters and derived metrics for one (scenario, mode, seed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub scenario: String,
    pub mode: Mode,
    pub seed: u64,
    pub duration: Duration,

    pub sent_media_pkts: i64,
    pub sent_fec_pkts: i64,
    pub sent_media_bytes: i64,
    pub sent_fec_bytes: i64,

    pub dropped_media_pkts: i64,
    pub dropped_fec_pkts: i64,
    pub dropped_queue_pkts: i64,
    pub dropped_wire_pkts: i64,

    pub recv_media_pkts: i64,
    pub recv_fec_pkts: i64,

    pub recovered_pkts: i64,
    pub unique_pkts: i64,

    pub good_within_deadline: i64,
    pub final_loss_no_deadline: f64,
    pub final_loss_deadline: f64,

    pub overhead_ratio_pkts: f64,
    pub overhead_ratio_bytes: f64,
}
