use crate::types::{
    CoverageMode, DecisionSink, FecPlan, NetworkStats, PolicyDecision, SampleObserver,
};
use crossbeam_channel::Receiver;
use std::cmp::Ordering;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// K handed to every plan.
    pub num_media_packets: u32,
    /// R the engine starts from (usually the scenario's static R).
    pub initial_repair: u32,
    pub min_repair: u32,
    pub max_repair: u32,
    /// EWMA factor applied to incoming window-loss samples.
    pub loss_smoothing: f64,
    /// Consecutive ticks a higher loss tier must hold before R is raised.
    pub raise_hold_ticks: u32,
    /// Consecutive ticks a lower loss tier must hold before R is lowered.
    pub lower_hold_ticks: u32,
    /// Current bitrate above this fraction of the estimate counts as
    /// headroom pressure and sheds repair immediately.
    pub headroom_factor: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_media_packets: 10,
            initial_repair: 2,
            min_repair: 0,
            max_repair: 5,
            loss_smoothing: 0.3,
            raise_hold_ticks: 2,
            lower_hold_ticks: 3,
            headroom_factor: 0.92,
        }
    }
}

/// Maps smoothed loss onto a repair count. Thresholds widen with loss so a
/// noisy window sample cannot flap across several tiers at once.
fn repair_tier(loss: f64) -> u32 {
    if loss < 0.001 {
        0
    } else if loss < 0.01 {
        1
    } else if loss < 0.03 {
        2
    } else if loss < 0.06 {
        3
    } else if loss < 0.10 {
        4
    } else {
        5
    }
}

/// Adaptive FEC policy engine. Consumes one [`NetworkStats`] sample per
/// kernel tick from a rendezvous channel, publishes a decision to the sink
/// whenever the effective configuration changes, and invokes the observer on
/// every sample so the kernel can keep virtual time synchronous with engine
/// progress. Returns when the stats channel closes.
pub struct Engine {
    cfg: EngineConfig,
    stats_rx: Receiver<NetworkStats>,
    sink: Box<dyn DecisionSink>,
    observer: Box<dyn SampleObserver>,

    smoothed_loss: f64,
    have_sample: bool,
    current_repair: u32,
    raise_hold: u32,
    lower_hold: u32,
    last_published: Option<FecPlan>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        stats_rx: Receiver<NetworkStats>,
        sink: Box<dyn DecisionSink>,
        observer: Box<dyn SampleObserver>,
    ) -> Self {
        let current_repair = cfg.initial_repair.clamp(cfg.min_repair, cfg.max_repair);
        Self {
            cfg,
            stats_rx,
            sink,
            observer,
            smoothed_loss: 0.0,
            have_sample: false,
            current_repair,
            raise_hold: 0,
            lower_hold: 0,
            last_published: None,
        }
    }

    pub fn run(mut self) {
        info!("policy engine running");
        while let Ok(stats) = self.stats_rx.recv() {
            self.handle_sample(&stats);
        }
        debug!("stats channel closed, policy engine stopping");
    }

    fn handle_sample(&mut self, stats: &NetworkStats) {
        let plan = self.evaluate(stats);
        let changed = self
            .last_published
            .as_ref()
            .map_or(true, |prev| !prev.same_config(&plan));

        if changed {
            debug!(
                r = plan.num_fec_packets,
                enabled = plan.enabled,
                reason = %plan.reason,
                "publishing fec decision"
            );
            self.sink.publish(&PolicyDecision { fec: plan.clone() });
            self.last_published = Some(plan.clone());
        }
        self.observer
            .on_sample(stats, &PolicyDecision { fec: plan }, changed);
    }

    fn evaluate(&mut self, stats: &NetworkStats) -> FecPlan {
        if self.have_sample {
            self.smoothed_loss = self.cfg.loss_smoothing * stats.loss_rate
                + (1.0 - self.cfg.loss_smoothing) * self.smoothed_loss;
        } else {
            self.smoothed_loss = stats.loss_rate;
            self.have_sample = true;
        }

        let reason;
        let pressured = stats.target_bitrate > 0.0
            && stats.current_bitrate > self.cfg.headroom_factor * stats.target_bitrate;

        if pressured {
            // Close to (or over) the estimate: shed repair before anything
            // else, one step per tick, no hold.
            if self.current_repair > self.cfg.min_repair {
                self.current_repair -= 1;
            }
            self.raise_hold = 0;
            self.lower_hold = 0;
            reason = "headroom_pressure";
        } else {
            let target = repair_tier(self.smoothed_loss)
                .clamp(self.cfg.min_repair, self.cfg.max_repair);
            match target.cmp(&self.current_repair) {
                Ordering::Greater => {
                    self.lower_hold = 0;
                    self.raise_hold += 1;
                    if self.raise_hold >= self.cfg.raise_hold_ticks {
                        self.current_repair += 1;
                        self.raise_hold = 0;
                    }
                    reason = "loss_increase";
                }
                Ordering::Less => {
                    self.raise_hold = 0;
                    self.lower_hold += 1;
                    if self.lower_hold >= self.cfg.lower_hold_ticks {
                        self.current_repair -= 1;
                        self.lower_hold = 0;
                    }
                    reason = "loss_decrease";
                }
                Ordering::Equal => {
                    self.raise_hold = 0;
                    self.lower_hold = 0;
                    reason = "steady";
                }
            }
        }

        self.plan(reason)
    }

    fn plan(&self, reason: &str) -> FecPlan {
        let r = self.current_repair;
        let k = self.cfg.num_media_packets;
        // With two or more repairs, interleave so disjoint sub-windows can
        // each recover one loss.
        let (coverage_mode, interleave_stride) = if r >= 2 {
            (CoverageMode::Interleaved, r)
        } else {
            (CoverageMode::Window, 0)
        };
        FecPlan {
            enabled: r > 0,
            num_media_packets: k,
            num_fec_packets: r,
            target_overhead: if k > 0 { r as f64 / k as f64 } else { 0.0 },
            coverage_mode,
            interleave_stride,
            burst_span: 0,
            reason: reason.to_string(),
        }
    }
}
