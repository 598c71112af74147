use crate::link::{DropReason, Link, SendOutcome};
use crate::receiver::Receiver;
use crate::recorder::{Recorder, TimeSample};
use crate::result::RunResult;
use crossbeam_channel::{bounded, Receiver as ChannelReceiver, Sender};
use fec_lab_abstract::rng::make_payload;
use fec_lab_abstract::{Header, Mode, Packet, Scenario};
use fec_lab_flexfec::header::MAX_COVERED;
use fec_lab_flexfec::{CoverageMode, FecEncoder, RuntimeBus, RuntimeConfig};
use fec_lab_policy::{
    CoverageMode as PolicyCoverage, Engine, EngineConfig, NetworkStats, PolicyDecision,
    SampleObserver,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_PLAYOUT_DEADLINE: Duration = Duration::from_millis(200);
/// Ack slots between engine and kernel. The kernel drains one ack per tick,
/// so the first ack of a tick can never be dropped.
const OBSERVER_ACK_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("invalid fec parameters: k={k}, r={r}")]
    InvalidFecParams { k: u32, r: u32 },
    #[error("sender packet rate must be positive")]
    ZeroPacketRate,
    #[error("policy engine stopped unexpectedly")]
    EngineStopped,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct RunOptions<'a> {
    pub mode: Mode,
    pub seed: u64,
    pub recorder: Option<&'a mut dyn Recorder>,
}

/// Last decision the policy published, as the recorder sees it.
#[derive(Debug, Clone, Copy)]
struct PolicySnapshot {
    enabled: bool,
    k: u32,
    r: u32,
    overhead: f64,
}

#[derive(Debug, Default)]
struct Counters {
    sent_media: i64,
    sent_fec: i64,
    sent_media_bytes: i64,
    sent_fec_bytes: i64,

    dropped_media: i64,
    dropped_fec: i64,
    dropped_queue: i64,
    dropped_wire: i64,

    // per-stats-window deltas
    win_sent_media: i64,
    win_drop_media: i64,
    win_bytes_total: i64,
    win_queue_delay: Duration,
    win_pkts: i64,
}

impl Counters {
    /// Called once per packet emitted into the link, media and repair alike.
    fn record(&mut self, out: &SendOutcome, is_repair: bool) {
        let size = out.size_bytes as i64;
        if is_repair {
            self.sent_fec += 1;
            self.sent_fec_bytes += size;
        } else {
            self.sent_media += 1;
            self.sent_media_bytes += size;
            self.win_sent_media += 1;
        }
        self.win_bytes_total += size;
        self.win_queue_delay += out.queue_delay;
        self.win_pkts += 1;

        if let Some(reason) = out.dropped {
            if is_repair {
                self.dropped_fec += 1;
            } else {
                self.dropped_media += 1;
                self.win_drop_media += 1;
            }
            match reason {
                DropReason::QueueOverflow => self.dropped_queue += 1,
                DropReason::WireLoss | DropReason::ZeroCapacity => self.dropped_wire += 1,
            }
        }
    }

    fn reset_window(&mut self) {
        self.win_sent_media = 0;
        self.win_drop_media = 0;
        self.win_bytes_total = 0;
        self.win_queue_delay = Duration::ZERO;
        self.win_pkts = 0;
    }
}

struct AckObserver(Sender<()>);

impl SampleObserver for AckObserver {
    fn on_sample(&self, _: &NetworkStats, _: &PolicyDecision, _: bool) {
        // duplicate signals may be dropped, the first ack per tick never is
        let _ = self.0.try_send(());
    }
}

fn to_encoder_coverage(mode: PolicyCoverage) -> CoverageMode {
    match mode {
        PolicyCoverage::Window => CoverageMode::Window,
        PolicyCoverage::Interleaved => CoverageMode::Interleaved,
        PolicyCoverage::Burst => CoverageMode::Burst,
    }
}

/// Kernel side of the kernel<->engine handshake: a rendezvous stats channel,
/// a bounded ack channel and the shared policy snapshot. Decisions can only
/// arrive between a stats push and the matching ack, and the kernel reads the
/// snapshot strictly after the ack, so the snapshot needs no further
/// synchronization discipline.
struct AdaptiveBridge {
    stats_tx: Option<Sender<NetworkStats>>,
    ack_rx: ChannelReceiver<()>,
    snapshot: Arc<Mutex<PolicySnapshot>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AdaptiveBridge {
    fn start(
        sc: &Scenario,
        bus: Arc<RuntimeBus>,
        initial: PolicySnapshot,
    ) -> Result<Self, SimError> {
        let (stats_tx, stats_rx) = bounded(0);
        let (ack_tx, ack_rx) = bounded(OBSERVER_ACK_CAPACITY);
        let snapshot = Arc::new(Mutex::new(initial));

        let media_ssrc = sc.ids.media_ssrc;
        let sink_snapshot = snapshot.clone();
        let sink = move |d: &PolicyDecision| {
            let f = &d.fec;
            bus.publish(
                media_ssrc,
                RuntimeConfig {
                    enabled: f.enabled,
                    num_media_packets: f.num_media_packets,
                    num_fec_packets: f.num_fec_packets,
                    coverage_mode: to_encoder_coverage(f.coverage_mode),
                    interleave_stride: f.interleave_stride,
                    burst_span: f.burst_span,
                },
            );
            let mut snap = sink_snapshot.lock().expect("policy snapshot poisoned");
            *snap = PolicySnapshot {
                enabled: f.enabled,
                k: f.num_media_packets,
                r: f.num_fec_packets,
                overhead: f.target_overhead,
            };
        };

        let engine_cfg = EngineConfig {
            num_media_packets: sc.k,
            initial_repair: sc.static_r,
            ..EngineConfig::default()
        };
        let engine = Engine::new(
            engine_cfg,
            stats_rx,
            Box::new(sink),
            Box::new(AckObserver(ack_tx)),
        );
        let handle = thread::Builder::new()
            .name("fec-policy-engine".into())
            .spawn(move || engine.run())
            .map_err(SimError::Io)?;

        Ok(Self {
            stats_tx: Some(stats_tx),
            ack_rx,
            snapshot,
            handle: Some(handle),
        })
    }

    /// Push one sample and block until the engine has processed it.
    fn push_stats(&self, stats: NetworkStats) -> Result<(), SimError> {
        let tx = self.stats_tx.as_ref().ok_or(SimError::EngineStopped)?;
        tx.send(stats).map_err(|_| SimError::EngineStopped)?;
        self.ack_rx.recv().map_err(|_| SimError::EngineStopped)
    }

    fn snapshot(&self) -> PolicySnapshot {
        *self.snapshot.lock().expect("policy snapshot poisoned")
    }

    /// Close the stats channel and join the engine thread.
    fn shutdown(mut self) {
        self.stats_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("policy engine thread panicked");
            }
        }
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

pub fn run_scenario(sc: &Scenario, opts: RunOptions<'_>) -> Result<RunResult, SimError> {
    if sc.k == 0 || sc.k as usize > MAX_COVERED || sc.static_r > sc.k {
        return Err(SimError::InvalidFecParams {
            k: sc.k,
            r: sc.static_r,
        });
    }
    let interval = sc.sender.interval().ok_or(SimError::ZeroPacketRate)?;

    let start = sc.sender.start;
    let end = start + sc.duration;
    let stats_every = if sc.stats_interval.is_zero() {
        DEFAULT_STATS_INTERVAL
    } else {
        sc.stats_interval
    };
    let deadline = if sc.playout_deadline.is_zero() {
        DEFAULT_PLAYOUT_DEADLINE
    } else {
        sc.playout_deadline
    };

    info!(scenario = %sc.name, mode = %opts.mode, seed = opts.seed, "starting run");

    let mut link = Link::new(sc.link.clone(), start, opts.seed);
    let mut receiver = Receiver::new(sc.ids);
    let mut counters = Counters::default();
    let mut send_at: HashMap<u16, Duration> = HashMap::new();

    let bus = Arc::new(RuntimeBus::new());
    let mut encoder = FecEncoder::new(
        sc.ids,
        RuntimeConfig {
            enabled: sc.static_r > 0,
            num_media_packets: sc.k,
            num_fec_packets: sc.static_r,
            coverage_mode: CoverageMode::Window,
            interleave_stride: 0,
            burst_span: 0,
        },
    )
    .with_bus(bus.clone());

    let static_policy = PolicySnapshot {
        enabled: sc.static_r > 0,
        k: sc.k,
        r: sc.static_r,
        overhead: sc.static_r as f64 / sc.k as f64,
    };

    let bridge = match opts.mode {
        Mode::Adaptive => Some(AdaptiveBridge::start(sc, bus.clone(), static_policy)?),
        Mode::Static => None,
    };

    let mut recorder = opts.recorder;
    let mut media_sent: u64 = 0;
    let mut next_media = start;
    let mut next_stats = start + stats_every;

    loop {
        let next_delivery = link.peek();
        let media_enabled = next_media <= end;
        let stats_enabled = next_stats <= end;

        let mut next = next_delivery;
        if stats_enabled && next.map_or(true, |n| next_stats < n) {
            next = Some(next_stats);
        }
        if media_enabled && next.map_or(true, |n| next_media < n) {
            next = Some(next_media);
        }
        let Some(now) = next else { break };

        // At equal timestamps: deliveries first, then stats, then media, so a
        // tick always sees the state produced by co-timed deliveries.
        if next_delivery == Some(now) {
            if let Some(dp) = link.next() {
                receiver.on_packet(dp.pkt, dp.arrives);
            }
            continue;
        }

        if stats_enabled && now == next_stats {
            let elapsed = now - start;

            let loss = if counters.win_sent_media > 0 {
                clamp01(counters.win_drop_media as f64 / counters.win_sent_media as f64)
            } else {
                0.0
            };
            let target_bwe = sc.bwe.as_ref().map_or(0.0, |b| b.at(elapsed));
            let win_secs = stats_every.as_secs_f64();
            let current_bps = if win_secs > 0.0 {
                counters.win_bytes_total as f64 * 8.0 / win_secs
            } else {
                0.0
            };
            let queue_delay_ms = if counters.win_pkts > 0 {
                counters.win_queue_delay.as_secs_f64() * 1000.0 / counters.win_pkts as f64
            } else {
                0.0
            };

            if let Some(bridge) = bridge.as_ref() {
                bridge.push_stats(NetworkStats {
                    rtt_ms: sc.rtt_ms,
                    jitter_ms: sc.jitter_ms,
                    loss_rate: loss,
                    target_bitrate: target_bwe,
                    current_bitrate: current_bps,
                    timestamp: now,
                })?;
            }
            // strictly after the ack, so a decision for this tick is visible
            let policy = bridge.as_ref().map_or(static_policy, |b| b.snapshot());

            if let Some(rec) = recorder.as_deref_mut() {
                rec.on_sample(&TimeSample {
                    t: elapsed,
                    loss_window: loss,
                    target_bwe_bps: target_bwe,
                    media_rate_bps: sc.sender.media_bitrate_bps(true),
                    capacity_bps: link.capacity_at(elapsed).unwrap_or(0.0),
                    current_bitrate_bps: current_bps,
                    queue_delay_ms,
                    policy_enabled: policy.enabled,
                    policy_k: policy.k,
                    policy_r: policy.r,
                    policy_overhead: policy.overhead,
                    sent_media: counters.sent_media,
                    sent_fec: counters.sent_fec,
                    dropped_media: counters.dropped_media,
                    dropped_fec: counters.dropped_fec,
                    queue_drops: counters.dropped_queue,
                    wire_drops: counters.dropped_wire,
                });
            }

            counters.reset_window();
            next_stats += stats_every;
            continue;
        }

        // media generation
        let seq = sc.sender.start_seq.wrapping_add(media_sent as u16);
        let ts = sc
            .sender
            .start_ts
            .wrapping_add((media_sent as u32).wrapping_mul(sc.sender.timestamp_step));
        let header = Header::new(sc.ids.media_pt, seq, ts, sc.ids.media_ssrc);
        let payload = make_payload(opts.seed, seq, sc.sender.payload_bytes);
        send_at.insert(seq, now);
        media_sent += 1;

        {
            let link = &mut link;
            let counters = &mut counters;
            let ids = sc.ids;
            // counting happens here so every emitted packet is counted once
            let mut sink = |p: Packet| {
                let is_repair = p.header.ssrc == ids.fec_ssrc || p.header.payload_type == ids.fec_pt;
                let out = link.send(p, now, is_repair);
                counters.record(&out, is_repair);
            };
            encoder.write(Packet::new(header, payload), &mut sink);
        }

        next_media += interval;
    }

    // The queue may stretch past the end of the run: drain buffered arrivals
    // so they still contribute to the metrics.
    while let Some(dp) = link.next() {
        receiver.on_packet(dp.pkt, dp.arrives);
    }

    if let Some(bridge) = bridge {
        bridge.shutdown();
    }

    if let Some(rec) = recorder.as_deref_mut() {
        rec.close()?;
    }

    let snap = receiver.snapshot();
    debug!(
        sent_media = counters.sent_media,
        dropped_media = counters.dropped_media,
        recovered = snap.recovered,
        unique = snap.unique,
        "run finished"
    );

    let mut res = RunResult {
        scenario: sc.name.clone(),
        mode: opts.mode,
        seed: opts.seed,
        duration: sc.duration,
        sent_media_pkts: counters.sent_media,
        sent_fec_pkts: counters.sent_fec,
        sent_media_bytes: counters.sent_media_bytes,
        sent_fec_bytes: counters.sent_fec_bytes,
        dropped_media_pkts: counters.dropped_media,
        dropped_fec_pkts: counters.dropped_fec,
        dropped_queue_pkts: counters.dropped_queue,
        dropped_wire_pkts: counters.dropped_wire,
        recv_media_pkts: snap.recv_media,
        recv_fec_pkts: snap.recv_fec,
        recovered_pkts: snap.recovered,
        unique_pkts: snap.unique,
        good_within_deadline: 0,
        final_loss_no_deadline: 0.0,
        final_loss_deadline: 0.0,
        overhead_ratio_pkts: 0.0,
        overhead_ratio_bytes: 0.0,
    };

    if counters.sent_media > 0 {
        res.overhead_ratio_pkts = counters.sent_fec as f64 / counters.sent_media as f64;
        res.final_loss_no_deadline =
            clamp01(1.0 - snap.unique as f64 / counters.sent_media as f64);
    }
    if counters.sent_media_bytes > 0 {
        res.overhead_ratio_bytes =
            counters.sent_fec_bytes as f64 / counters.sent_media_bytes as f64;
    }

    let mut good: i64 = 0;
    for (seq, sent) in &send_at {
        if let Some(avail) = receiver.first_arrival(*seq) {
            if avail <= *sent + deadline {
                good += 1;
            }
        }
    }
    res.good_within_deadline = good;
    if counters.sent_media > 0 {
        res.final_loss_deadline = clamp01(1.0 - good as f64 / counters.sent_media as f64);
    }

    Ok(res)
}
