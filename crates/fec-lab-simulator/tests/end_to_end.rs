use fec_lab_abstract::rng::make_payload;
use fec_lab_abstract::{Header, Mode, Packet, RtpIds, Scenario};
use fec_lab_flexfec::{FecEncoder, FlexFec03Decoder, RuntimeConfig};
use fec_lab_simulator::{
    run_scenario, scenarios, MemoryRecorder, RunOptions, RunResult, TimeSample,
};
use std::time::Duration;

fn run(sc: &Scenario, mode: Mode, seed: u64) -> (RunResult, Vec<TimeSample>) {
    let mut rec = MemoryRecorder::new();
    let res = run_scenario(
        sc,
        RunOptions {
            mode,
            seed,
            recorder: Some(&mut rec),
        },
    )
    .expect("run failed");
    let samples = rec.samples().to_vec();
    (res, samples)
}

fn mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    sum / n as f64
}

#[test]
fn identical_runs_are_identical() {
    for mode in [Mode::Static, Mode::Adaptive] {
        let sc = scenarios::by_name("bernoulli_2pct").unwrap();
        let (res_a, samples_a) = run(&sc, mode, 7);
        let (res_b, samples_b) = run(&sc, mode, 7);
        assert_eq!(res_a, res_b);
        assert_eq!(samples_a, samples_b);
        assert_eq!(samples_a.len(), 50);
    }
}

#[test]
fn different_seeds_diverge() {
    let sc = scenarios::by_name("bernoulli_8pct").unwrap();
    let (a, samples_a) = run(&sc, Mode::Static, 1);
    let (_, samples_b) = run(&sc, Mode::Static, 2);
    assert_ne!(a.dropped_media_pkts, 0);
    assert_ne!(samples_a, samples_b, "seeds must produce different drop patterns");
}

#[test]
fn sent_equals_dropped_plus_delivered() {
    for sc in scenarios::default_scenarios() {
        for mode in [Mode::Static, Mode::Adaptive] {
            for seed in 1..=3 {
                let (res, _) = run(&sc, mode, seed);
                assert_eq!(
                    res.sent_media_pkts,
                    res.dropped_media_pkts + res.recv_media_pkts,
                    "media identity violated in {} ({mode})",
                    sc.name
                );
                assert_eq!(
                    res.sent_fec_pkts,
                    res.dropped_fec_pkts + res.recv_fec_pkts,
                    "repair identity violated in {} ({mode})",
                    sc.name
                );
            }
        }
    }
}

#[test]
fn static_overhead_respects_the_window_bound() {
    for sc in scenarios::default_scenarios() {
        let (res, _) = run(&sc, Mode::Static, 1);
        let windows = (res.sent_media_pkts as u64).div_ceil(sc.k as u64);
        assert!(
            res.sent_fec_pkts as u64 <= windows * sc.static_r as u64,
            "overhead bound violated in {}",
            sc.name
        );
    }
}

#[test]
fn deadline_loss_is_never_below_total_loss() {
    for sc in scenarios::default_scenarios() {
        for mode in [Mode::Static, Mode::Adaptive] {
            let (res, _) = run(&sc, mode, 1);
            assert!(
                res.final_loss_deadline >= res.final_loss_no_deadline,
                "deadline sanity violated in {} ({mode})",
                sc.name
            );
        }
    }
}

#[test]
fn residual_loss_is_monotone_in_drop_probability() {
    let low = scenarios::by_name("bernoulli_2pct").unwrap();
    let high = scenarios::by_name("bernoulli_8pct").unwrap();
    let mean_low = mean((1..=20).map(|s| run(&low, Mode::Static, s).0.final_loss_no_deadline));
    let mean_high = mean((1..=20).map(|s| run(&high, Mode::Static, s).0.final_loss_no_deadline));
    assert!(
        mean_high > mean_low,
        "expected residual loss to grow with p: {mean_low} vs {mean_high}"
    );
}

#[test]
fn bernoulli_2pct_static_meets_the_baseline() {
    let sc = scenarios::by_name("bernoulli_2pct").unwrap();

    let (res, _) = run(&sc, Mode::Static, 1);
    assert!(
        (res.overhead_ratio_pkts - 0.20).abs() <= 0.02,
        "packet overhead {} out of band",
        res.overhead_ratio_pkts
    );

    let mean_loss = mean((1..=20).map(|s| run(&sc, Mode::Static, s).0.final_loss_no_deadline));
    assert!(
        mean_loss < 0.005,
        "k=10/r=2 should almost always repair 2% loss, got {mean_loss}"
    );
}

/// Packet overhead between two cumulative samples.
fn window_overhead(samples: &[TimeSample], from: Duration, to: Duration) -> f64 {
    let at = |t: Duration| {
        samples
            .iter()
            .rev()
            .find(|s| s.t <= t)
            .map(|s| (s.sent_media, s.sent_fec))
            .unwrap_or((0, 0))
    };
    let (media_from, fec_from) = at(from);
    let (media_to, fec_to) = at(to);
    (fec_to - fec_from) as f64 / (media_to - media_from) as f64
}

#[test]
fn adaptive_raises_overhead_inside_the_lossy_window() {
    let sc = scenarios::by_name("loss_steps").unwrap();

    let mut early = Vec::new();
    let mut middle = Vec::new();
    let mut late = Vec::new();
    for seed in 1..=5 {
        let (_, samples) = run(&sc, Mode::Adaptive, seed);
        early.push(window_overhead(&samples, Duration::ZERO, Duration::from_secs(4)));
        middle.push(window_overhead(
            &samples,
            Duration::from_secs(4),
            Duration::from_secs(8),
        ));
        late.push(window_overhead(
            &samples,
            Duration::from_secs(8),
            Duration::from_secs(12),
        ));
    }
    let (early, middle, late) = (mean(early), mean(middle), mean(late));
    assert!(
        middle > early && middle > late,
        "adaptive overhead should peak in the 8% window: {early} / {middle} / {late}"
    );
}

#[test]
fn adaptive_beats_static_on_stepped_loss() {
    let sc = scenarios::by_name("loss_steps").unwrap();
    let static_loss =
        mean((1..=20).map(|s| run(&sc, Mode::Static, s).0.final_loss_deadline));
    let adaptive_loss =
        mean((1..=20).map(|s| run(&sc, Mode::Adaptive, s).0.final_loss_deadline));
    assert!(
        adaptive_loss < static_loss,
        "adaptive should lower deadline loss: {adaptive_loss} vs {static_loss}"
    );
}

#[test]
fn bottleneck_causes_queue_drops_only_while_constrained() {
    let sc = scenarios::by_name("bwe_bottleneck").unwrap();
    let (res, samples) = run(&sc, Mode::Static, 1);
    assert!(res.dropped_queue_pkts > 0);

    let drops_at = |t: Duration| {
        samples
            .iter()
            .rev()
            .find(|s| s.t <= t)
            .map(|s| s.queue_drops)
            .unwrap_or(0)
    };
    let before = drops_at(Duration::from_secs(4));
    let during = drops_at(Duration::from_millis(8200)) - before;
    let after = samples.last().unwrap().queue_drops - drops_at(Duration::from_millis(8200));

    assert_eq!(before, 0, "no queue pressure before the bottleneck");
    assert!(during > 0, "bottleneck must overflow the queue");
    assert_eq!(after, 0, "queue drains once capacity recovers");
}

#[test]
fn adaptive_sheds_repair_under_headroom_pressure() {
    let sc = scenarios::by_name("bwe_bottleneck").unwrap();

    let mut static_oh = Vec::new();
    let mut adaptive_oh = Vec::new();
    for seed in 1..=5 {
        let (_, s) = run(&sc, Mode::Static, seed);
        static_oh.push(window_overhead(
            &s,
            Duration::from_secs(4),
            Duration::from_secs(8),
        ));
        let (_, a) = run(&sc, Mode::Adaptive, seed);
        adaptive_oh.push(window_overhead(
            &a,
            Duration::from_secs(4),
            Duration::from_secs(8),
        ));
    }
    assert!(
        mean(adaptive_oh) <= mean(static_oh),
        "policy must not outspend static FEC inside the bottleneck"
    );
}

#[test]
fn gilbert_bursts_still_allow_some_recovery() {
    let sc = scenarios::by_name("gilbert_burst").unwrap();
    let mut recovered = 0;
    let mut unrecovered = 0;
    for seed in 1..=5 {
        let (res, _) = run(&sc, Mode::Static, seed);
        recovered += res.recovered_pkts;
        unrecovered += res.sent_media_pkts - res.unique_pkts;
    }
    assert!(recovered > 0, "isolated losses inside bursts must be repaired");
    assert!(
        unrecovered > 0,
        "burst losses should exceed single-repair capability"
    );
}

#[test]
fn adaptive_run_completes_one_engine_roundtrip_per_tick() {
    let sc = scenarios::by_name("bernoulli_2pct").unwrap();
    let (_, samples) = run(&sc, Mode::Adaptive, 1);
    // one sample per tick; the run only terminates if every push got its ack
    assert_eq!(samples.len(), 50);
    assert!(samples.iter().all(|s| s.policy_k == 10));
}

const IDS: RtpIds = RtpIds {
    media_ssrc: 1111,
    fec_ssrc: 2222,
    media_pt: 96,
    fec_pt: 97,
};

fn encode_stream(count: u16) -> Vec<Packet> {
    let mut enc = FecEncoder::new(
        IDS,
        RuntimeConfig {
            enabled: true,
            num_media_packets: 10,
            num_fec_packets: 1,
            ..Default::default()
        },
    );
    let mut out = Vec::new();
    for seq in 1..=count {
        let pkt = Packet::new(
            Header::new(IDS.media_pt, seq, seq as u32 * 3000, IDS.media_ssrc),
            make_payload(1, seq, 1200),
        );
        enc.write(pkt, &mut |p| out.push(p));
    }
    out
}

#[test]
fn decoder_recovers_every_single_loss_per_group() {
    let stream = encode_stream(100);
    let mut dec = FlexFec03Decoder::new(IDS.fec_ssrc, IDS.media_ssrc);

    let mut dropped = Vec::new();
    let mut recovered = Vec::new();
    for pkt in stream {
        let seq = pkt.header.sequence_number;
        if pkt.header.ssrc == IDS.media_ssrc && seq % 10 == 3 {
            dropped.push(seq);
            continue;
        }
        recovered.extend(dec.push(pkt));
    }

    let mut got: Vec<u16> = recovered.iter().map(|p| p.header.sequence_number).collect();
    got.sort_unstable();
    assert_eq!(got, dropped, "every dropped packet must come back");
    for pkt in &recovered {
        assert_eq!(pkt.payload, make_payload(1, pkt.header.sequence_number, 1200));
    }
}

#[test]
fn decoder_recovers_nothing_with_two_losses_per_group() {
    let stream = encode_stream(100);
    let mut dec = FlexFec03Decoder::new(IDS.fec_ssrc, IDS.media_ssrc);

    let mut recovered = Vec::new();
    for pkt in stream {
        let seq = pkt.header.sequence_number;
        if pkt.header.ssrc == IDS.media_ssrc && (seq % 10 == 3 || seq % 10 == 6) {
            continue;
        }
        recovered.extend(dec.push(pkt));
    }
    assert!(recovered.is_empty(), "one repair cannot fix a double loss");
}
