use crate::engine::SimError;
use fec_lab_abstract::{
    FloatPoint, FloatSchedule, LinkSpec, LossSpec, RtpIds, Scenario, SenderSpec,
};
use std::time::Duration;

const IDS: RtpIds = RtpIds {
    media_ssrc: 1111,
    fec_ssrc: 2222,
    media_pt: 96,
    fec_pt: 97,
};

fn base_sender() -> SenderSpec {
    SenderSpec {
        packet_rate_hz: 50,
        payload_bytes: 1200,
        start_seq: 1,
        start_ts: 1,
        timestamp_step: 3000,
        start: Duration::ZERO,
    }
}

fn base_link(loss: LossSpec, capacity: FloatSchedule) -> LinkSpec {
    LinkSpec {
        base_one_way_delay: Duration::from_millis(20),
        jitter: Duration::from_millis(5),
        max_queue_delay: Duration::from_millis(200),
        capacity_bps: Some(capacity),
        loss: Some(loss),
    }
}

fn base_scenario(name: &str, duration: Duration, link: LinkSpec, bwe: FloatSchedule) -> Scenario {
    Scenario {
        name: name.to_string(),
        duration,
        ids: IDS,
        sender: base_sender(),
        k: 10,
        static_r: 2,
        stats_interval: Duration::from_millis(200),
        bwe: Some(bwe),
        rtt_ms: 40,
        jitter_ms: 5,
        playout_deadline: Duration::from_millis(200),
        link,
    }
}

/// The static catalogue: flat Bernoulli baselines, a bursty Gilbert-Elliott
/// link, a stepped loss profile and a capacity bottleneck.
pub fn default_scenarios() -> Vec<Scenario> {
    let cap2m = FloatSchedule::flat(2_000_000.0);
    let bwe2m = FloatSchedule::flat(2_000_000.0);

    let bottleneck = FloatSchedule::new(
        2_500_000.0,
        vec![
            FloatPoint { at: Duration::ZERO, value: 2_500_000.0 },
            FloatPoint { at: Duration::from_secs(4), value: 1_200_000.0 },
            FloatPoint { at: Duration::from_secs(8), value: 2_000_000.0 },
        ],
    );

    let mut scenarios = vec![
        base_scenario(
            "bernoulli_2pct",
            Duration::from_secs(10),
            base_link(
                LossSpec::Bernoulli { schedule: FloatSchedule::flat(0.02) },
                cap2m.clone(),
            ),
            bwe2m.clone(),
        ),
        base_scenario(
            "bernoulli_8pct",
            Duration::from_secs(10),
            base_link(
                LossSpec::Bernoulli { schedule: FloatSchedule::flat(0.08) },
                cap2m.clone(),
            ),
            bwe2m.clone(),
        ),
        base_scenario(
            "gilbert_burst",
            Duration::from_secs(10),
            base_link(
                LossSpec::GilbertElliott {
                    p_gb: 0.02,
                    p_bg: 0.25,
                    p_good: 0.002,
                    p_bad: 0.35,
                },
                cap2m.clone(),
            ),
            bwe2m.clone(),
        ),
        base_scenario(
            "loss_steps",
            Duration::from_secs(12),
            base_link(
                LossSpec::Bernoulli {
                    schedule: FloatSchedule::new(
                        0.01,
                        vec![
                            FloatPoint { at: Duration::ZERO, value: 0.01 },
                            FloatPoint { at: Duration::from_secs(4), value: 0.08 },
                            FloatPoint { at: Duration::from_secs(8), value: 0.02 },
                        ],
                    ),
                },
                cap2m,
            ),
            bwe2m,
        ),
    ];

    let mut bwe_bottleneck = base_scenario(
        "bwe_bottleneck",
        Duration::from_secs(12),
        base_link(
            LossSpec::Bernoulli { schedule: FloatSchedule::flat(0.03) },
            bottleneck.clone(),
        ),
        bottleneck,
    );
    bwe_bottleneck.sender.packet_rate_hz = 120;
    scenarios.push(bwe_bottleneck);

    scenarios
}

pub fn by_name(name: &str) -> Result<Scenario, SimError> {
    default_scenarios()
        .into_iter()
        .find(|sc| sc.name == name)
        .ok_or_else(|| SimError::UnknownScenario(name.to_string()))
}
