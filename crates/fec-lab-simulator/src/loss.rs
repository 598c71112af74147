use fec_lab_abstract::rng::{u01, GOLDEN_GAMMA};
use fec_lab_abstract::schedule::FloatSchedule;
use fec_lab_abstract::LossSpec;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;

/// Everything a loss model may base a drop decision on.
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    /// Virtual send offset relative to link start.
    pub at: Duration,
    pub ssrc: u32,
    pub pt: u8,
    pub seq: u16,
    pub size_bytes: usize,
    pub is_repair: bool,
}

pub trait LossModel {
    fn name(&self) -> &'static str;
    fn should_drop(&mut self, meta: &PacketMeta) -> bool;
}

/// Instantiate a model from its declarative spec with the run seed. Fresh
/// state per call, so nothing leaks between runs.
pub fn build_loss_model(spec: &LossSpec, seed: u64) -> Box<dyn LossModel> {
    match spec {
        LossSpec::Bernoulli { schedule } => {
            Box::new(ScheduledBernoulliLoss::new(seed, schedule.clone()))
        }
        LossSpec::GilbertElliott {
            p_gb,
            p_bg,
            p_good,
            p_bad,
        } => Box::new(GilbertElliottLoss::new(seed, *p_gb, *p_bg, *p_good, *p_bad)),
    }
}

/// Independent per-packet drops with a probability schedule. The draw is a
/// pure function of (seed, ssrc, seq) so replays reproduce the drop pattern.
pub struct ScheduledBernoulliLoss {
    seed: u64,
    schedule: FloatSchedule,
}

impl ScheduledBernoulliLoss {
    pub fn new(seed: u64, schedule: FloatSchedule) -> Self {
        Self { seed, schedule }
    }
}

impl LossModel for ScheduledBernoulliLoss {
    fn name(&self) -> &'static str {
        "bernoulli"
    }

    fn should_drop(&mut self, meta: &PacketMeta) -> bool {
        let p = self.schedule.at(meta.at);
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        u01(self.seed, meta.ssrc, meta.seq) < p
    }
}

/// Two-state Markov burst-loss model. Each SSRC runs its own chain and RNG
/// stream. The transition is drawn before the emission so a bad run begins on
/// the packet that caused the transition.
pub struct GilbertElliottLoss {
    seed: u64,
    p_gb: f64,
    p_bg: f64,
    p_good: f64,
    p_bad: f64,
    states: HashMap<u32, GeState>,
}

struct GeState {
    bad: bool,
    rng: StdRng,
}

impl GilbertElliottLoss {
    pub fn new(seed: u64, p_gb: f64, p_bg: f64, p_good: f64, p_bad: f64) -> Self {
        Self {
            seed,
            p_gb,
            p_bg,
            p_good,
            p_bad,
            states: HashMap::new(),
        }
    }

    fn state(&mut self, ssrc: u32) -> &mut GeState {
        let seed = self.seed ^ (ssrc as u64).wrapping_mul(GOLDEN_GAMMA);
        self.states.entry(ssrc).or_insert_with(|| GeState {
            bad: false,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl LossModel for GilbertElliottLoss {
    fn name(&self) -> &'static str {
        "gilbert"
    }

    fn should_drop(&mut self, meta: &PacketMeta) -> bool {
        let (p_gb, p_bg, p_good, p_bad) = (self.p_gb, self.p_bg, self.p_good, self.p_bad);
        let st = self.state(meta.ssrc);

        if !st.bad {
            if st.rng.random::<f64>() < p_gb {
                st.bad = true;
            }
        } else if st.rng.random::<f64>() < p_bg {
            st.bad = false;
        }

        let p = if st.bad { p_bad } else { p_good };
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        st.rng.random::<f64>() < p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(seq: u16) -> PacketMeta {
        PacketMeta {
            at: Duration::from_millis(seq as u64 * 20),
            ssrc: 1111,
            pt: 96,
            seq,
            size_bytes: 1212,
            is_repair: false,
        }
    }

    #[test]
    fn bernoulli_edge_probabilities() {
        let mut never = ScheduledBernoulliLoss::new(1, FloatSchedule::flat(0.0));
        let mut always = ScheduledBernoulliLoss::new(1, FloatSchedule::flat(1.0));
        for seq in 0..100 {
            assert!(!never.should_drop(&meta(seq)));
            assert!(always.should_drop(&meta(seq)));
        }
    }

    #[test]
    fn bernoulli_is_reproducible() {
        let mut a = ScheduledBernoulliLoss::new(7, FloatSchedule::flat(0.5));
        let mut b = ScheduledBernoulliLoss::new(7, FloatSchedule::flat(0.5));
        for seq in 0..500 {
            assert_eq!(a.should_drop(&meta(seq)), b.should_drop(&meta(seq)));
        }
    }

    #[test]
    fn bernoulli_rate_tracks_schedule() {
        use fec_lab_abstract::FloatPoint;
        let schedule = FloatSchedule::new(
            0.0,
            vec![
                FloatPoint { at: Duration::ZERO, value: 0.0 },
                FloatPoint { at: Duration::from_secs(10), value: 0.5 },
            ],
        );
        let mut model = ScheduledBernoulliLoss::new(3, schedule);

        let early: usize = (0..400).filter(|&s| model.should_drop(&meta(s))).count();
        assert_eq!(early, 0);

        // seq 500.. land past the 10 s switch point
        let late: usize = (500..900).filter(|&s| model.should_drop(&meta(s))).count();
        assert!((150..=250).contains(&late), "late drops: {late}");
    }

    #[test]
    fn gilbert_is_reproducible_per_seed() {
        let mut a = GilbertElliottLoss::new(1, 0.02, 0.25, 0.002, 0.35);
        let mut b = GilbertElliottLoss::new(1, 0.02, 0.25, 0.002, 0.35);
        let pattern_a: Vec<bool> = (0..500).map(|s| a.should_drop(&meta(s))).collect();
        let pattern_b: Vec<bool> = (0..500).map(|s| b.should_drop(&meta(s))).collect();
        assert_eq!(pattern_a, pattern_b);
    }

    #[test]
    fn gilbert_streams_are_per_ssrc() {
        let mut model = GilbertElliottLoss::new(1, 0.5, 0.5, 0.0, 1.0);
        let media: Vec<bool> = (0..200)
            .map(|s| model.should_drop(&PacketMeta { ssrc: 1111, ..meta(s) }))
            .collect();
        let mut fresh = GilbertElliottLoss::new(1, 0.5, 0.5, 0.0, 1.0);
        // interleaving a second ssrc must not change the first stream
        let mut interleaved = Vec::new();
        for s in 0..200 {
            interleaved.push(fresh.should_drop(&PacketMeta { ssrc: 1111, ..meta(s) }));
            fresh.should_drop(&PacketMeta { ssrc: 2222, ..meta(s) });
        }
        assert_eq!(media, interleaved);
    }

    #[test]
    fn gilbert_bad_state_produces_bursts() {
        // Deterministic corner: pG=0, pB=1 means drops happen exactly while
        // the chain sits in Bad, which arrives in runs.
        let mut model = GilbertElliottLoss::new(1, 0.1, 0.3, 0.0, 1.0);
        let pattern: Vec<bool> = (0..2000).map(|s| model.should_drop(&meta(s))).collect();
        let drops = pattern.iter().filter(|&&d| d).count();
        assert!(drops > 0);
        // at least one burst of two consecutive drops
        assert!(pattern.windows(2).any(|w| w[0] && w[1]));
    }
}
