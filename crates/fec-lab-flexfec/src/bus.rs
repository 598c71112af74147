use crate::encoder::RuntimeConfig;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process config source: a policy engine publishes versioned
/// [`RuntimeConfig`] snapshots keyed by media SSRC, and each encoder polls for
/// anything newer than what it last applied. Publishing never blocks on the
/// consumer; only the latest snapshot per stream is retained.
#[derive(Debug, Default)]
pub struct RuntimeBus {
    slots: Mutex<HashMap<u32, (u64, RuntimeConfig)>>,
}

impl RuntimeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, media_ssrc: u32, cfg: RuntimeConfig) {
        let mut slots = self.slots.lock().expect("runtime bus poisoned");
        let version = slots.get(&media_ssrc).map_or(1, |(v, _)| v + 1);
        slots.insert(media_ssrc, (version, cfg));
    }

    /// Latest snapshot for a stream if it is newer than `seen`.
    pub fn poll(&self, media_ssrc: u32, seen: u64) -> Option<(u64, RuntimeConfig)> {
        let slots = self.slots.lock().expect("runtime bus poisoned");
        match slots.get(&media_ssrc) {
            Some((version, cfg)) if *version > seen => Some((*version, cfg.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_sees_only_newer_versions() {
        let bus = RuntimeBus::new();
        assert!(bus.poll(1111, 0).is_none());

        bus.publish(1111, RuntimeConfig { num_fec_packets: 2, ..Default::default() });
        let (v1, cfg) = bus.poll(1111, 0).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(cfg.num_fec_packets, 2);
        assert!(bus.poll(1111, v1).is_none());

        bus.publish(1111, RuntimeConfig { num_fec_packets: 3, ..Default::default() });
        let (v2, cfg) = bus.poll(1111, v1).unwrap();
        assert_eq!(v2, 2);
        assert_eq!(cfg.num_fec_packets, 3);
    }

    #[test]
    fn streams_are_independent() {
        let bus = RuntimeBus::new();
        bus.publish(1111, RuntimeConfig::default());
        assert!(bus.poll(2222, 0).is_none());
    }
}
