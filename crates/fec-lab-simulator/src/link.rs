use crate::loss::{build_loss_model, LossModel, PacketMeta};
use fec_lab_abstract::rng::u01;
use fec_lab_abstract::{LinkSpec, Packet};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueOverflow,
    WireLoss,
    ZeroCapacity,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::QueueOverflow => "queue_overflow",
            DropReason::WireLoss => "wire_loss",
            DropReason::ZeroCapacity => "zero_capacity",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SendOutcome {
    pub dropped: Option<DropReason>,
    pub arrival: Option<Duration>,
    pub queue_delay: Duration,
    pub size_bytes: usize,
}

impl SendOutcome {
    fn dropped(reason: DropReason, queue_delay: Duration, size_bytes: usize) -> Self {
        Self {
            dropped: Some(reason),
            arrival: None,
            queue_delay,
            size_bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveredPacket {
    pub pkt: Packet,
    pub arrives: Duration,
    pub sent_at: Duration,
    pub size_bytes: usize,
    pub is_repair: bool,
}

#[derive(Debug)]
struct DeliveryEvent {
    at: Duration,
    id: u64, // insertion order, breaks ties at equal arrival time
    pkt: Packet,
    sent_at: Duration,
    size_bytes: usize,
    is_repair: bool,
}

impl PartialEq for DeliveryEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl Eq for DeliveryEvent {}

impl PartialOrd for DeliveryEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeliveryEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison: earliest arrival pops first from BinaryHeap
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

/// One-way link: a strict FIFO serializer (single `next_avail` wire clock)
/// followed by propagation delay, deterministic jitter and a loss model.
/// Jitter applied after serialization can reorder arrivals; the delivery heap
/// restores arrival-time order.
pub struct Link {
    spec: LinkSpec,
    start: Duration,
    seed: u64,
    loss: Option<Box<dyn LossModel>>,
    next_avail: Duration,
    heap: BinaryHeap<DeliveryEvent>,
    next_event_id: u64,
}

impl Link {
    pub fn new(spec: LinkSpec, start: Duration, seed: u64) -> Self {
        let loss = spec.loss.as_ref().map(|l| build_loss_model(l, seed));
        Self {
            spec,
            start,
            seed,
            loss,
            next_avail: start,
            heap: BinaryHeap::new(),
            next_event_id: 0,
        }
    }

    /// Capacity in bits/s at the given offset from link start; `None` for an
    /// infinite wire.
    pub fn capacity_at(&self, offset: Duration) -> Option<f64> {
        self.spec.capacity_bps.as_ref().map(|c| c.at(offset))
    }

    pub fn send(&mut self, pkt: Packet, sent_at: Duration, is_repair: bool) -> SendOutcome {
        let size_bytes = pkt.marshal_size();
        let offset = sent_at.saturating_sub(self.start);

        let cap_bps = self.capacity_at(offset);
        if cap_bps == Some(0.0) {
            return SendOutcome::dropped(DropReason::ZeroCapacity, Duration::ZERO, size_bytes);
        }

        let start_tx = sent_at.max(self.next_avail);
        let queue_delay = start_tx - sent_at;
        if !self.spec.max_queue_delay.is_zero() && queue_delay > self.spec.max_queue_delay {
            return SendOutcome::dropped(DropReason::QueueOverflow, queue_delay, size_bytes);
        }

        let serialization = match cap_bps {
            None => Duration::ZERO,
            Some(cap) => {
                let secs = if cap > 0.0 {
                    (size_bytes as f64 * 8.0) / cap
                } else {
                    // negative capacity clamps to zero serialization
                    0.0
                };
                let d = Duration::from_secs_f64(secs);
                // the wire must always advance on a finite-capacity link
                if d.is_zero() {
                    Duration::from_nanos(1)
                } else {
                    d
                }
            }
        };

        let finish_tx = start_tx + serialization;
        self.next_avail = finish_tx;

        let mut arrival = finish_tx + self.spec.base_one_way_delay;
        if !self.spec.jitter.is_zero() {
            let u = u01(self.seed, pkt.header.ssrc, pkt.header.sequence_number);
            let offset_s = (u * 2.0 - 1.0) * self.spec.jitter.as_secs_f64();
            arrival = if offset_s >= 0.0 {
                arrival + Duration::from_secs_f64(offset_s)
            } else {
                arrival.saturating_sub(Duration::from_secs_f64(-offset_s))
            };
        }

        if let Some(loss) = self.loss.as_mut() {
            let meta = PacketMeta {
                at: offset,
                ssrc: pkt.header.ssrc,
                pt: pkt.header.payload_type,
                seq: pkt.header.sequence_number,
                size_bytes,
                is_repair,
            };
            if loss.should_drop(&meta) {
                return SendOutcome::dropped(DropReason::WireLoss, queue_delay, size_bytes);
            }
        }

        self.heap.push(DeliveryEvent {
            at: arrival,
            id: self.next_event_id,
            pkt,
            sent_at,
            size_bytes,
            is_repair,
        });
        self.next_event_id += 1;

        SendOutcome {
            dropped: None,
            arrival: Some(arrival),
            queue_delay,
            size_bytes,
        }
    }

    /// Earliest pending arrival time without popping.
    pub fn peek(&self) -> Option<Duration> {
        self.heap.peek().map(|e| e.at)
    }

    pub fn next(&mut self) -> Option<DeliveredPacket> {
        let ev = self.heap.pop()?;
        Some(DeliveredPacket {
            pkt: ev.pkt,
            arrives: ev.at,
            sent_at: ev.sent_at,
            size_bytes: ev.size_bytes,
            is_repair: ev.is_repair,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fec_lab_abstract::{FloatSchedule, Header};

    fn pkt(seq: u16) -> Packet {
        Packet::new(Header::new(96, seq, 0, 1111), vec![0u8; 1188])
    }

    fn spec(capacity: Option<FloatSchedule>) -> LinkSpec {
        LinkSpec {
            base_one_way_delay: Duration::from_millis(20),
            jitter: Duration::ZERO,
            max_queue_delay: Duration::from_millis(200),
            capacity_bps: capacity,
            loss: None,
        }
    }

    #[test]
    fn infinite_capacity_has_zero_serialization() {
        let mut link = Link::new(spec(None), Duration::ZERO, 1);
        let out = link.send(pkt(1), Duration::from_secs(1), false);
        assert_eq!(out.dropped, None);
        assert_eq!(out.arrival, Some(Duration::from_millis(1020)));
        assert_eq!(out.queue_delay, Duration::ZERO);
    }

    #[test]
    fn zero_capacity_drops() {
        let mut link = Link::new(spec(Some(FloatSchedule::flat(0.0))), Duration::ZERO, 1);
        let out = link.send(pkt(1), Duration::ZERO, false);
        assert_eq!(out.dropped, Some(DropReason::ZeroCapacity));
        assert!(link.peek().is_none());
    }

    #[test]
    fn serialization_advances_the_wire() {
        // 1200 bytes at 960 kbit/s = 10 ms on the wire
        let mut link = Link::new(spec(Some(FloatSchedule::flat(960_000.0))), Duration::ZERO, 1);
        let a = link.send(pkt(1), Duration::ZERO, false);
        assert_eq!(a.arrival, Some(Duration::from_millis(30)));
        assert_eq!(a.queue_delay, Duration::ZERO);

        // sent at the same instant: waits for the wire, arrives 10 ms later
        let b = link.send(pkt(2), Duration::ZERO, false);
        assert_eq!(b.queue_delay, Duration::from_millis(10));
        assert_eq!(b.arrival, Some(Duration::from_millis(40)));
    }

    #[test]
    fn queue_overflow_drops_but_wire_state_is_untouched() {
        let mut link = Link::new(spec(Some(FloatSchedule::flat(960_000.0))), Duration::ZERO, 1);
        for seq in 0..21 {
            link.send(pkt(seq), Duration::ZERO, false);
        }
        // packet 21 would wait 210 ms > 200 ms bound
        let out = link.send(pkt(21), Duration::ZERO, false);
        assert_eq!(out.dropped, Some(DropReason::QueueOverflow));
        assert_eq!(out.queue_delay, Duration::from_millis(210));
    }

    #[test]
    fn deliveries_pop_in_arrival_order() {
        let mut s = spec(None);
        s.jitter = Duration::from_millis(5);
        let mut link = Link::new(s, Duration::ZERO, 1);
        for seq in 0..50 {
            link.send(pkt(seq), Duration::from_millis(seq as u64), false);
        }
        let mut last = Duration::ZERO;
        let mut count = 0;
        while let Some(dp) = link.next() {
            assert!(dp.arrives >= last, "heap must order by arrival");
            last = dp.arrives;
            count += 1;
        }
        assert_eq!(count, 50);
    }

    #[test]
    fn equal_arrivals_pop_in_insertion_order() {
        let mut link = Link::new(spec(None), Duration::ZERO, 1);
        for seq in 0..10 {
            link.send(pkt(seq), Duration::from_secs(1), false);
        }
        let mut seqs = Vec::new();
        while let Some(dp) = link.next() {
            seqs.push(dp.pkt.header.sequence_number);
        }
        assert_eq!(seqs, (0..10).collect::<Vec<u16>>());
    }

    #[test]
    fn tiny_packet_on_finite_link_still_serializes_one_nanosecond() {
        let mut link = Link::new(spec(Some(FloatSchedule::flat(1e15))), Duration::ZERO, 1);
        link.send(pkt(1), Duration::ZERO, false);
        let out = link.send(pkt(2), Duration::ZERO, false);
        assert_eq!(out.queue_delay, Duration::from_nanos(1));
    }

    #[test]
    fn wire_loss_consults_the_model() {
        let mut s = spec(None);
        s.loss = Some(fec_lab_abstract::LossSpec::Bernoulli {
            schedule: FloatSchedule::flat(1.0),
        });
        let mut link = Link::new(s, Duration::ZERO, 1);
        let out = link.send(pkt(1), Duration::ZERO, false);
        assert_eq!(out.dropped, Some(DropReason::WireLoss));
        assert!(link.peek().is_none());
    }
}
