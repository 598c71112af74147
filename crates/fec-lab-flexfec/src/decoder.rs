use crate::header::{parse_repair, FlexFecError, RepairHeader};
use fec_lab_abstract::{is_newer_seq, seq_diff, Packet, HEADER_LEN};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

const MAX_RECOVERED_BUFFER: usize = 256;

/// FlexFEC-03 decoder for a single protected stream. A repair packet with
/// exactly one unresolved protected entry reconstructs that media packet by
/// XOR; the sweep iterates because a recovered packet may complete the
/// coverage of another repair. Malformed repair packets are logged and
/// discarded, never propagated.
pub struct FlexFec03Decoder {
    /// SSRC of the repair stream.
    ssrc: u32,
    protected_ssrc: u32,

    max_media_packets: usize,
    max_fec_packets: usize,

    /// Media packets seen or recovered, ordered oldest to newest.
    recovered: Vec<Packet>,
    received_fec: Vec<FecPacketState>,
}

struct FecPacketState {
    packet: Packet,
    header: RepairHeader,
    protected: Vec<ProtectedEntry>,
}

struct ProtectedEntry {
    seq: u16,
    packet: Option<Packet>,
}

fn seq_order(a: u16, b: u16) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if is_newer_seq(a, b) {
        // b is newer than a: a sorts first
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

impl FlexFec03Decoder {
    pub fn new(ssrc: u32, protected_ssrc: u32) -> Self {
        Self {
            ssrc,
            protected_ssrc,
            max_media_packets: 200,
            max_fec_packets: 200,
            recovered: Vec::new(),
            received_fec: Vec::new(),
        }
    }

    /// Insert a packet (media or repair) and return any newly recovered media
    /// packets.
    pub fn push(&mut self, pkt: Packet) -> Vec<Packet> {
        if self.recovered.len() == self.max_media_packets {
            if let Some(back) = self.recovered.last() {
                if back.header.ssrc == pkt.header.ssrc
                    && seq_diff(pkt.header.sequence_number, back.header.sequence_number)
                        > self.max_media_packets as u16
                {
                    info!("big gap in media sequence numbers, resetting buffers");
                    self.recovered.clear();
                    self.received_fec.clear();
                }
            }
        }

        self.insert_packet(pkt);
        self.attempt_recovery()
    }

    fn insert_packet(&mut self, pkt: Packet) {
        // Age out repair packets far away from the newest incoming repair.
        if !self.received_fec.is_empty() && pkt.header.ssrc == self.ssrc {
            let seq = pkt.header.sequence_number as i32;
            let mut stale = 0;
            for st in &self.received_fec {
                if (seq - st.packet.header.sequence_number as i32).abs() > 0x3fff {
                    stale += 1;
                } else {
                    break;
                }
            }
            if stale > 0 {
                self.received_fec.drain(..stale);
            }
        }

        if pkt.header.ssrc == self.ssrc {
            self.insert_fec_packet(pkt);
        } else if pkt.header.ssrc == self.protected_ssrc {
            self.insert_media_packet(pkt);
        }

        self.discard_old_recovered();
    }

    fn insert_media_packet(&mut self, pkt: Packet) {
        if self
            .recovered
            .iter()
            .any(|rp| rp.header.sequence_number == pkt.header.sequence_number)
        {
            return;
        }
        self.update_covering_fec_packets(&pkt);
        self.recovered.push(pkt);
        self.sort_recovered();
    }

    fn update_covering_fec_packets(&mut self, pkt: &Packet) {
        for st in &mut self.received_fec {
            for entry in &mut st.protected {
                if entry.seq == pkt.header.sequence_number {
                    entry.packet = Some(pkt.clone());
                }
            }
        }
    }

    fn insert_fec_packet(&mut self, pkt: Packet) {
        if self
            .received_fec
            .iter()
            .any(|st| st.packet.header.sequence_number == pkt.header.sequence_number)
        {
            return;
        }

        let header = match parse_repair(&pkt.payload) {
            Ok(h) => h,
            Err(err) => {
                warn!(%err, "discarding malformed repair packet");
                return;
            }
        };
        if header.protected_ssrc != self.protected_ssrc {
            let err = FlexFecError::UnexpectedProtectedSsrc {
                expected: self.protected_ssrc,
                got: header.protected_ssrc,
            };
            warn!(%err, "discarding repair packet");
            return;
        }

        let protected_seqs = header.protected_seqs();
        if protected_seqs.is_empty() {
            warn!("empty repair packet mask");
            return;
        }

        // Merge the coverage list with the sorted media buffer to resolve
        // already-present packets.
        let mut protected = Vec::with_capacity(protected_seqs.len());
        let mut si = 0;
        let mut ri = 0;
        while si < protected_seqs.len() && ri < self.recovered.len() {
            let ps = protected_seqs[si];
            let rs = self.recovered[ri].header.sequence_number;
            if is_newer_seq(ps, rs) {
                protected.push(ProtectedEntry { seq: ps, packet: None });
                si += 1;
            } else if is_newer_seq(rs, ps) {
                ri += 1;
            } else {
                protected.push(ProtectedEntry {
                    seq: ps,
                    packet: Some(self.recovered[ri].clone()),
                });
                si += 1;
                ri += 1;
            }
        }
        for &ps in &protected_seqs[si..] {
            protected.push(ProtectedEntry { seq: ps, packet: None });
        }

        self.received_fec.push(FecPacketState {
            packet: pkt,
            header,
            protected,
        });
        self.received_fec.sort_by(|a, b| {
            seq_order(
                a.packet.header.sequence_number,
                b.packet.header.sequence_number,
            )
        });
        if self.received_fec.len() > self.max_fec_packets {
            self.received_fec.remove(0);
        }
    }

    fn attempt_recovery(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        loop {
            let mut progressed = false;

            for i in 0..self.received_fec.len() {
                let missing = self.received_fec[i]
                    .protected
                    .iter()
                    .filter(|e| e.packet.is_none())
                    .count();
                if missing != 1 {
                    continue;
                }

                match self.recover_packet(i) {
                    Ok(pkt) => {
                        debug!(seq = pkt.header.sequence_number, "recovered media packet");
                        out.push(pkt.clone());
                        self.recovered.push(pkt.clone());
                        self.sort_recovered();
                        self.update_covering_fec_packets(&pkt);
                        self.discard_old_recovered();
                        progressed = true;
                    }
                    Err(err) => {
                        warn!(%err, "failed to recover packet");
                    }
                }
            }

            if !progressed {
                break;
            }
        }
        out
    }

    fn recover_packet(&self, i: usize) -> Result<Packet, FlexFecError> {
        let st = &self.received_fec[i];

        let mut header_recovery = [0u8; HEADER_LEN];
        header_recovery[..10].copy_from_slice(&st.packet.payload[..10]);

        let mut missing_seq = 0u16;
        for entry in &st.protected {
            match &entry.packet {
                Some(p) => {
                    let mut hb = p.header.marshal();
                    hb[2..4].copy_from_slice(
                        &((p.marshal_size() - HEADER_LEN) as u16).to_be_bytes(),
                    );
                    for b in 0..8 {
                        header_recovery[b] ^= hb[b];
                    }
                }
                None => missing_seq = entry.seq,
            }
        }

        header_recovery[0] |= 0x80; // V=2
        header_recovery[0] &= 0xbf; // clear padding bit
        let payload_length =
            u16::from_be_bytes([header_recovery[2], header_recovery[3]]) as usize;

        header_recovery[2..4].copy_from_slice(&missing_seq.to_be_bytes());
        header_recovery[8..12].copy_from_slice(&self.protected_ssrc.to_be_bytes());

        let fec_payload = &st.packet.payload[st.header.payload_offset..];
        let mut payload_recovery = vec![0u8; payload_length];
        let n = payload_length.min(fec_payload.len());
        payload_recovery[..n].copy_from_slice(&fec_payload[..n]);

        for entry in &st.protected {
            let Some(p) = &entry.packet else { continue };
            for bi in 0..payload_length.min(p.payload.len()) {
                payload_recovery[bi] ^= p.payload[bi];
            }
        }

        let mut raw = Vec::with_capacity(HEADER_LEN + payload_length);
        raw.extend_from_slice(&header_recovery);
        raw.extend_from_slice(&payload_recovery);
        Packet::unmarshal(&raw).ok_or(FlexFecError::RecoveredTooShort)
    }

    fn sort_recovered(&mut self) {
        self.recovered
            .sort_by(|a, b| seq_order(a.header.sequence_number, b.header.sequence_number));
    }

    fn discard_old_recovered(&mut self) {
        if self.recovered.len() > MAX_RECOVERED_BUFFER {
            let excess = self.recovered.len() - MAX_RECOVERED_BUFFER;
            self.recovered.drain(..excess);
        }
    }
}
