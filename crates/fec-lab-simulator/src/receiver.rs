use fec_lab_abstract::{Packet, RtpIds};
use fec_lab_flexfec::FlexFec03Decoder;
use std::collections::HashMap;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub recv_media: i64,
    pub recv_fec: i64,
    /// Recovered media packets that were previously unseen.
    pub recovered: i64,
    /// Distinct media sequence numbers ever available (received or recovered).
    pub unique: i64,
}

/// Receiving side of the link: classifies media vs repair, records the first
/// arrival time per media sequence and feeds everything into the FlexFEC
/// decoder. Recovered packets become available at their recovery time.
pub struct Receiver {
    ids: RtpIds,
    decoder: FlexFec03Decoder,
    avail_at: HashMap<u16, Duration>,
    recv_media: i64,
    recv_fec: i64,
    recovered: i64,
}

impl Receiver {
    pub fn new(ids: RtpIds) -> Self {
        Self {
            ids,
            decoder: FlexFec03Decoder::new(ids.fec_ssrc, ids.media_ssrc),
            avail_at: HashMap::new(),
            recv_media: 0,
            recv_fec: 0,
            recovered: 0,
        }
    }

    pub fn on_packet(&mut self, pkt: Packet, arrival: Duration) {
        let is_repair =
            pkt.header.ssrc == self.ids.fec_ssrc || pkt.header.payload_type == self.ids.fec_pt;

        if is_repair {
            self.recv_fec += 1;
        } else {
            self.recv_media += 1;
            // only the first arrival counts
            self.avail_at.entry(pkt.header.sequence_number).or_insert(arrival);
        }

        for rec in self.decoder.push(pkt) {
            let seq = rec.header.sequence_number;
            if !self.avail_at.contains_key(&seq) {
                trace!(seq, "media packet recovered");
                self.avail_at.insert(seq, arrival);
                self.recovered += 1;
            }
        }
    }

    pub fn first_arrival(&self, seq: u16) -> Option<Duration> {
        self.avail_at.get(&seq).copied()
    }

    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            recv_media: self.recv_media,
            recv_fec: self.recv_fec,
            recovered: self.recovered,
            unique: self.avail_at.len() as i64,
        }
    }
}
