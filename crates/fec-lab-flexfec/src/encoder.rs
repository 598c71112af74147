use crate::bus::RuntimeBus;
use crate::header::{encode_mask, FIXED_LEN};
use fec_lab_abstract::{Header, Packet, RtpIds, HEADER_LEN};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Which media packets of a source window each repair packet covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoverageMode {
    /// Every repair covers the whole window.
    #[default]
    Window,
    /// Repair j covers the offsets congruent to j modulo the stride, giving
    /// disjoint sub-windows that can each recover one loss.
    Interleaved,
    /// Repairs cover contiguous spans of `burst_span` packets.
    Burst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub enabled: bool,
    /// K: source packets per window.
    pub num_media_packets: u32,
    /// R: repair packets per window.
    pub num_fec_packets: u32,
    pub coverage_mode: CoverageMode,
    pub interleave_stride: u32,
    pub burst_span: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_media_packets: 10,
            num_fec_packets: 0,
            coverage_mode: CoverageMode::Window,
            interleave_stride: 0,
            burst_span: 0,
        }
    }
}

/// FlexFEC-03 encoder bound to one media stream. Media packets written
/// through [`FecEncoder::write`] are forwarded unmodified to the sink on the
/// same call; after every K buffered media packets, R repair packets are
/// synthesised and written to the same sink with the repair SSRC/PT. Config
/// updates published on the bus take effect at the next window boundary and
/// never drop media in flight.
pub struct FecEncoder {
    ids: RtpIds,
    cfg: RuntimeConfig,
    bus: Option<Arc<RuntimeBus>>,
    seen_version: u64,
    window: Vec<Packet>,
    next_repair_seq: u16,
}

impl FecEncoder {
    pub fn new(ids: RtpIds, cfg: RuntimeConfig) -> Self {
        Self {
            ids,
            cfg,
            bus: None,
            seen_version: 0,
            window: Vec::new(),
            next_repair_seq: 1,
        }
    }

    pub fn with_bus(mut self, bus: Arc<RuntimeBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.cfg
    }

    pub fn write(&mut self, pkt: Packet, sink: &mut dyn FnMut(Packet)) {
        if self.window.is_empty() {
            self.refresh_config();
        }

        if pkt.header.ssrc != self.ids.media_ssrc {
            sink(pkt);
            return;
        }

        let protecting =
            self.cfg.enabled && self.cfg.num_fec_packets > 0 && self.cfg.num_media_packets > 0;
        if !protecting {
            sink(pkt);
            return;
        }

        sink(pkt.clone());
        self.window.push(pkt);
        if self.window.len() >= self.cfg.num_media_packets as usize {
            self.emit_repairs(sink);
            self.window.clear();
        }
    }

    fn refresh_config(&mut self) {
        if let Some(bus) = &self.bus {
            if let Some((version, cfg)) = bus.poll(self.ids.media_ssrc, self.seen_version) {
                debug!(
                    version,
                    enabled = cfg.enabled,
                    k = cfg.num_media_packets,
                    r = cfg.num_fec_packets,
                    "applying runtime fec config"
                );
                self.seen_version = version;
                self.cfg = cfg;
            }
        }
    }

    fn emit_repairs(&mut self, sink: &mut dyn FnMut(Packet)) {
        let last_ts = match self.window.last() {
            Some(p) => p.header.timestamp,
            None => return,
        };
        for j in 0..self.cfg.num_fec_packets as usize {
            let covered = self.coverage(j);
            if covered.is_empty() {
                continue;
            }
            let payload = build_repair_payload(&self.window, &covered);
            let header = Header::new(self.ids.fec_pt, self.next_repair_seq, last_ts, self.ids.fec_ssrc);
            self.next_repair_seq = self.next_repair_seq.wrapping_add(1);
            sink(Packet::new(header, payload));
        }
    }

    /// Window indices covered by repair `j` under the current coverage mode.
    fn coverage(&self, j: usize) -> Vec<usize> {
        let k = self.window.len();
        match self.cfg.coverage_mode {
            CoverageMode::Window => (0..k).collect(),
            CoverageMode::Interleaved => {
                let stride = (self.cfg.interleave_stride.max(1)) as usize;
                (0..k).filter(|i| i % stride == j % stride).collect()
            }
            CoverageMode::Burst => {
                let span = (self.cfg.burst_span.max(1)) as usize;
                let groups = k.div_ceil(span);
                let g = j % groups;
                (g * span..(g * span + span).min(k)).collect()
            }
        }
    }
}

/// XOR the covered media packets into a FlexFEC-03 repair payload: header
/// recovery fields (with length recovery substituted at bytes 2..3), the
/// fixed protection block, the coverage mask and the XORed payload region.
fn build_repair_payload(group: &[Packet], covered: &[usize]) -> Vec<u8> {
    let base = group[covered[0]].header.sequence_number;
    let offsets: Vec<u16> = covered
        .iter()
        .map(|&i| group[i].header.sequence_number.wrapping_sub(base))
        .collect();
    let mask = encode_mask(&offsets);
    let payload_len = covered
        .iter()
        .map(|&i| group[i].payload.len())
        .max()
        .unwrap_or(0);

    let payload_offset = FIXED_LEN + mask.len();
    let mut buf = vec![0u8; payload_offset + payload_len];

    for &i in covered {
        let pkt = &group[i];
        let mut hb = pkt.header.marshal();
        hb[2..4].copy_from_slice(&((pkt.marshal_size() - HEADER_LEN) as u16).to_be_bytes());
        for b in 0..8 {
            buf[b] ^= hb[b];
        }
        for (bi, byte) in pkt.payload.iter().enumerate() {
            buf[payload_offset + bi] ^= byte;
        }
    }

    buf[0] &= 0x3f; // R=0, F=0
    buf[8] = 1; // single protected ssrc
    buf[12..16].copy_from_slice(&group[covered[0]].header.ssrc.to_be_bytes());
    buf[16..18].copy_from_slice(&base.to_be_bytes());
    buf[18..18 + mask.len()].copy_from_slice(&mask);
    buf
}
