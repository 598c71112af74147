//! FlexFEC-03 repair-payload header: fixed fields plus a variable-length
//! coverage bitmask of one, two or three words (15, then 31, then 63 bits),
//! each extension gated by the preceding word's K-bit.

use thiserror::Error;

/// Fixed header bytes before the first mask word.
pub const FIXED_LEN: usize = 18;
/// Smallest parseable repair payload: fixed part + 2-byte mask word.
pub const MIN_REPAIR_LEN: usize = FIXED_LEN + 2;
/// Highest sequence offset a three-word mask can express.
pub const MAX_COVERED: usize = 15 + 31 + 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlexFecError {
    #[error("repair packet truncated: length {0}")]
    Truncated(usize),
    #[error("packet with retransmission bit set not supported")]
    RetransmissionBitSet,
    #[error("packet with inflexible generator matrix not supported")]
    InflexibleGeneratorMatrix,
    #[error("multiple ssrc protection not supported: count {0}")]
    MultipleSsrcProtection(u8),
    #[error("k-bit of last optional mask is set to false")]
    TerminalKBitUnset,
    #[error("repair protects unexpected ssrc: expected {expected}, got {got}")]
    UnexpectedProtectedSsrc { expected: u32, got: u32 },
    #[error("recovered packet shorter than an RTP header")]
    RecoveredTooShort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairHeader {
    pub protected_ssrc: u32,
    pub seq_base: u16,
    pub mask0: u16,
    pub mask1: u32,
    pub mask2: u64,
    /// Offset of the XORed payload region within the repair payload.
    pub payload_offset: usize,
}

impl RepairHeader {
    /// Sequence numbers covered by the concatenated mask, in ascending
    /// bit-position order.
    pub fn protected_seqs(&self) -> Vec<u16> {
        let mut out = Vec::new();
        decode_mask(self.mask0 as u64, 15, self.seq_base, &mut out);
        if self.mask1 != 0 {
            decode_mask(self.mask1 as u64, 31, self.seq_base.wrapping_add(15), &mut out);
        }
        if self.mask2 != 0 {
            decode_mask(self.mask2, 63, self.seq_base.wrapping_add(46), &mut out);
        }
        out
    }
}

fn decode_mask(mask: u64, bit_count: u16, seq_base: u16, out: &mut Vec<u16>) {
    for i in 0..bit_count {
        if (mask >> (bit_count - 1 - i)) & 1 == 1 {
            out.push(seq_base.wrapping_add(i));
        }
    }
}

pub fn parse_repair(data: &[u8]) -> Result<RepairHeader, FlexFecError> {
    if data.len() < MIN_REPAIR_LEN {
        return Err(FlexFecError::Truncated(data.len()));
    }

    if data[0] & 0x80 != 0 {
        return Err(FlexFecError::RetransmissionBitSet);
    }
    if data[0] & 0x40 != 0 {
        return Err(FlexFecError::InflexibleGeneratorMatrix);
    }

    let ssrc_count = data[8];
    if ssrc_count != 1 {
        return Err(FlexFecError::MultipleSsrcProtection(ssrc_count));
    }

    let protected_ssrc = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
    let seq_base = u16::from_be_bytes([data[16], data[17]]);

    let mask = &data[FIXED_LEN..];
    let mask0 = u16::from_be_bytes([mask[0], mask[1]]) & 0x7fff;
    let mut mask1 = 0u32;
    let mut mask2 = 0u64;

    let payload_offset;
    if mask[0] & 0x80 != 0 {
        payload_offset = FIXED_LEN + 2;
    } else {
        if data.len() < FIXED_LEN + 6 {
            return Err(FlexFecError::Truncated(data.len()));
        }
        mask1 = u32::from_be_bytes([mask[2], mask[3], mask[4], mask[5]]) & 0x7fff_ffff;
        if mask[2] & 0x80 != 0 {
            payload_offset = FIXED_LEN + 6;
        } else {
            if data.len() < FIXED_LEN + 14 {
                return Err(FlexFecError::Truncated(data.len()));
            }
            mask2 = u64::from_be_bytes([
                mask[6], mask[7], mask[8], mask[9], mask[10], mask[11], mask[12], mask[13],
            ]) & 0x7fff_ffff_ffff_ffff;
            if mask[6] & 0x80 == 0 {
                return Err(FlexFecError::TerminalKBitUnset);
            }
            payload_offset = FIXED_LEN + 14;
        }
    }

    Ok(RepairHeader {
        protected_ssrc,
        seq_base,
        mask0,
        mask1,
        mask2,
        payload_offset,
    })
}

/// Encode the coverage mask words for the given sequence offsets (relative to
/// the base). Offsets must be below [`MAX_COVERED`]; offsets beyond that are
/// silently dropped from the mask.
pub fn encode_mask(offsets: &[u16]) -> Vec<u8> {
    let mut mask0 = 0u16;
    let mut mask1 = 0u32;
    let mut mask2 = 0u64;
    let mut widest = 0;

    for &off in offsets {
        match off {
            0..=14 => mask0 |= 1 << (14 - off),
            15..=45 => {
                mask1 |= 1 << (30 - (off - 15));
                widest = widest.max(1);
            }
            46..=108 => {
                mask2 |= 1 << (62 - (off - 46));
                widest = widest.max(2);
            }
            _ => {}
        }
    }

    let mut out = Vec::with_capacity(14);
    match widest {
        0 => {
            out.extend_from_slice(&(0x8000 | mask0).to_be_bytes());
        }
        1 => {
            out.extend_from_slice(&mask0.to_be_bytes());
            out.extend_from_slice(&(0x8000_0000 | mask1).to_be_bytes());
        }
        _ => {
            out.extend_from_slice(&mask0.to_be_bytes());
            out.extend_from_slice(&mask1.to_be_bytes());
            out.extend_from_slice(&(0x8000_0000_0000_0000 | mask2).to_be_bytes());
        }
    }
    out
}
