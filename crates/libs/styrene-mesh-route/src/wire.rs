//! Wire formats for RREQ/RREP/RWAIT/RERR. Little-endian, byte-packed,
//! matching the teacher's hand-rolled `Packet::from_bytes`/`to_bytes`
//! offset-tracking style rather than a derive-macro codec — these are
//! fixed, small, non-self-describing layouts.

use crate::error::RouteError;
use crate::types::{Addr, NetIdx, SeqNum};

/// RREQ flags (offset 8, bit0=G bit1=D bit2=U bit3=I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RreqFlags {
    /// Gratuitous RREP requested.
    pub gratuitous: bool,
    /// Destination-only reply.
    pub destination_only: bool,
    /// Unknown destination sequence number (no `destination_seq` field).
    pub unknown_dest_seq: bool,
    /// Intermediate-directed RREQ (TTL=1 shortcut).
    pub intermediate_directed: bool,
}

impl RreqFlags {
    fn to_byte(self) -> u8 {
        (self.gratuitous as u8)
            | ((self.destination_only as u8) << 1)
            | ((self.unknown_dest_seq as u8) << 2)
            | ((self.intermediate_directed as u8) << 3)
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            gratuitous: byte & 0b0001 != 0,
            destination_only: byte & 0b0010 != 0,
            unknown_dest_seq: byte & 0b0100 != 0,
            intermediate_directed: byte & 0b1000 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rreq {
    pub source_addr: Addr,
    pub destination_addr: Addr,
    pub source_elems: u16,
    pub hop_count: u8,
    pub rssi: i8,
    pub flags: RreqFlags,
    pub source_seq: SeqNum,
    /// Present iff `!flags.unknown_dest_seq`.
    pub destination_seq: Option<SeqNum>,
}

fn write_u24_le(out: &mut Vec<u8>, value: SeqNum) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..3]);
}

fn read_u24_le(bytes: &[u8]) -> SeqNum {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

impl Rreq {
    pub const MIN_LEN: usize = 12;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(15);
        out.extend_from_slice(&self.source_addr.to_le_bytes());
        out.extend_from_slice(&self.destination_addr.to_le_bytes());
        out.extend_from_slice(&self.source_elems.to_le_bytes());
        out.push(self.hop_count);
        out.push(self.rssi as u8);
        out.push(self.flags.to_byte());
        write_u24_le(&mut out, self.source_seq);
        if let Some(dest_seq) = self.destination_seq {
            write_u24_le(&mut out, dest_seq);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RouteError> {
        if bytes.len() < Self::MIN_LEN {
            return Err(RouteError::DecodeShort("RREQ"));
        }
        let source_addr = Addr::from_le_bytes([bytes[0], bytes[1]]);
        let destination_addr = Addr::from_le_bytes([bytes[2], bytes[3]]);
        let source_elems = u16::from_le_bytes([bytes[4], bytes[5]]);
        let hop_count = bytes[6];
        let rssi = bytes[7] as i8;
        let flags = RreqFlags::from_byte(bytes[8]);
        let source_seq = read_u24_le(&bytes[9..12]);
        let destination_seq = if flags.unknown_dest_seq {
            None
        } else {
            if bytes.len() < 15 {
                return Err(RouteError::DecodeShort("RREQ destination_seq"));
            }
            Some(read_u24_le(&bytes[12..15]))
        };
        Ok(Self {
            source_addr,
            destination_addr,
            source_elems,
            hop_count,
            rssi,
            flags,
            source_seq,
            destination_seq,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rrep {
    pub r: u8,
    pub source_addr: Addr,
    pub destination_addr: Addr,
    pub destination_seq: SeqNum,
    pub hop_count: u8,
    pub destination_elems: u16,
}

impl Rrep {
    pub const LEN: usize = 12;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.push(self.r);
        out.extend_from_slice(&self.source_addr.to_le_bytes());
        out.extend_from_slice(&self.destination_addr.to_le_bytes());
        out.extend_from_slice(&self.destination_seq.to_le_bytes());
        out.push(self.hop_count);
        out.extend_from_slice(&self.destination_elems.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RouteError> {
        if bytes.len() < Self::LEN {
            return Err(RouteError::DecodeShort("RREP"));
        }
        Ok(Self {
            r: bytes[0],
            source_addr: Addr::from_le_bytes([bytes[1], bytes[2]]),
            destination_addr: Addr::from_le_bytes([bytes[3], bytes[4]]),
            destination_seq: SeqNum::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
            hop_count: bytes[9],
            destination_elems: u16::from_le_bytes([bytes[10], bytes[11]]),
        })
    }
}

/// RWAIT opcode, preceding the fixed body. The opcode byte lives in
/// the lower-layer control framing; we model it here since it is the only
/// RWAIT-specific byte on the wire.
pub const TRANS_CTL_OP_RWAIT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rwait {
    pub destination_addr: Addr,
    pub source_addr: Addr,
    pub source_seq: SeqNum,
    pub hop_count: u8,
}

impl Rwait {
    /// Body length, excluding the leading opcode byte.
    pub const BODY_LEN: usize = 9;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + Self::BODY_LEN);
        out.push(TRANS_CTL_OP_RWAIT);
        out.extend_from_slice(&self.destination_addr.to_le_bytes());
        out.extend_from_slice(&self.source_addr.to_le_bytes());
        out.extend_from_slice(&self.source_seq.to_le_bytes());
        out.push(self.hop_count);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RouteError> {
        if bytes.len() < 1 + Self::BODY_LEN {
            return Err(RouteError::DecodeShort("RWAIT"));
        }
        let body = &bytes[1..];
        Ok(Self {
            destination_addr: Addr::from_le_bytes([body[0], body[1]]),
            source_addr: Addr::from_le_bytes([body[2], body[3]]),
            source_seq: SeqNum::from_le_bytes([body[4], body[5], body[6], body[7]]),
            hop_count: body[8],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RerrDestination {
    pub dest_addr: Addr,
    pub dest_seq: SeqNum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rerr {
    pub destinations: Vec<RerrDestination>,
}

impl Rerr {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 5 * self.destinations.len());
        out.push(self.destinations.len() as u8);
        for d in &self.destinations {
            out.extend_from_slice(&d.dest_addr.to_le_bytes());
            write_u24_le(&mut out, d.dest_seq);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RouteError> {
        if bytes.is_empty() {
            return Err(RouteError::DecodeShort("RERR"));
        }
        let count = bytes[0] as usize;
        let required = 1 + 5 * count;
        if bytes.len() < required {
            return Err(RouteError::DecodeShort("RERR destinations"));
        }
        let mut destinations = Vec::with_capacity(count);
        for i in 0..count {
            let offset = 1 + 5 * i;
            let dest_addr = Addr::from_le_bytes([bytes[offset], bytes[offset + 1]]);
            let dest_seq = read_u24_le(&bytes[offset + 2..offset + 5]);
            destinations.push(RerrDestination { dest_addr, dest_seq });
        }
        Ok(Self { destinations })
    }
}

/// Builds a RERR from a dedup'd destination set, used by `ErrorCollector`.
pub fn rerr_from_set(destinations: impl IntoIterator<Item = (Addr, SeqNum)>) -> Rerr {
    Rerr {
        destinations: destinations
            .into_iter()
            .map(|(dest_addr, dest_seq)| RerrDestination { dest_addr, dest_seq })
            .collect(),
    }
}

/// A decoded net_idx isn't part of any PDU: it is supplied out of band by
/// the lower layer alongside `RxMeta`. Nothing to decode here; the
/// type alias exists for readability at call sites.
pub type DecodedNetIdx = NetIdx;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rreq_round_trip_with_dest_seq() {
        let rreq = Rreq {
            source_addr: 0x0001,
            destination_addr: 0x0003,
            source_elems: 1,
            hop_count: 2,
            rssi: -70,
            flags: RreqFlags::default(),
            source_seq: 42,
            destination_seq: Some(7),
        };
        let bytes = rreq.to_bytes();
        assert_eq!(bytes.len(), 15);
        assert_eq!(Rreq::from_bytes(&bytes).unwrap(), rreq);
    }

    #[test]
    fn rreq_round_trip_unknown_dest_seq() {
        let rreq = Rreq {
            source_addr: 0x0001,
            destination_addr: 0x0003,
            source_elems: 1,
            hop_count: 0,
            rssi: -40,
            flags: RreqFlags { unknown_dest_seq: true, ..Default::default() },
            source_seq: 1,
            destination_seq: None,
        };
        let bytes = rreq.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Rreq::from_bytes(&bytes).unwrap(), rreq);
    }

    #[test]
    fn rreq_short_buffer_decode_error() {
        assert_eq!(Rreq::from_bytes(&[0u8; 5]), Err(RouteError::DecodeShort("RREQ")));
    }

    #[test]
    fn rrep_round_trip() {
        let rrep = Rrep {
            r: 0,
            source_addr: 0x0001,
            destination_addr: 0x0003,
            destination_seq: 99,
            hop_count: 2,
            destination_elems: 1,
        };
        let bytes = rrep.to_bytes();
        assert_eq!(bytes.len(), Rrep::LEN);
        assert_eq!(Rrep::from_bytes(&bytes).unwrap(), rrep);
    }

    #[test]
    fn rwait_round_trip() {
        let rwait = Rwait {
            destination_addr: 0x0003,
            source_addr: 0x0001,
            source_seq: 5,
            hop_count: 2,
        };
        let bytes = rwait.to_bytes();
        assert_eq!(bytes[0], TRANS_CTL_OP_RWAIT);
        assert_eq!(Rwait::from_bytes(&bytes).unwrap(), rwait);
    }

    #[test]
    fn rerr_round_trip_and_dedup_count() {
        let rerr = rerr_from_set([(0x0003, 1), (0x0004, 2)]);
        let bytes = rerr.to_bytes();
        assert_eq!(bytes.len(), 1 + 5 * 2);
        assert_eq!(bytes[0], 2);
        assert_eq!(Rerr::from_bytes(&bytes).unwrap(), rerr);
    }
}
