//! Shared address and metadata types used across the routing engine.

use serde::{Deserialize, Serialize};

/// 16-bit unicast element address.
pub type Addr = u16;

/// Subnet identifier (`net_idx` throughout the spec).
pub type NetIdx = u16;

/// Monotonic destination-freshness counter.
pub type SeqNum = u32;

/// All-elements broadcast address, the `tx` target for an RREQ.
pub const BROADCAST_ADDR: Addr = 0xffff;

/// A contiguous range of elements `[base, base + elems)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRange {
    pub base: Addr,
    pub elems: u16,
}

impl ElementRange {
    pub fn new(base: Addr, elems: u16) -> Self {
        Self { base, elems: elems.max(1) }
    }

    pub fn single(base: Addr) -> Self {
        Self { base, elems: 1 }
    }

    /// True if `addr` falls within `[base, base + elems)`.
    pub fn contains(&self, addr: Addr) -> bool {
        let end = self.base as u32 + self.elems as u32;
        let addr = addr as u32;
        addr >= self.base as u32 && addr < end
    }

    /// True if `other` is a subset of, or overlaps, `self`. Used when a
    /// RREP reveals a destination element count we didn't know at RREQ
    /// time.
    pub fn overlaps(&self, other: &ElementRange) -> bool {
        let self_end = self.base as u32 + self.elems as u32;
        let other_end = other.base as u32 + other.elems as u32;
        (self.base as u32) < other_end && (other.base as u32) < self_end
    }
}

/// Network-layer metadata accompanying an inbound control message,
/// supplied by the (out of scope) lower transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMeta {
    pub source_addr: Addr,
    pub dest_addr: Addr,
    pub net_idx: NetIdx,
    pub rssi: i32,
    pub recv_ttl: u8,
}

/// Control opcodes carried by `on_ctl_receive`/`send_ctl`. Hello is
/// delivered out of band via `on_hello`, not through this path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlOp {
    Rreq,
    Rrep,
    Rwait,
    Rerr,
}

/// `cost(hop_count, rssi) = 10*hop_count + 10*rssi/RSSI_MIN`.
/// Lower is better. `rssi_min` is the nominal floor, e.g. -90.
pub fn path_cost(hop_count: u8, rssi: i32, rssi_min: i32) -> i32 {
    debug_assert!(rssi_min < 0);
    10 * hop_count as i32 + (10 * rssi) / rssi_min
}

/// Running weighted-mean RSSI update applied when relaying a RREQ:
/// `rssi_new = (rssi_prev * hop_count + rx.rssi) / (hop_count + 1)`.
pub fn blend_rssi(rssi_prev: i32, hop_count: u8, rx_rssi: i32) -> i32 {
    let hop_count = hop_count as i32;
    (rssi_prev * hop_count + rx_rssi) / (hop_count + 1)
}
