use crate::types::{Addr, ElementRange, NetIdx, SeqNum};
use std::time::Instant;

/// A single entry in the valid or invalid route list.
///
/// `dest_seq_known` mirrors the "unknown sequence number" flag carried on
/// the wire: a route installed from an RREQ that had `U` set has no
/// comparable freshness counter until a later RREP or data flow supplies
/// one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest: ElementRange,
    pub dest_seq: SeqNum,
    pub dest_seq_known: bool,
    pub next_hop: Addr,
    pub hop_count: u8,
    pub net_idx: NetIdx,
    pub rssi: i32,
    pub lifetime: Instant,
}

impl RouteEntry {
    pub fn dest_addr(&self) -> Addr {
        self.dest.base
    }

    pub fn cost(&self, rssi_min: i32) -> i32 {
        crate::types::path_cost(self.hop_count, self.rssi, rssi_min)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.lifetime
    }

    /// Decides whether `candidate` should replace `self` in the route
    /// table: a strictly fresher sequence number always wins; an equally
    /// fresh one wins on lower path cost; a known sequence number never
    /// loses to an unknown one.
    pub fn should_replace(&self, candidate: &RouteEntry, rssi_min: i32) -> bool {
        if !self.dest_seq_known {
            return true;
        }
        if !candidate.dest_seq_known {
            return false;
        }
        match candidate.dest_seq.wrapping_sub(self.dest_seq) as i32 {
            diff if diff > 0 => true,
            0 => candidate.cost(rssi_min) < self.cost(rssi_min),
            _ => false,
        }
    }
}
