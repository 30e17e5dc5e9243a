//! Coalesces unreachable-destination notifications into one RERR per
//! `(next_hop, net_idx)` group. A broken link can make several
//! destinations unreachable in the same tick (everything routed through
//! that next hop); collecting them by group keeps the mesh from emitting
//! one RERR per destination while never mixing sequence numbers across
//! unrelated next hops or subnets.

use crate::error::RouteError;
use crate::types::{Addr, NetIdx, SeqNum};
use crate::wire::{rerr_from_set, Rerr};
use std::collections::HashMap;
use tokio::sync::Mutex;

pub struct ErrorCollector {
    pending: Mutex<HashMap<(Addr, NetIdx), HashMap<Addr, SeqNum>>>,
    capacity: usize,
}

impl ErrorCollector {
    pub fn new(capacity: usize) -> Self {
        Self { pending: Mutex::new(HashMap::new()), capacity }
    }

    /// Notes that `dest_addr` became unreachable via `next_hop` in `net`,
    /// with the given (already bumped) destination sequence number. A
    /// destination already pending in that group keeps its higher sequence
    /// number rather than being recorded twice. Capacity is shared across
    /// all groups, matching the other fixed-capacity pools.
    pub async fn record(
        &self,
        next_hop: Addr,
        net_idx: NetIdx,
        dest_addr: Addr,
        dest_seq: SeqNum,
    ) -> Result<(), RouteError> {
        let mut pending = self.pending.lock().await;
        if let Some(existing) =
            pending.get_mut(&(next_hop, net_idx)).and_then(|g| g.get_mut(&dest_addr))
        {
            if dest_seq.wrapping_sub(*existing) as i32 > 0 {
                *existing = dest_seq;
            }
            return Ok(());
        }
        let total: usize = pending.values().map(|g| g.len()).sum();
        if total >= self.capacity {
            return Err(RouteError::ResourceExhausted("rerr"));
        }
        pending.entry((next_hop, net_idx)).or_default().insert(dest_addr, dest_seq);
        Ok(())
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.values().all(HashMap::is_empty)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.values().map(HashMap::len).sum()
    }

    /// Drains every pending group into one RERR per `(next_hop, net_idx)`,
    /// clearing the collector. Empty if nothing is pending.
    pub async fn flush_all(&self) -> Vec<(Addr, NetIdx, Rerr)> {
        let mut pending = self.pending.lock().await;
        let groups = std::mem::take(&mut *pending);
        groups
            .into_iter()
            .filter(|(_, destinations)| !destinations.is_empty())
            .map(|((next_hop, net_idx), destinations)| {
                (next_hop, net_idx, rerr_from_set(destinations))
            })
            .collect()
    }
}
