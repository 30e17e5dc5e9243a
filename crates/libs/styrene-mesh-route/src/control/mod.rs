//! Role dispatch for the four control opcodes: each inbound message is
//! decoded and handled according to whether this node is the originator,
//! the destination, or an intermediate relay.

pub mod rerr;
pub mod rrep;
pub mod rreq;
pub mod rwait;

use crate::collaborators::Collaborators;
use crate::config::RouteEngineConfig;
use crate::discovery::DiscoveryCoordinator;
use crate::error::RouteError;
use crate::error_collector::ErrorCollector;
use crate::hello::HelloTracker;
use crate::route_table::RouteTable;
use crate::types::{Addr, CtlOp, NetIdx, RxMeta, SeqNum};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;

/// Bounded seen-set deduplicating RREQs by `(source_addr, source_seq,
/// net_idx)`, so a flooded request isn't relayed or answered twice by the
/// same node — and so two subnets sharing an address/sequence pair don't
/// dedupe against each other.
struct SeenCache {
    max_size: usize,
    order: Mutex<VecDeque<(Addr, SeqNum, NetIdx)>>,
    set: Mutex<HashSet<(Addr, SeqNum, NetIdx)>>,
}

impl SeenCache {
    fn new(max_size: usize) -> Self {
        Self { max_size, order: Mutex::new(VecDeque::new()), set: Mutex::new(HashSet::new()) }
    }

    /// Returns `true` the first time `(source, seq, net)` is seen, `false`
    /// on every subsequent sighting.
    async fn mark_seen(&self, source: Addr, seq: SeqNum, net: NetIdx) -> bool {
        let key = (source, seq, net);
        let mut set = self.set.lock().await;
        if !set.insert(key) {
            return false;
        }
        drop(set);
        let mut order = self.order.lock().await;
        order.push_back(key);
        if order.len() > self.max_size {
            if let Some(old) = order.pop_front() {
                self.set.lock().await.remove(&old);
            }
        }
        true
    }
}

/// One destination's state during its `RREQ_WAIT` window: the best
/// `(hop_count, rssi)` reverse path seen so far toward the RREQ's source,
/// kept until the window's single timer (armed once, on first sighting)
/// fires and turns it into a reverse route plus an outbound RREP.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingReply {
    pub hop_count: u8,
    pub rssi: i32,
    pub source_seq: SeqNum,
    pub source_elems: u16,
    pub reverse_next_hop: Addr,
    pub net_idx: NetIdx,
    pub destination_addr: Addr,
}

/// Reverse-route candidates awaiting their `RREQ_WAIT` deadline, keyed by
/// the RREQ's `(source_addr, net_idx)`. A slab in spirit (bounded,
/// saturation == `ResourceExhausted`), implemented as a capacity-checked
/// map since lookup is always by that key, never by iteration.
pub(crate) struct PendingRreqs {
    entries: Mutex<HashMap<(Addr, NetIdx), PendingReply>>,
    capacity: usize,
}

impl PendingRreqs {
    fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), capacity }
    }

    /// Inserts a fresh candidate, or replaces the stored one if it costs
    /// less (lower is better, see `path_cost`). Returns `true` only when
    /// this is the first sighting for `(source_addr, net_idx)` — the caller
    /// arms the wait timer exactly once, on that transition.
    async fn upsert(
        &self,
        source_addr: Addr,
        net_idx: NetIdx,
        candidate: PendingReply,
        rssi_min: i32,
    ) -> Result<bool, RouteError> {
        let mut entries = self.entries.lock().await;
        let key = (source_addr, net_idx);
        if let Some(existing) = entries.get_mut(&key) {
            let existing_cost = crate::types::path_cost(existing.hop_count, existing.rssi, rssi_min);
            let candidate_cost = crate::types::path_cost(candidate.hop_count, candidate.rssi, rssi_min);
            if candidate_cost < existing_cost {
                *existing = candidate;
            }
            return Ok(false);
        }
        if entries.len() >= self.capacity {
            return Err(RouteError::ResourceExhausted("rwait"));
        }
        entries.insert(key, candidate);
        Ok(true)
    }

    /// Removes and returns the pending candidate for `(source_addr,
    /// net_idx)`, once its wait timer fires. A second take (there is only
    /// ever one timer per key) finds nothing and is a no-op.
    pub(crate) async fn take(&self, source_addr: Addr, net_idx: NetIdx) -> Option<PendingReply> {
        self.entries.lock().await.remove(&(source_addr, net_idx))
    }
}

/// What the caller (the engine facade, which owns the real component
/// handles as `Arc`s) must do after a dispatch returns. Kept separate
/// from `RouteError` since arming a timer is a normal outcome, not a
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing further to do.
    None,
    /// The destination role's `RREQ_WAIT` window just opened for this
    /// `(source_addr, net_idx)`; the caller should arm a one-shot timer
    /// that, on expiry, takes the pending reply and installs + answers it.
    ArmRreqWait(Addr, NetIdx),
}

pub struct ControlMessages {
    seen_rreq: SeenCache,
    pub(crate) pending: PendingRreqs,
}

impl ControlMessages {
    pub fn new(config: &RouteEngineConfig) -> Self {
        Self {
            seen_rreq: SeenCache::new(config.number_of_entries.max(1)),
            pending: PendingRreqs::new(config.rwait_list_size.max(1)),
        }
    }

    /// Decodes and dispatches one inbound control message to the opcode
    /// handler named in `op`.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_ctl_receive<C: Collaborators>(
        &self,
        op: CtlOp,
        route_table: &RouteTable,
        discovery: &DiscoveryCoordinator,
        error_collector: &ErrorCollector,
        hello: &HelloTracker,
        collaborators: &C,
        config: &RouteEngineConfig,
        rx: RxMeta,
        bytes: &[u8],
    ) -> Result<DispatchOutcome, RouteError> {
        match op {
            CtlOp::Rreq => {
                rreq::handle(self, route_table, hello, collaborators, config, rx, bytes).await
            }
            CtlOp::Rrep => {
                rrep::handle(discovery, route_table, hello, collaborators, config, rx, bytes)
                    .await
                    .map(|()| DispatchOutcome::None)
            }
            CtlOp::Rwait => rwait::handle(discovery, route_table, collaborators, rx, bytes)
                .await
                .map(|()| DispatchOutcome::None),
            CtlOp::Rerr => {
                rerr::handle(route_table, error_collector, hello, collaborators, config, rx, bytes)
                    .await
                    .map(|()| DispatchOutcome::None)
            }
        }
    }
}
