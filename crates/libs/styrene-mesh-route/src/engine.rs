//! The facade a host stack drives: construct one [`Engine`] per node,
//! feed it inbound control traffic and Hello sightings, and ask it to
//! resolve destinations to routes.

use crate::collaborators::Collaborators;
use crate::config::RouteEngineConfig;
use crate::control::{ControlMessages, DispatchOutcome};
use crate::discovery::DiscoveryCoordinator;
use crate::error::RouteError;
use crate::error_collector::ErrorCollector;
use crate::hello::HelloTracker;
use crate::route_table::{new_entry, RouteEntry, RouteTable};
use crate::types::{Addr, CtlOp, ElementRange, NetIdx, RxMeta, BROADCAST_ADDR};
use crate::wire::Rrep;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// `net_idx` used for locally-originated discovery through the
/// single-subnet-agnostic `route_send_request`/`on_hello` facade methods.
/// Multi-subnet callers that need to address a specific `net_idx` use the
/// inner components (`DiscoveryCoordinator`, `HelloTracker`) directly.
const DEFAULT_NET_IDX: NetIdx = 0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub routes_discovered: usize,
    pub discovery_failures: usize,
    pub routes_invalidated: usize,
    pub neighbours_expired: usize,
    pub rreq_sent: usize,
    pub rreq_received: usize,
    pub rrep_sent: usize,
    pub rrep_received: usize,
    pub rwait_sent: usize,
    pub rwait_received: usize,
    pub rerr_sent: usize,
    pub rerr_received: usize,
    pub resource_exhausted: usize,
}

struct Counters {
    routes_discovered: AtomicUsize,
    discovery_failures: AtomicUsize,
    routes_invalidated: AtomicUsize,
    neighbours_expired: AtomicUsize,
    rreq_sent: AtomicUsize,
    rreq_received: AtomicUsize,
    rrep_sent: AtomicUsize,
    rrep_received: AtomicUsize,
    rwait_sent: AtomicUsize,
    rwait_received: AtomicUsize,
    rerr_sent: AtomicUsize,
    rerr_received: AtomicUsize,
    resource_exhausted: AtomicUsize,
}

impl Counters {
    fn new() -> Self {
        Self {
            routes_discovered: AtomicUsize::new(0),
            discovery_failures: AtomicUsize::new(0),
            routes_invalidated: AtomicUsize::new(0),
            neighbours_expired: AtomicUsize::new(0),
            rreq_sent: AtomicUsize::new(0),
            rreq_received: AtomicUsize::new(0),
            rrep_sent: AtomicUsize::new(0),
            rrep_received: AtomicUsize::new(0),
            rwait_sent: AtomicUsize::new(0),
            rwait_received: AtomicUsize::new(0),
            rerr_sent: AtomicUsize::new(0),
            rerr_received: AtomicUsize::new(0),
            resource_exhausted: AtomicUsize::new(0),
        }
    }

    fn note_received(&self, op: CtlOp) {
        match op {
            CtlOp::Rreq => self.rreq_received.fetch_add(1, Ordering::Relaxed),
            CtlOp::Rrep => self.rrep_received.fetch_add(1, Ordering::Relaxed),
            CtlOp::Rwait => self.rwait_received.fetch_add(1, Ordering::Relaxed),
            CtlOp::Rerr => self.rerr_received.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn note_error(&self, err: &RouteError) {
        if matches!(err, RouteError::ResourceExhausted(_)) {
            self.resource_exhausted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            routes_discovered: self.routes_discovered.load(Ordering::Relaxed),
            discovery_failures: self.discovery_failures.load(Ordering::Relaxed),
            routes_invalidated: self.routes_invalidated.load(Ordering::Relaxed),
            neighbours_expired: self.neighbours_expired.load(Ordering::Relaxed),
            rreq_sent: self.rreq_sent.load(Ordering::Relaxed),
            rreq_received: self.rreq_received.load(Ordering::Relaxed),
            rrep_sent: self.rrep_sent.load(Ordering::Relaxed),
            rrep_received: self.rrep_received.load(Ordering::Relaxed),
            rwait_sent: self.rwait_sent.load(Ordering::Relaxed),
            rwait_received: self.rwait_received.load(Ordering::Relaxed),
            rerr_sent: self.rerr_sent.load(Ordering::Relaxed),
            rerr_received: self.rerr_received.load(Ordering::Relaxed),
            resource_exhausted: self.resource_exhausted.load(Ordering::Relaxed),
        }
    }
}

pub struct Engine<C: Collaborators> {
    collaborators: Arc<C>,
    config: RouteEngineConfig,
    route_table: Arc<RouteTable>,
    discovery: Arc<DiscoveryCoordinator>,
    hello: Arc<HelloTracker>,
    error_collector: Arc<ErrorCollector>,
    control: Arc<ControlMessages>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    maintenance: JoinHandle<()>,
}

impl<C: Collaborators> Engine<C> {
    pub fn new(collaborators: C, config: RouteEngineConfig) -> Self {
        let collaborators = Arc::new(collaborators);
        let route_table = Arc::new(RouteTable::new(&config));
        let discovery = Arc::new(DiscoveryCoordinator::new(&config));
        let hello = Arc::new(HelloTracker::new(config.hello_list_size, config.hello_lifetime));
        let error_collector = Arc::new(ErrorCollector::new(config.rerr_list_size));
        let control = Arc::new(ControlMessages::new(&config));
        let counters = Arc::new(Counters::new());
        let cancel = CancellationToken::new();

        let maintenance = tokio::spawn(run_maintenance(
            route_table.clone(),
            hello.clone(),
            error_collector.clone(),
            collaborators.clone(),
            counters.clone(),
            config.clone(),
            cancel.clone(),
        ));

        Self {
            collaborators,
            config,
            route_table,
            discovery,
            hello,
            error_collector,
            control,
            counters,
            cancel,
            maintenance,
        }
    }

    /// Resolves `dest_addr` to a route on the default subnet, triggering
    /// reactive discovery if the route table doesn't already have a valid
    /// entry.
    pub async fn route_send_request(&self, dest_addr: Addr) -> Result<RouteEntry, RouteError> {
        if let Some(route) = self.route_table.search(dest_addr, DEFAULT_NET_IDX).await {
            return Ok(route);
        }
        match self
            .discovery
            .discover(
                &self.route_table,
                self.collaborators.as_ref(),
                &self.config,
                dest_addr,
                DEFAULT_NET_IDX,
            )
            .await
        {
            Ok(route) => {
                self.counters.routes_discovered.fetch_add(1, Ordering::Relaxed);
                self.counters.rreq_sent.fetch_add(1, Ordering::Relaxed);
                Ok(route)
            }
            Err(err) => {
                self.counters.discovery_failures.fetch_add(1, Ordering::Relaxed);
                self.counters.note_error(&err);
                Err(err)
            }
        }
    }

    /// Dispatches one inbound control message of opcode `op` to its
    /// handler. A decoded RREQ naming one of our own elements as
    /// destination opens an `RREQ_WAIT` window rather than replying
    /// inline; this arms that window's one-shot timer on the background
    /// runtime, owning `Arc` clones of every component it touches so the
    /// timer outlives this call.
    pub async fn on_ctl_receive(
        &self,
        op: CtlOp,
        rx: RxMeta,
        bytes: &[u8],
    ) -> Result<(), RouteError> {
        self.counters.note_received(op);

        let outcome = match self
            .control
            .on_ctl_receive(
                op,
                &self.route_table,
                &self.discovery,
                &self.error_collector,
                &self.hello,
                self.collaborators.as_ref(),
                &self.config,
                rx,
                bytes,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.counters.note_error(&err);
                return Err(err);
            }
        };

        if let DispatchOutcome::ArmRreqWait(source_addr, net_idx) = outcome {
            tokio::spawn(fire_rreq_wait(
                source_addr,
                net_idx,
                self.route_table.clone(),
                self.control.clone(),
                self.hello.clone(),
                self.collaborators.clone(),
                self.config.clone(),
                self.counters.clone(),
            ));
        }
        Ok(())
    }

    /// Records a Hello sighting from `addr` on the default subnet.
    pub async fn on_hello(&self, addr: Addr) {
        self.hello.on_hello(addr, DEFAULT_NET_IDX, Instant::now()).await;
    }

    pub async fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    pub async fn route_table_snapshot(&self) -> Vec<RouteEntry> {
        self.route_table.snapshot().await
    }

    pub async fn neighbours_snapshot(&self) -> Vec<crate::hello::NeighbourRecord> {
        self.hello.snapshot().await
    }

    /// Stops the background maintenance task. Further calls into the
    /// engine remain valid (route lookups and control handling need no
    /// background task to run), but expired routes and neighbours will no
    /// longer be reaped automatically.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.maintenance.await;
    }
}

/// Fires once, `RREQ_WAIT` after a destination's wait window opened for
/// `(source_addr, net_idx)`: takes whatever pending reply is on file at
/// that moment (the best of every RREQ sighted for this source during the
/// window, §4.1's replacement rule), installs it as the reverse route,
/// registers its next hop as a neighbour, and sends the RREP. A second
/// timer never exists for the same key (`PendingRreqs::upsert` only
/// reports `is_new` once), so this never double-fires; if the pending
/// entry is already gone (slab exhaustion logged it and dropped it, or
/// this is a stale resumption) it quietly does nothing.
#[allow(clippy::too_many_arguments)]
async fn fire_rreq_wait<C: Collaborators>(
    source_addr: Addr,
    net_idx: NetIdx,
    route_table: Arc<RouteTable>,
    control: Arc<ControlMessages>,
    hello: Arc<HelloTracker>,
    collaborators: Arc<C>,
    config: RouteEngineConfig,
    counters: Arc<Counters>,
) {
    tokio::time::sleep(config.rreq_wait).await;

    let Some(pending) = control.pending.take(source_addr, net_idx).await else {
        return;
    };

    let reverse = new_entry(
        ElementRange::new(source_addr, pending.source_elems),
        pending.source_seq,
        true,
        pending.reverse_next_hop,
        pending.hop_count + 1,
        net_idx,
        pending.rssi,
        Instant::now() + config.lifetime_data,
    );
    if let Err(err) = route_table.insert_or_refresh(reverse).await {
        log::warn!("rreq-wait: could not install reverse route for {:#06x}: {}", source_addr, err);
        counters.note_error(&err);
        return;
    }
    if let Err(err) = hello.add_neighbour(pending.reverse_next_hop, net_idx, Instant::now()).await {
        log::warn!(
            "rreq-wait: could not track neighbour {:#06x}: {}",
            pending.reverse_next_hop,
            err
        );
        counters.note_error(&err);
        return;
    }

    let rrep = Rrep {
        r: 0,
        source_addr,
        destination_addr: pending.destination_addr,
        destination_seq: collaborators.session_seq(),
        hop_count: 0,
        destination_elems: collaborators.elem_count(),
    };
    match collaborators.send_ctl(pending.reverse_next_hop, CtlOp::Rrep, &rrep.to_bytes()).await {
        Ok(()) => {
            counters.rrep_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            log::warn!("rreq-wait: RREP send to {:#06x} failed: {}", pending.reverse_next_hop, err);
        }
    }
}

/// Periodic housekeeping: reap expired routes and neighbours, invalidate
/// routes through neighbours that stopped sending Hellos, and flush any
/// coalesced RERRs — one broadcast per `(next_hop, net_idx)` group, since a
/// single maintenance tick can expire several unrelated neighbours.
async fn run_maintenance<C: Collaborators>(
    route_table: Arc<RouteTable>,
    hello: Arc<HelloTracker>,
    error_collector: Arc<ErrorCollector>,
    collaborators: Arc<C>,
    counters: Arc<Counters>,
    config: RouteEngineConfig,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.ring_interval) => {}
        }

        let now = Instant::now();
        route_table.reap_expired(now).await;

        let expired_neighbours = hello.reap_expired(now).await;
        counters.neighbours_expired.fetch_add(expired_neighbours.len(), Ordering::Relaxed);
        for (neighbour, net_idx) in expired_neighbours {
            log::trace!("neighbour {} (net {}) expired, dropping routes via it", neighbour, net_idx);
            let dropped = route_table.link_drop(neighbour, net_idx, now).await;
            counters.routes_invalidated.fetch_add(dropped.len(), Ordering::Relaxed);
            for (dest_addr, dest_seq) in dropped {
                if let Err(err) = error_collector.record(neighbour, net_idx, dest_addr, dest_seq).await {
                    counters.note_error(&err);
                }
            }
        }

        for (_next_hop, _net_idx, rerr) in error_collector.flush_all().await {
            log::debug!("flushing RERR for {} destination(s)", rerr.destinations.len());
            if collaborators
                .send_ctl(BROADCAST_ADDR, CtlOp::Rerr, &rerr.to_bytes())
                .await
                .is_ok()
            {
                counters.rerr_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
