//! Reactive route discovery: expanding-ring RREQ search with concurrent
//! lookups to the same destination collapsing onto one in-flight search.

use crate::collaborators::Collaborators;
use crate::config::RouteEngineConfig;
use crate::error::RouteError;
use crate::route_table::{new_entry, RouteEntry, RouteTable};
use crate::types::{Addr, ElementRange, NetIdx, SeqNum, BROADCAST_ADDR};
use crate::wire::{Rreq, RreqFlags};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify};

/// Tracks one destination's in-flight ring search. A second caller
/// discovering the same `(dest_addr, net_idx)` attaches to the existing
/// event instead of flooding a duplicate RREQ.
pub struct ReplyEvent {
    pub dest_addr: Addr,
    pub net_idx: NetIdx,
    pub source_seq: SeqNum,
    notify: Notify,
    outcome: Mutex<Option<RouteEntry>>,
    extended: Mutex<bool>,
}

impl ReplyEvent {
    fn new(dest_addr: Addr, net_idx: NetIdx, source_seq: SeqNum) -> Self {
        Self {
            dest_addr,
            net_idx,
            source_seq,
            notify: Notify::new(),
            outcome: Mutex::new(None),
            extended: Mutex::new(false),
        }
    }

    pub async fn resolve(&self, route: RouteEntry) {
        *self.outcome.lock().await = Some(route);
        self.notify.notify_waiters();
    }

    /// Marks that an intermediate node sent an RWAIT for this search,
    /// asking the originator to hold its ring-search timeout open.
    pub async fn mark_extended(&self) {
        *self.extended.lock().await = true;
    }

    async fn take_extended(&self) -> bool {
        std::mem::take(&mut *self.extended.lock().await)
    }

    #[cfg(test)]
    pub(crate) async fn is_extended_for_test(&self) -> bool {
        *self.extended.lock().await
    }

    /// Clones the resolved route rather than taking it: several callers
    /// (the searching task and any piggybacking lookups) may all read the
    /// same outcome once it lands.
    pub(crate) async fn peek_outcome(&self) -> Option<RouteEntry> {
        self.outcome.lock().await.clone()
    }
}

pub struct ReplyEvents {
    events: Mutex<HashMap<(Addr, NetIdx), Arc<ReplyEvent>>>,
    capacity: usize,
}

impl ReplyEvents {
    pub fn new(capacity: usize) -> Self {
        Self { events: Mutex::new(HashMap::new()), capacity }
    }

    /// Returns the existing event for `(dest_addr, net_idx)` (`is_new =
    /// false`) or registers a fresh one (`is_new = true`).
    pub(crate) async fn get_or_insert(
        &self,
        dest_addr: Addr,
        net_idx: NetIdx,
        source_seq: SeqNum,
    ) -> Result<(Arc<ReplyEvent>, bool), RouteError> {
        let mut events = self.events.lock().await;
        let key = (dest_addr, net_idx);
        if let Some(existing) = events.get(&key) {
            return Ok((existing.clone(), false));
        }
        if events.len() >= self.capacity {
            return Err(RouteError::ResourceExhausted("rwait"));
        }
        let event = Arc::new(ReplyEvent::new(dest_addr, net_idx, source_seq));
        events.insert(key, event.clone());
        Ok((event, true))
    }

    /// Looked up by `control::rrep` when a reply arrives, and by
    /// `control::rwait` to extend an in-flight search.
    pub async fn find(&self, dest_addr: Addr, net_idx: NetIdx) -> Option<Arc<ReplyEvent>> {
        self.events.lock().await.get(&(dest_addr, net_idx)).cloned()
    }

    async fn remove(&self, dest_addr: Addr, net_idx: NetIdx) {
        self.events.lock().await.remove(&(dest_addr, net_idx));
    }
}

pub struct DiscoveryCoordinator {
    pub reply_events: ReplyEvents,
}

impl DiscoveryCoordinator {
    pub fn new(config: &RouteEngineConfig) -> Self {
        Self { reply_events: ReplyEvents::new(config.rwait_list_size) }
    }

    /// Resolves a destination to a route, discovering one reactively if
    /// the route table doesn't already have it. Concurrent callers asking
    /// for the same `(dest_addr, net_idx)` share a single ring search.
    pub async fn discover<C: Collaborators>(
        &self,
        route_table: &RouteTable,
        collaborators: &C,
        config: &RouteEngineConfig,
        dest_addr: Addr,
        net_idx: NetIdx,
    ) -> Result<RouteEntry, RouteError> {
        if collaborators.elem_find(dest_addr) {
            return Err(RouteError::LocalLoopback);
        }
        if let Some(route) = route_table.search(dest_addr, net_idx).await {
            return Ok(route);
        }

        let source_seq = collaborators.session_seq();
        let (event, is_new) =
            self.reply_events.get_or_insert(dest_addr, net_idx, source_seq).await?;

        let result = if is_new {
            let result = self.ring_search(collaborators, config, &event, dest_addr, net_idx).await;
            self.reply_events.remove(dest_addr, net_idx).await;
            result
        } else {
            self.await_existing(config, &event).await
        };

        if let Ok(route) = &result {
            route_table.insert_or_refresh(route.clone()).await?;
        }
        result
    }

    async fn await_existing(
        &self,
        config: &RouteEngineConfig,
        event: &Arc<ReplyEvent>,
    ) -> Result<RouteEntry, RouteError> {
        // `notified()` is constructed before the outcome check so a
        // `resolve()` landing in between isn't a missed wakeup: Notify
        // only guarantees delivery to futures that already exist when
        // `notify_waiters()` runs.
        let notified = event.notify.notified();
        if let Some(route) = event.peek_outcome().await {
            return Ok(route);
        }
        tokio::pin!(notified);
        let deadline = config.rreq_wait * (config.ring_max_ttl as u32 + 1);
        let _ = tokio::time::timeout(deadline, notified).await;
        event.peek_outcome().await.ok_or(RouteError::NoReply)
    }

    async fn ring_search<C: Collaborators>(
        &self,
        collaborators: &C,
        config: &RouteEngineConfig,
        event: &Arc<ReplyEvent>,
        dest_addr: Addr,
        net_idx: NetIdx,
    ) -> Result<RouteEntry, RouteError> {
        // Single-hop TTL=1 is disallowed (spec §4.3 step 1): the ring
        // starts at 2 hops out.
        let mut ttl: u8 = 2;
        loop {
            // Built before the send so a reply racing ahead of us still
            // lands a wakeup this future can observe.
            let notified = event.notify.notified();
            tokio::pin!(notified);

            // Refreshed from the session sequence on every step (spec §4.3
            // step 5), not just the one captured when the search began.
            let rreq = Rreq {
                source_addr: collaborators.primary_addr(),
                destination_addr: dest_addr,
                source_elems: collaborators.elem_count(),
                hop_count: 0,
                rssi: 0,
                flags: RreqFlags { unknown_dest_seq: true, ..Default::default() },
                source_seq: collaborators.session_seq(),
                destination_seq: None,
            };
            collaborators
                .send_ctl(BROADCAST_ADDR, crate::types::CtlOp::Rreq, &rreq.to_bytes())
                .await?;

            let _ = tokio::time::timeout(config.rreq_wait, notified.as_mut()).await;
            if let Some(route) = event.peek_outcome().await {
                return Ok(route);
            }

            if event.take_extended().await {
                let extension = tokio::time::timeout(config.rwait_extension(), notified.as_mut());
                let _ = extension.await;
                if let Some(route) = event.peek_outcome().await {
                    return Ok(route);
                }
            }

            if ttl >= config.ring_max_ttl {
                log::trace!("ring search for {} (net {}) exhausted ring_max_ttl", dest_addr, net_idx);
                return Err(RouteError::NoReply);
            }
            ttl += 1;
            tokio::time::sleep(config.discovery_poll_interval + poll_jitter(dest_addr, ttl, config))
                .await;
        }
    }
}

/// A small, deterministic jitter added to the cooperative poll sleep so that
/// several originators ring-searching at once don't lock-step their retries
/// onto the same wall-clock tick. Mixes the destination address and current
/// TTL step rather than drawing from an RNG — this crate takes no
/// dependency on one, and the goal is spread, not unpredictability.
fn poll_jitter(dest_addr: Addr, ttl: u8, config: &RouteEngineConfig) -> std::time::Duration {
    if config.discovery_poll_jitter.is_zero() {
        return std::time::Duration::ZERO;
    }
    let mix = (dest_addr as u32).wrapping_mul(2654435761).wrapping_add(ttl as u32);
    let span_ms = config.discovery_poll_jitter.as_millis().max(1) as u32;
    std::time::Duration::from_millis(u64::from(mix % span_ms))
}

/// Builds the route entry a discovering node installs on receiving an
/// RREP, given the hop count and RSSI observed on the reply.
pub fn route_from_rrep(
    dest_addr: Addr,
    dest_elems: u16,
    dest_seq: SeqNum,
    next_hop: Addr,
    hop_count: u8,
    net_idx: NetIdx,
    rssi: i32,
    lifetime: Instant,
) -> RouteEntry {
    new_entry(
        ElementRange::new(dest_addr, dest_elems),
        dest_seq,
        true,
        next_hop,
        hop_count,
        net_idx,
        rssi,
        lifetime,
    )
}
