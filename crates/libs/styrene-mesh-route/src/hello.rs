//! Neighbour liveness tracking. A Hello is not a control opcode carried
//! through `on_ctl_receive` — the lower layer delivers it out of band
//! through `on_hello`, since it has no payload beyond "I heard this
//! neighbour just now."

use crate::error::RouteError;
use crate::route_table::RouteTable;
use crate::types::{Addr, NetIdx};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighbourRecord {
    pub addr: Addr,
    pub net_idx: NetIdx,
    pub last_heard: Instant,
}

pub struct HelloTracker {
    neighbours: Mutex<HashMap<(Addr, NetIdx), NeighbourRecord>>,
    capacity: usize,
    hello_lifetime: Duration,
}

impl HelloTracker {
    pub fn new(capacity: usize, hello_lifetime: Duration) -> Self {
        Self { neighbours: Mutex::new(HashMap::new()), capacity, hello_lifetime }
    }

    /// Idempotent: starts or refreshes `(addr, net)`'s timer. Called when a
    /// route begins using `addr` as a next hop in `net`, per §4.2's
    /// contract — distinct from a bare Hello sighting, which must never
    /// create a neighbour on its own.
    pub async fn add_neighbour(&self, addr: Addr, net: NetIdx, now: Instant) -> Result<(), RouteError> {
        let mut neighbours = self.neighbours.lock().await;
        let key = (addr, net);
        if let Some(existing) = neighbours.get_mut(&key) {
            existing.last_heard = now;
            return Ok(());
        }
        if neighbours.len() >= self.capacity {
            return Err(RouteError::ResourceExhausted("hello"));
        }
        neighbours.insert(key, NeighbourRecord { addr, net_idx: net, last_heard: now });
        Ok(())
    }

    /// Refreshes `(addr, net)`'s timer if it is already a tracked
    /// neighbour; otherwise ignored. A Hello alone never tracks a new
    /// neighbour — only `add_neighbour` does, when a route starts using it.
    pub async fn on_hello(&self, addr: Addr, net: NetIdx, now: Instant) {
        if let Some(existing) = self.neighbours.lock().await.get_mut(&(addr, net)) {
            existing.last_heard = now;
        }
    }

    /// Consults `route_table`: if no valid entry still uses `(addr, net)`
    /// as a next hop, drops the neighbour record and stops its timer.
    pub async fn remove_neighbour_if_unused(&self, addr: Addr, net: NetIdx, route_table: &RouteTable) {
        if route_table.any_valid_via(addr, net).await {
            return;
        }
        self.neighbours.lock().await.remove(&(addr, net));
    }

    pub async fn is_live(&self, addr: Addr, net: NetIdx, now: Instant) -> bool {
        self.neighbours
            .lock()
            .await
            .get(&(addr, net))
            .is_some_and(|n| now.duration_since(n.last_heard) < self.hello_lifetime)
    }

    /// Drops neighbours not heard from within `hello_lifetime`, returning
    /// the `(addr, net)` pairs that expired so the caller can invalidate
    /// any routes that used them as a next hop.
    pub async fn reap_expired(&self, now: Instant) -> Vec<(Addr, NetIdx)> {
        let mut neighbours = self.neighbours.lock().await;
        let expired: Vec<(Addr, NetIdx)> = neighbours
            .values()
            .filter(|n| now.duration_since(n.last_heard) >= self.hello_lifetime)
            .map(|n| (n.addr, n.net_idx))
            .collect();
        for key in &expired {
            neighbours.remove(key);
        }
        expired
    }

    pub async fn snapshot(&self) -> Vec<NeighbourRecord> {
        self.neighbours.lock().await.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteEngineConfig;

    const NET: NetIdx = 0;

    #[tokio::test]
    async fn fresh_neighbour_is_live() {
        let tracker = HelloTracker::new(4, Duration::from_millis(50));
        let now = Instant::now();
        tracker.add_neighbour(0x0002, NET, now).await.unwrap();
        assert!(tracker.is_live(0x0002, NET, now).await);
    }

    #[tokio::test]
    async fn stale_neighbour_reaped() {
        let tracker = HelloTracker::new(4, Duration::from_millis(10));
        let now = Instant::now();
        tracker.add_neighbour(0x0002, NET, now).await.unwrap();

        let later = now + Duration::from_millis(20);
        assert!(!tracker.is_live(0x0002, NET, later).await);
        let expired = tracker.reap_expired(later).await;
        assert_eq!(expired, vec![(0x0002, NET)]);
        assert!(tracker.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn capacity_declines_new_entries_but_keeps_existing() {
        let tracker = HelloTracker::new(1, Duration::from_secs(60));
        let now = Instant::now();
        tracker.add_neighbour(0x0002, NET, now).await.unwrap();
        let err = tracker.add_neighbour(0x0003, NET, now).await.unwrap_err();
        assert_eq!(err, RouteError::ResourceExhausted("hello"));
        assert!(tracker.is_live(0x0002, NET, now).await);
        assert!(!tracker.is_live(0x0003, NET, now).await);
    }

    #[tokio::test]
    async fn on_hello_refreshes_but_never_creates() {
        let tracker = HelloTracker::new(4, Duration::from_millis(50));
        let now = Instant::now();

        tracker.on_hello(0x0002, NET, now).await;
        assert!(!tracker.is_live(0x0002, NET, now).await, "a bare Hello does not create a neighbour");

        tracker.add_neighbour(0x0002, NET, now).await.unwrap();
        let later = now + Duration::from_millis(30);
        tracker.on_hello(0x0002, NET, later).await;
        assert!(tracker.is_live(0x0002, NET, later).await, "on_hello refreshed the tracked neighbour");
    }

    #[tokio::test]
    async fn distinct_nets_with_the_same_address_do_not_collide() {
        let tracker = HelloTracker::new(4, Duration::from_secs(60));
        let now = Instant::now();
        tracker.add_neighbour(0x0002, 0, now).await.unwrap();
        assert!(tracker.is_live(0x0002, 0, now).await);
        assert!(!tracker.is_live(0x0002, 1, now).await, "same addr, different net: not tracked");
    }

    #[tokio::test]
    async fn remove_neighbour_if_unused_keeps_neighbours_still_routed_through() {
        let config = RouteEngineConfig::default();
        let route_table = RouteTable::new(&config);
        let tracker = HelloTracker::new(4, Duration::from_secs(60));
        let now = Instant::now();
        tracker.add_neighbour(0x0002, NET, now).await.unwrap();

        route_table
            .insert_or_refresh(crate::route_table::new_entry(
                crate::types::ElementRange::single(0x0009),
                1,
                true,
                0x0002,
                1,
                NET,
                -50,
                now + config.lifetime_data,
            ))
            .await
            .unwrap();

        tracker.remove_neighbour_if_unused(0x0002, NET, &route_table).await;
        assert!(tracker.is_live(0x0002, NET, now).await, "still used as a next hop, kept");
    }

    #[tokio::test]
    async fn remove_neighbour_if_unused_drops_an_unrouted_neighbour() {
        let config = RouteEngineConfig::default();
        let route_table = RouteTable::new(&config);
        let tracker = HelloTracker::new(4, Duration::from_secs(60));
        let now = Instant::now();
        tracker.add_neighbour(0x0002, NET, now).await.unwrap();

        tracker.remove_neighbour_if_unused(0x0002, NET, &route_table).await;
        assert!(!tracker.is_live(0x0002, NET, now).await, "no route uses it, dropped");
    }
}
