//! The destination route table: a valid list and an invalid list, each a
//! fixed-capacity arena behind its own lock. Every lookup and match is
//! keyed by `(dest_addr, net_idx)`, never `dest_addr` alone — two subnets
//! sharing an address range are distinct destinations.

pub mod entry;

pub use entry::RouteEntry;

use crate::config::RouteEngineConfig;
use crate::error::RouteError;
use crate::types::{Addr, ElementRange, NetIdx, SeqNum};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Opaque index into a list's arena. Stable until the slot is freed;
/// callers should treat a stale handle as "not found", not as UB, since
/// slots are generation-free (the lists are small and short-lived enough
/// that ABA doesn't arise from outside this module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteHandle(usize);

struct Arena<T> {
    capacity: usize,
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Arena<T> {
    fn new(capacity: usize) -> Self {
        Self { capacity, slots: Vec::with_capacity(capacity), free: Vec::new() }
    }

    fn insert(&mut self, value: T) -> Result<RouteHandle, RouteError> {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(value);
            return Ok(RouteHandle(idx));
        }
        if self.slots.len() >= self.capacity {
            return Err(RouteError::ResourceExhausted("route"));
        }
        self.slots.push(Some(value));
        Ok(RouteHandle(self.slots.len() - 1))
    }

    fn get_mut(&mut self, handle: RouteHandle) -> Option<&mut T> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.as_mut())
    }

    fn remove(&mut self, handle: RouteHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.0)?;
        let value = slot.take()?;
        self.free.push(handle.0);
        Some(value)
    }

    fn iter(&self) -> impl Iterator<Item = (RouteHandle, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|value| (RouteHandle(i), value)))
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

fn covers(entry: &RouteEntry, addr: Addr, net: NetIdx) -> bool {
    entry.net_idx == net && entry.dest.contains(addr)
}

fn same_range(entry: &RouteEntry, candidate: &RouteEntry) -> bool {
    entry.net_idx == candidate.net_idx && entry.dest.overlaps(&candidate.dest)
}

pub struct RouteTable {
    valid: Mutex<Arena<RouteEntry>>,
    invalid: Mutex<Arena<RouteEntry>>,
    rssi_min: i32,
    lifetime_data: Duration,
}

impl RouteTable {
    pub fn new(config: &RouteEngineConfig) -> Self {
        Self {
            valid: Mutex::new(Arena::new(config.number_of_entries)),
            invalid: Mutex::new(Arena::new(config.number_of_entries)),
            rssi_min: config.rssi_min,
            lifetime_data: config.lifetime_data,
        }
    }

    /// Best valid route covering `(addr, net)`, chosen by lowest path cost.
    pub async fn search(&self, addr: Addr, net: NetIdx) -> Option<RouteEntry> {
        let valid = self.valid.lock().await;
        valid
            .iter()
            .filter(|(_, e)| covers(e, addr, net))
            .min_by_key(|(_, e)| e.cost(self.rssi_min))
            .map(|(_, e)| e.clone())
    }

    /// The invalid entry remembering `(addr, net)`, if one exists. Used to
    /// decide whether a link break at `addr` is even worth an RERR, and by
    /// the RREQ relay path to compare freshness before refreshing.
    pub async fn search_invalid(&self, addr: Addr, net: NetIdx) -> Option<RouteEntry> {
        let invalid = self.invalid.lock().await;
        invalid.iter().find(|(_, e)| covers(e, addr, net)).map(|(_, e)| e.clone())
    }

    /// Inserts a freshly discovered or refreshed route, applying the
    /// sequence-number/cost replacement rule against any existing valid
    /// entry covering the same `(destination range, net)`. Drops a matching
    /// invalid entry on promotion so the destination isn't tracked twice.
    pub async fn insert_or_refresh(&self, candidate: RouteEntry) -> Result<(), RouteError> {
        let mut valid = self.valid.lock().await;
        let existing =
            valid.iter().find(|(_, e)| same_range(e, &candidate)).map(|(h, e)| (h, e.clone()));

        if let Some((handle, current)) = existing {
            if current.should_replace(&candidate, self.rssi_min) {
                *valid.get_mut(handle).expect("handle valid within this lock scope") = candidate;
            }
            return Ok(());
        }
        drop(valid);

        {
            let mut invalid = self.invalid.lock().await;
            if let Some((handle, _)) = invalid.iter().find(|(_, e)| same_range(e, &candidate)) {
                invalid.remove(handle);
            }
        }

        self.valid.lock().await.insert(candidate)?;
        Ok(())
    }

    /// Creates an Invalid entry for `candidate`'s `(dest range, net)` if
    /// none exists yet, or refreshes the one on file in place if
    /// `candidate` carries a strictly fresher (or previously-unknown)
    /// sequence number. Leaves an existing, equally-or-more-fresh entry
    /// untouched. Returns whether the entry was created or refreshed, so
    /// a plain-relay caller (spec §4.5 step 4) knows whether to keep
    /// relaying a duplicate RREQ.
    pub async fn upsert_invalid(&self, candidate: RouteEntry) -> Result<bool, RouteError> {
        let mut invalid = self.invalid.lock().await;
        let existing =
            invalid.iter().find(|(_, e)| same_range(e, &candidate)).map(|(h, e)| (h, e.clone()));

        if let Some((handle, current)) = existing {
            let fresher = !current.dest_seq_known
                || (candidate.dest_seq_known
                    && candidate.dest_seq.wrapping_sub(current.dest_seq) as i32 > 0);
            if fresher {
                *invalid.get_mut(handle).expect("handle valid within this lock scope") = candidate;
                return Ok(true);
            }
            return Ok(false);
        }
        invalid.insert(candidate)?;
        Ok(true)
    }

    /// Promotes the Invalid entry covering `(addr, net)` to Valid, refreshing
    /// its deadline to `now + LIFETIME_DATA`. Used when a RREP confirms a
    /// reverse entry an intermediate relay created while forwarding the
    /// original RREQ (spec §4.5, RREP reception, "otherwise" branch).
    /// Returns the validated entry, or `None` if no such Invalid entry
    /// exists.
    pub async fn validate(
        &self,
        addr: Addr,
        net: NetIdx,
        now: Instant,
    ) -> Result<Option<RouteEntry>, RouteError> {
        let mut invalid = self.invalid.lock().await;
        let Some((handle, _)) = invalid.iter().find(|(_, e)| covers(e, addr, net)) else {
            return Ok(None);
        };
        let mut entry = invalid.remove(handle).expect("handle just found");
        drop(invalid);

        entry.lifetime = now + self.lifetime_data;
        let validated = entry.clone();
        self.valid.lock().await.insert(entry)?;
        Ok(Some(validated))
    }

    /// True if some valid entry still uses `next_hop` as its next hop in
    /// `net` — consulted by `HelloTracker::remove_neighbour_if_unused`.
    pub async fn any_valid_via(&self, next_hop: Addr, net: NetIdx) -> bool {
        self.valid.lock().await.iter().any(|(_, e)| e.next_hop == next_hop && e.net_idx == net)
    }

    /// Moves every valid route whose next hop is `(next_hop, net)` into the
    /// invalid list, bumping its destination sequence number by one so a
    /// later RREQ with the old sequence number is recognised as stale.
    /// Returns the `(dest_addr, new_seq)` pairs moved, for RERR reporting.
    pub async fn link_drop(&self, next_hop: Addr, net: NetIdx, now: Instant) -> Vec<(Addr, SeqNum)> {
        let mut moved = Vec::new();
        let mut valid = self.valid.lock().await;
        let handles: Vec<RouteHandle> = valid
            .iter()
            .filter(|(_, e)| e.next_hop == next_hop && e.net_idx == net)
            .map(|(h, _)| h)
            .collect();
        for handle in handles {
            if let Some(mut entry) = valid.remove(handle) {
                entry.dest_seq = entry.dest_seq.wrapping_add(1);
                entry.dest_seq_known = true;
                entry.lifetime = now + self.lifetime_data;
                moved.push((entry.dest_addr(), entry.dest_seq));
                drop(valid);
                let mut invalid = self.invalid.lock().await;
                let _ = invalid.insert(entry);
                valid = self.valid.lock().await;
            }
        }
        moved
    }

    /// Invalidates the valid routes reached via `(next_hop, net)` whose
    /// destination appears in `reported`, and whose current sequence
    /// number is not already fresher than what was reported. Returns the
    /// `(dest_addr, new_seq)` pairs actually invalidated, i.e. the subset
    /// of `reported` this node should keep propagating in its own RERR.
    pub async fn invalidate_reported(
        &self,
        next_hop: Addr,
        net: NetIdx,
        reported: &[(Addr, SeqNum)],
        now: Instant,
    ) -> Vec<(Addr, SeqNum)> {
        let mut moved = Vec::new();
        for &(dest_addr, reported_seq) in reported {
            let mut valid = self.valid.lock().await;
            let hit = valid
                .iter()
                .find(|(_, e)| e.next_hop == next_hop && e.net_idx == net && e.dest.contains(dest_addr))
                .map(|(h, e)| (h, e.clone()));
            let Some((handle, entry)) = hit else { continue };
            if entry.dest_seq_known && reported_seq.wrapping_sub(entry.dest_seq) as i32 <= 0 {
                continue;
            }
            valid.remove(handle);
            drop(valid);
            let mut invalidated = entry;
            invalidated.dest_seq = reported_seq;
            invalidated.dest_seq_known = true;
            invalidated.lifetime = now + self.lifetime_data;
            moved.push((invalidated.dest_addr(), invalidated.dest_seq));
            let mut invalid = self.invalid.lock().await;
            let _ = invalid.insert(invalidated);
        }
        moved
    }

    /// Deletes every entry, valid or invalid, whose deadline has passed.
    /// A route's own timeout is a straight-to-deleted transition in both
    /// lists — `invalidate`/`link_drop` (Valid→Invalid, on link loss or a
    /// reported error) are the only paths that move an entry *between* the
    /// two lists; reaching `lifetime` is always terminal. Called
    /// periodically by the engine's maintenance task rather than on a
    /// per-entry timer, matching the lower layer's own "jobs" cadence.
    pub async fn reap_expired(&self, now: Instant) {
        let mut valid = self.valid.lock().await;
        let expired: Vec<RouteHandle> =
            valid.iter().filter(|(_, e)| e.is_expired(now)).map(|(h, _)| h).collect();
        for handle in expired {
            valid.remove(handle);
        }
        drop(valid);

        let mut invalid = self.invalid.lock().await;
        let stale: Vec<RouteHandle> =
            invalid.iter().filter(|(_, e)| e.is_expired(now)).map(|(h, _)| h).collect();
        for handle in stale {
            invalid.remove(handle);
        }
    }

    pub async fn valid_count(&self) -> usize {
        self.valid.lock().await.len()
    }

    pub async fn invalid_count(&self) -> usize {
        self.invalid.lock().await.len()
    }

    /// A point-in-time copy of every valid entry, for diagnostics and
    /// tests. Never held across an await in caller code.
    pub async fn snapshot(&self) -> Vec<RouteEntry> {
        self.valid.lock().await.iter().map(|(_, e)| e.clone()).collect()
    }
}

pub fn new_entry(
    dest: ElementRange,
    dest_seq: SeqNum,
    dest_seq_known: bool,
    next_hop: Addr,
    hop_count: u8,
    net_idx: NetIdx,
    rssi: i32,
    lifetime: Instant,
) -> RouteEntry {
    RouteEntry { dest, dest_seq, dest_seq_known, next_hop, hop_count, net_idx, rssi, lifetime }
}
