//! Abstract host-stack collaborators. The engine is generic over an implementation of
//! [`Collaborators`] so it never touches encryption, TTL/TransMIC framing,
//! element enumeration, or the radio directly.

use crate::error::RouteError;
use crate::types::{Addr, CtlOp, NetIdx, SeqNum};
use async_trait::async_trait;

/// Host-stack services the routing engine calls out to. One implementation
/// per host; a fake implementation backs the scenario tests (`tests/`).
#[async_trait]
pub trait Collaborators: Send + Sync + 'static {
    /// Encrypt, frame, and radiate `bytes` as control opcode `op` toward
    /// `tx` (a next hop, or a broadcast target the lower layer resolves).
    async fn send_ctl(&self, tx: Addr, op: CtlOp, bytes: &[u8]) -> Result<(), RouteError>;

    /// Subnet key material for `net_idx`, or `None` if we don't hold a key
    /// for that subnet. Consumed by the lower layer, not by routing logic.
    fn subnet_get(&self, net_idx: NetIdx) -> Option<Vec<u8>>;

    /// This node's primary (base) element address.
    fn primary_addr(&self) -> Addr;

    /// Number of contiguous elements this node owns, starting at
    /// `primary_addr()`.
    fn elem_count(&self) -> u16;

    /// True if `addr` names one of this node's local elements.
    fn elem_find(&self, addr: Addr) -> bool;

    /// The current session sequence number, used to refresh `src_seq` on
    /// each ring-search TTL step.
    fn session_seq(&self) -> SeqNum;
}
