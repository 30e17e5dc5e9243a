use crate::collaborators::Collaborators;
use crate::discovery::DiscoveryCoordinator;
use crate::error::RouteError;
use crate::route_table::RouteTable;
use crate::types::{CtlOp, RxMeta};
use crate::wire::Rwait;

/// `Rwait.destination_addr` names the node this hop should deliver the
/// message toward (the original RREQ's originator); `source_addr` is the
/// key under which that originator's search is tracked. When we are not
/// that originator, we relay only if our route table still has a reverse
/// entry pointing back toward it — without one there is nowhere to send
/// it. That entry may still be Invalid-pending-validation at this point
/// (an RWAIT legitimately arrives before the RREP that confirms it), so
/// both lists are checked.
pub async fn handle<C: Collaborators>(
    discovery: &DiscoveryCoordinator,
    route_table: &RouteTable,
    collaborators: &C,
    rx: RxMeta,
    bytes: &[u8],
) -> Result<(), RouteError> {
    let rwait = Rwait::from_bytes(bytes)?;

    if collaborators.elem_find(rwait.destination_addr) {
        if let Some(event) = discovery.reply_events.find(rwait.source_addr, rx.net_idx).await {
            event.mark_extended().await;
        }
        return Ok(());
    }

    let reverse = match route_table.search(rwait.destination_addr, rx.net_idx).await {
        Some(entry) => Some(entry),
        None => route_table.search_invalid(rwait.destination_addr, rx.net_idx).await,
    };

    if let Some(reverse) = reverse {
        let forwarded = Rwait {
            destination_addr: rwait.destination_addr,
            source_addr: rwait.source_addr,
            source_seq: rwait.source_seq,
            hop_count: rwait.hop_count + 1,
        };
        return collaborators
            .send_ctl(reverse.next_hop, CtlOp::Rwait, &forwarded.to_bytes())
            .await;
    }
    Ok(())
}
