use crate::collaborators::Collaborators;
use crate::config::RouteEngineConfig;
use crate::error::RouteError;
use crate::error_collector::ErrorCollector;
use crate::hello::HelloTracker;
use crate::route_table::RouteTable;
use crate::types::{CtlOp, RxMeta, BROADCAST_ADDR};
use crate::wire::Rerr;
use std::time::Instant;

/// Invalidates the routes this RERR reports broken, then hands the ones we
/// actually acted on to the error collector so they get re-announced in
/// this node's own (coalesced) RERR rather than sent one at a time. Per
/// spec §4.4/§4.5, the re-propagated RERR goes out on reception — the
/// collector is flushed and each aggregated group sent immediately, rather
/// than left for the next `run_maintenance` tick. Once the invalidation
/// pass is done, the sender is checked against the route table again: if
/// nothing still routes through it, it's dropped as a tracked neighbour
/// rather than waiting out its own Hello timeout.
pub async fn handle<C: Collaborators>(
    route_table: &RouteTable,
    error_collector: &ErrorCollector,
    hello: &HelloTracker,
    collaborators: &C,
    _config: &RouteEngineConfig,
    rx: RxMeta,
    bytes: &[u8],
) -> Result<(), RouteError> {
    let rerr = Rerr::from_bytes(bytes)?;
    let reported: Vec<_> = rerr.destinations.iter().map(|d| (d.dest_addr, d.dest_seq)).collect();

    let invalidated = route_table
        .invalidate_reported(rx.source_addr, rx.net_idx, &reported, Instant::now())
        .await;
    for (dest_addr, dest_seq) in invalidated {
        error_collector.record(rx.source_addr, rx.net_idx, dest_addr, dest_seq).await?;
    }

    for (_next_hop, _net_idx, rerr) in error_collector.flush_all().await {
        if let Err(err) = collaborators.send_ctl(BROADCAST_ADDR, CtlOp::Rerr, &rerr.to_bytes()).await {
            log::warn!("rerr relay send failed: {}", err);
        }
    }

    hello.remove_neighbour_if_unused(rx.source_addr, rx.net_idx, route_table).await;
    Ok(())
}
