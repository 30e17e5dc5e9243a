use crate::collaborators::Collaborators;
use crate::config::RouteEngineConfig;
use crate::discovery::DiscoveryCoordinator;
use crate::error::RouteError;
use crate::hello::HelloTracker;
use crate::route_table::{new_entry, RouteTable};
use crate::types::{CtlOp, ElementRange, RxMeta};
use crate::wire::Rrep;
use std::time::Instant;

pub async fn handle<C: Collaborators>(
    discovery: &DiscoveryCoordinator,
    route_table: &RouteTable,
    hello: &HelloTracker,
    collaborators: &C,
    config: &RouteEngineConfig,
    rx: RxMeta,
    bytes: &[u8],
) -> Result<(), RouteError> {
    let rrep = Rrep::from_bytes(bytes)?;

    let forward = new_entry(
        ElementRange::new(rrep.destination_addr, rrep.destination_elems),
        rrep.destination_seq,
        true,
        rx.source_addr,
        rrep.hop_count + 1,
        rx.net_idx,
        rx.rssi,
        Instant::now() + config.lifetime_data,
    );
    let installed = forward.clone();
    route_table.insert_or_refresh(forward).await?;
    hello.add_neighbour(rx.source_addr, rx.net_idx, Instant::now()).await?;

    if collaborators.elem_find(rrep.source_addr) {
        if let Some(event) = discovery.reply_events.find(rrep.destination_addr, rx.net_idx).await {
            event.resolve(installed).await;
        }
        return Ok(());
    }

    // Intermediate relay: the reverse entry toward `rrep.source_addr` was
    // installed Invalid while this node forwarded the original RREQ (or
    // sent its own directed confirmation). This RREP is exactly the
    // confirmation that route was waiting for, so promote it to Valid
    // rather than merely reading it back.
    if let Some(reverse) = route_table.validate(rrep.source_addr, rx.net_idx, Instant::now()).await? {
        hello.add_neighbour(reverse.next_hop, rx.net_idx, Instant::now()).await?;
        let forwarded = Rrep {
            r: rrep.r,
            source_addr: rrep.source_addr,
            destination_addr: rrep.destination_addr,
            destination_seq: rrep.destination_seq,
            hop_count: rrep.hop_count + 1,
            destination_elems: rrep.destination_elems,
        };
        return collaborators.send_ctl(reverse.next_hop, CtlOp::Rrep, &forwarded.to_bytes()).await;
    }
    Ok(())
}
