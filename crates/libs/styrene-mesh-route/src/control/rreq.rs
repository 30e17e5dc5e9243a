use super::{ControlMessages, DispatchOutcome, PendingReply};
use crate::collaborators::Collaborators;
use crate::config::RouteEngineConfig;
use crate::error::RouteError;
use crate::hello::HelloTracker;
use crate::route_table::{new_entry, RouteTable};
use crate::types::{blend_rssi, CtlOp, ElementRange, RxMeta};
use crate::wire::{Rreq, RreqFlags, Rwait};
use std::time::Instant;

pub async fn handle<C: Collaborators>(
    control: &ControlMessages,
    route_table: &RouteTable,
    hello: &HelloTracker,
    collaborators: &C,
    config: &RouteEngineConfig,
    rx: RxMeta,
    bytes: &[u8],
) -> Result<DispatchOutcome, RouteError> {
    let rreq = Rreq::from_bytes(bytes)?;

    if collaborators.elem_find(rreq.source_addr) {
        return Ok(DispatchOutcome::None);
    }
    if !control.seen_rreq.mark_seen(rreq.source_addr, rreq.source_seq, rx.net_idx).await {
        return Ok(DispatchOutcome::None);
    }

    let reverse_rssi = blend_rssi(rreq.rssi, rreq.hop_count, rx.rssi);

    if collaborators.elem_find(rreq.destination_addr) {
        return handle_as_destination(control, route_table, rx, rreq, reverse_rssi, config).await;
    }

    let reverse_candidate = new_entry(
        ElementRange::new(rreq.source_addr, rreq.source_elems),
        rreq.source_seq,
        true,
        rx.source_addr,
        rreq.hop_count + 1,
        rx.net_idx,
        reverse_rssi,
        Instant::now() + config.lifetime_data,
    );

    // Step 3 (spec §4.5): an intermediate node with a known, fresh-enough
    // route replies not with its own RREP but with a directed (I=1, TTL=1)
    // confirmation RREQ toward the cached next hop, plus an RWAIT back
    // toward the originator so it keeps its ring search open. The reverse
    // entry is always installed Invalid here — only the eventual RREP
    // walking back through this node validates it.
    if !rreq.flags.destination_only && !rreq.flags.intermediate_directed {
        if let Some(route) = route_table.search(rreq.destination_addr, rx.net_idx).await {
            let fresh_enough = route.dest_seq_known
                && (rreq.flags.unknown_dest_seq
                    || rreq
                        .destination_seq
                        .map_or(true, |req_seq| route.dest_seq.wrapping_sub(req_seq) as i32 >= 0));

            route_table.upsert_invalid(reverse_candidate.clone()).await?;
            hello.add_neighbour(rx.source_addr, rx.net_idx, Instant::now()).await?;

            if fresh_enough {
                let directed = Rreq {
                    source_addr: rreq.source_addr,
                    destination_addr: rreq.destination_addr,
                    source_elems: rreq.source_elems,
                    hop_count: rreq.hop_count + 1,
                    rssi: reverse_rssi as i8,
                    flags: RreqFlags { intermediate_directed: true, ..rreq.flags },
                    source_seq: rreq.source_seq,
                    destination_seq: rreq.destination_seq,
                };
                collaborators.send_ctl(route.next_hop, CtlOp::Rreq, &directed.to_bytes()).await?;

                let rwait = Rwait {
                    destination_addr: rreq.source_addr,
                    source_addr: rreq.destination_addr,
                    source_seq: rreq.source_seq,
                    hop_count: route.hop_count,
                };
                collaborators.send_ctl(rx.source_addr, CtlOp::Rwait, &rwait.to_bytes()).await?;
                return Ok(DispatchOutcome::None);
            }
            // Route known but not fresh enough to confirm: fall through to
            // a plain relay (step 4), having already installed the reverse
            // entry above.
            if rx.recv_ttl == 0 {
                return Ok(DispatchOutcome::None);
            }
            return relay(collaborators, rreq, reverse_rssi).await;
        }
    }

    // Step 4: plain intermediate relay. Only relay if this sighting
    // created or refreshed the reverse entry — a duplicate sighting with a
    // stale or equal sequence number has nothing new to offer downstream.
    let should_relay = route_table.upsert_invalid(reverse_candidate).await?;
    hello.add_neighbour(rx.source_addr, rx.net_idx, Instant::now()).await?;

    if !should_relay || rx.recv_ttl == 0 {
        return Ok(DispatchOutcome::None);
    }
    relay(collaborators, rreq, reverse_rssi).await
}

async fn relay<C: Collaborators>(
    collaborators: &C,
    rreq: Rreq,
    reverse_rssi: i32,
) -> Result<DispatchOutcome, RouteError> {
    let forwarded = Rreq {
        source_addr: rreq.source_addr,
        destination_addr: rreq.destination_addr,
        source_elems: rreq.source_elems,
        hop_count: rreq.hop_count + 1,
        rssi: reverse_rssi as i8,
        flags: rreq.flags,
        source_seq: rreq.source_seq,
        destination_seq: rreq.destination_seq,
    };
    collaborators
        .send_ctl(crate::types::BROADCAST_ADDR, CtlOp::Rreq, &forwarded.to_bytes())
        .await
        .map(|()| DispatchOutcome::None)
}

/// The destination's role: this RREQ names one of our own elements.
///
/// A Valid reverse route toward `rreq.source_addr` already existing means
/// a previous `RREQ_WAIT` window already closed and a RREP already went
/// out for this `(source, destination)` pair — the request arrived too
/// late, and is dropped without touching anything (`LateRreq`, spec §7).
/// Otherwise this sighting is folded into the pending reply for
/// `source_addr`; the caller arms a one-shot `RREQ_WAIT` timer the first
/// time that pending entry is created (`DispatchOutcome::ArmRreqWait`), and
/// every later sighting during the same window only gets to replace it if
/// its path costs less (spec §4.1's replacement rule, §8 property 3).
async fn handle_as_destination(
    control: &ControlMessages,
    route_table: &RouteTable,
    rx: RxMeta,
    rreq: Rreq,
    reverse_rssi: i32,
    config: &RouteEngineConfig,
) -> Result<DispatchOutcome, RouteError> {
    if route_table.search(rreq.source_addr, rx.net_idx).await.is_some() {
        log::debug!("late RREQ from {:#06x}, wait window already closed", rreq.source_addr);
        return Ok(DispatchOutcome::None);
    }

    let candidate = PendingReply {
        hop_count: rreq.hop_count,
        rssi: reverse_rssi,
        source_seq: rreq.source_seq,
        source_elems: rreq.source_elems,
        reverse_next_hop: rx.source_addr,
        net_idx: rx.net_idx,
        destination_addr: rreq.destination_addr,
    };
    let is_new =
        control.pending.upsert(rreq.source_addr, rx.net_idx, candidate, config.rssi_min).await?;
    Ok(if is_new {
        DispatchOutcome::ArmRreqWait(rreq.source_addr, rx.net_idx)
    } else {
        DispatchOutcome::None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::tests_support::FakeCollaborators;
    use crate::route_table::RouteTable;
    use crate::types::ElementRange;
    use crate::wire::RreqFlags;

    const NET: u16 = 0;

    fn config() -> RouteEngineConfig {
        RouteEngineConfig::default()
    }

    fn fast_config() -> RouteEngineConfig {
        RouteEngineConfig { rwait_list_size: 4, number_of_entries: 8, ..RouteEngineConfig::default() }
    }

    fn hello_tracker(config: &RouteEngineConfig) -> HelloTracker {
        HelloTracker::new(config.hello_list_size, config.hello_lifetime)
    }

    fn rx(source_addr: u16) -> RxMeta {
        RxMeta { source_addr, dest_addr: 0xffff, net_idx: NET, rssi: -60, recv_ttl: 5 }
    }

    fn base_rreq(source_addr: u16, destination_addr: u16, hop_count: u8, rssi: i8, seq: u32) -> Rreq {
        Rreq {
            source_addr,
            destination_addr,
            source_elems: 1,
            hop_count,
            rssi,
            flags: RreqFlags::default(),
            source_seq: seq,
            destination_seq: None,
        }
    }

    #[tokio::test]
    async fn duplicate_source_and_seq_is_dropped() {
        let control = ControlMessages::new(&config());
        let route_table = RouteTable::new(&config());
        let hello = hello_tracker(&config());
        let collaborators = FakeCollaborators::new(0x0001);
        let rreq = base_rreq(0x0005, 0x0009, 0, -50, 1);
        let bytes = rreq.to_bytes();

        handle(&control, &route_table, &hello, &collaborators, &config(), rx(0x0002), &bytes)
            .await
            .unwrap();
        let sent_after_first = collaborators.sent_count();
        handle(&control, &route_table, &hello, &collaborators, &config(), rx(0x0002), &bytes)
            .await
            .unwrap();
        assert_eq!(collaborators.sent_count(), sent_after_first, "duplicate must not re-forward");
    }

    #[tokio::test]
    async fn duplicate_is_not_suppressed_across_distinct_nets() {
        let control = ControlMessages::new(&config());
        let route_table = RouteTable::new(&config());
        let hello = hello_tracker(&config());
        let collaborators = FakeCollaborators::new(0x0001);
        let rreq = base_rreq(0x0005, 0x0009, 0, -50, 1);
        let bytes = rreq.to_bytes();
        let mut rx_net1 = rx(0x0002);
        rx_net1.net_idx = 1;

        handle(&control, &route_table, &hello, &collaborators, &config(), rx(0x0002), &bytes)
            .await
            .unwrap();
        let sent_after_first = collaborators.sent_count();
        handle(&control, &route_table, &hello, &collaborators, &config(), rx_net1, &bytes)
            .await
            .unwrap();
        assert!(collaborators.sent_count() > sent_after_first, "distinct net must relay independently");
    }

    #[tokio::test]
    async fn destination_opens_a_wait_window_instead_of_replying_immediately() {
        let control = ControlMessages::new(&fast_config());
        let route_table = RouteTable::new(&fast_config());
        let hello = hello_tracker(&fast_config());
        let collaborators = FakeCollaborators::new(0x0009);
        let rreq = base_rreq(0x0005, 0x0009, 0, -50, 1);

        let outcome =
            handle(&control, &route_table, &hello, &collaborators, &fast_config(), rx(0x0002), &rreq.to_bytes())
                .await
                .unwrap();

        assert_eq!(outcome, DispatchOutcome::ArmRreqWait(0x0005, NET));
        assert!(collaborators.last_sent().is_none(), "no RREP before the wait window closes");
        assert!(
            route_table.search(0x0005, NET).await.is_none(),
            "reverse route not installed until the timer fires"
        );
    }

    #[tokio::test]
    async fn second_sighting_during_wait_window_does_not_rearm_the_timer() {
        let control = ControlMessages::new(&fast_config());
        let route_table = RouteTable::new(&fast_config());
        let hello = hello_tracker(&fast_config());
        let collaborators = FakeCollaborators::new(0x0009);
        let first = base_rreq(0x0005, 0x0009, 3, -85, 1);
        let second = base_rreq(0x0005, 0x0009, 2, -70, 1);

        let first_outcome = handle(
            &control,
            &route_table,
            &hello,
            &collaborators,
            &fast_config(),
            rx(0x0002),
            &first.to_bytes(),
        )
        .await
        .unwrap();
        assert_eq!(first_outcome, DispatchOutcome::ArmRreqWait(0x0005, NET));

        let second_outcome = handle(
            &control,
            &route_table,
            &hello,
            &collaborators,
            &fast_config(),
            rx(0x0007),
            &second.to_bytes(),
        )
        .await
        .unwrap();
        assert_eq!(second_outcome, DispatchOutcome::None, "no second timer armed");

        let pending = control.pending.take(0x0005, NET).await.expect("better candidate kept");
        assert_eq!(pending.reverse_next_hop, 0x0007, "the lower-cost path replaced the first");
    }

    #[tokio::test]
    async fn late_rreq_is_dropped_once_a_valid_reverse_route_exists() {
        let config = fast_config();
        let control = ControlMessages::new(&config);
        let route_table = RouteTable::new(&config);
        let hello = hello_tracker(&config);
        let collaborators = FakeCollaborators::new(0x0009);

        route_table
            .insert_or_refresh(new_entry(
                ElementRange::single(0x0005),
                1,
                true,
                0x0002,
                1,
                NET,
                -50,
                Instant::now() + config.lifetime_data,
            ))
            .await
            .unwrap();

        let rreq = base_rreq(0x0005, 0x0009, 0, -50, 2);
        let outcome =
            handle(&control, &route_table, &hello, &collaborators, &config, rx(0x0002), &rreq.to_bytes())
                .await
                .unwrap();

        assert_eq!(outcome, DispatchOutcome::None);
        assert!(collaborators.last_sent().is_none(), "late RREQ gets no reply");
        assert!(control.pending.take(0x0005, NET).await.is_none(), "no pending entry created");
    }

    #[tokio::test]
    async fn plain_relay_installs_an_invalid_reverse_route_toward_source() {
        let control = ControlMessages::new(&config());
        let route_table = RouteTable::new(&config());
        let hello = hello_tracker(&config());
        let collaborators = FakeCollaborators::new(0x0001);
        let rreq = base_rreq(0x0005, 0x0009, 2, -50, 1);
        handle(&control, &route_table, &hello, &collaborators, &config(), rx(0x0002), &rreq.to_bytes())
            .await
            .unwrap();

        assert!(route_table.search(0x0005, NET).await.is_none(), "reverse route is Invalid, not Valid");
        let reverse = route_table.search_invalid(0x0005, NET).await.expect("invalid reverse route present");
        assert_eq!(reverse.next_hop, 0x0002);
        assert_eq!(reverse.hop_count, 3);
        assert!(hello.is_live(0x0002, NET, Instant::now()).await, "reverse next hop tracked as a neighbour");
    }

    #[tokio::test]
    async fn known_fresh_route_sends_directed_rreq_and_rwait_instead_of_an_rrep() {
        let control = ControlMessages::new(&config());
        let route_table = RouteTable::new(&config());
        let hello = hello_tracker(&config());
        let collaborators = FakeCollaborators::new(0x0001);

        route_table
            .insert_or_refresh(new_entry(
                ElementRange::single(0x0009),
                5,
                true,
                0x0007,
                1,
                NET,
                -50,
                Instant::now() + config().lifetime_data,
            ))
            .await
            .unwrap();

        let rreq = base_rreq(0x0005, 0x0009, 2, -50, 1);
        let outcome =
            handle(&control, &route_table, &hello, &collaborators, &config(), rx(0x0002), &rreq.to_bytes())
                .await
                .unwrap();

        assert_eq!(outcome, DispatchOutcome::None);
        let sent = collaborators.all_sent();
        assert_eq!(sent.len(), 2, "a directed RREQ and an RWAIT, no RREP");
        let (directed_tx, directed_op, directed_bytes) = &sent[0];
        assert_eq!(*directed_tx, 0x0007, "confirmation RREQ goes to the cached next hop");
        assert_eq!(*directed_op, CtlOp::Rreq);
        let directed = Rreq::from_bytes(directed_bytes).unwrap();
        assert!(directed.flags.intermediate_directed);

        let (wait_tx, wait_op, wait_bytes) = &sent[1];
        assert_eq!(*wait_tx, 0x0002, "RWAIT goes back toward the originator's next hop");
        assert_eq!(*wait_op, CtlOp::Rwait);
        let rwait = Rwait::from_bytes(wait_bytes).unwrap();
        assert_eq!(rwait.destination_addr, 0x0005);

        let reverse = route_table.search_invalid(0x0005, NET).await.expect("reverse entry pending validation");
        assert_eq!(reverse.next_hop, 0x0002);
    }

    #[tokio::test]
    async fn already_directed_rreq_falls_through_to_plain_relay() {
        // A directed (I=1) confirmation RREQ landing on another intermediate
        // node that also happens to hold a cached route must not re-enter
        // the step-3 shortcut (that would re-emit yet another directed RREQ
        // + RWAIT); it relays straight on per step 4.
        let control = ControlMessages::new(&config());
        let route_table = RouteTable::new(&config());
        let hello = hello_tracker(&config());
        let collaborators = FakeCollaborators::new(0x0001);

        route_table
            .insert_or_refresh(new_entry(
                ElementRange::single(0x0009),
                5,
                true,
                0x0007,
                1,
                NET,
                -50,
                Instant::now() + config().lifetime_data,
            ))
            .await
            .unwrap();

        let mut rreq = base_rreq(0x0005, 0x0009, 2, -50, 1);
        rreq.flags.intermediate_directed = true;
        let outcome =
            handle(&control, &route_table, &hello, &collaborators, &config(), rx(0x0002), &rreq.to_bytes())
                .await
                .unwrap();

        assert_eq!(outcome, DispatchOutcome::None);
        let sent = collaborators.all_sent();
        assert_eq!(sent.len(), 1, "plain relay only, no re-directed RREQ or RWAIT");
        let (tx, op, bytes) = &sent[0];
        assert_eq!(*tx, crate::types::BROADCAST_ADDR);
        assert_eq!(*op, CtlOp::Rreq);
        let relayed = Rreq::from_bytes(bytes).unwrap();
        assert!(relayed.flags.intermediate_directed, "directed flag preserved through relay");
    }

    #[tokio::test]
    async fn known_stale_route_falls_back_to_plain_relay() {
        let control = ControlMessages::new(&config());
        let route_table = RouteTable::new(&config());
        let hello = hello_tracker(&config());
        let collaborators = FakeCollaborators::new(0x0001);

        route_table
            .insert_or_refresh(new_entry(
                ElementRange::single(0x0009),
                1,
                true,
                0x0007,
                1,
                NET,
                -50,
                Instant::now() + config().lifetime_data,
            ))
            .await
            .unwrap();

        let mut rreq = base_rreq(0x0005, 0x0009, 2, -50, 1);
        rreq.destination_seq = Some(9);
        rreq.flags.unknown_dest_seq = false;
        let outcome =
            handle(&control, &route_table, &hello, &collaborators, &config(), rx(0x0002), &rreq.to_bytes())
                .await
                .unwrap();

        assert_eq!(outcome, DispatchOutcome::None);
        let (tx, op, _) = collaborators.last_sent().expect("relayed as a plain broadcast RREQ");
        assert_eq!(tx, crate::types::BROADCAST_ADDR);
        assert_eq!(op, CtlOp::Rreq);
    }
}
