mod common;

use common::Network;
use std::collections::HashMap;
use std::time::Duration;
use styrene_mesh_route::RouteEngineConfig;

fn fast_config() -> RouteEngineConfig {
    RouteEngineConfig {
        ring_max_ttl: 3,
        rreq_wait: Duration::from_millis(40),
        ring_interval: Duration::from_secs(5),
        discovery_poll_interval: Duration::from_millis(2),
        ..RouteEngineConfig::default()
    }
}

fn chain_adjacency() -> HashMap<u16, Vec<u16>> {
    HashMap::from([
        (0x0001, vec![0x0002]),
        (0x0002, vec![0x0001, 0x0003]),
        (0x0003, vec![0x0002]),
    ])
}

#[tokio::test]
async fn two_hop_discovery_installs_route_via_relay() {
    let network = Network::new(chain_adjacency(), fast_config());
    let a = network.node(0x0001);

    let route = a.route_send_request(0x0003).await.expect("route discovered");
    assert_eq!(route.next_hop, 0x0002);
    assert_eq!(route.hop_count, 2);

    let b = network.node(0x0002);
    let b_routes = b.route_table_snapshot().await;
    assert!(
        b_routes.iter().any(|r| r.dest_addr() == 0x0001),
        "relay keeps a reverse route toward the originator"
    );
    assert!(
        b_routes.iter().any(|r| r.dest_addr() == 0x0003),
        "relay keeps a forward route toward the destination"
    );

    network.stop_pump();
}

#[tokio::test]
async fn second_lookup_reuses_the_cached_route() {
    let network = Network::new(chain_adjacency(), fast_config());
    let a = network.node(0x0001);

    let first = a.route_send_request(0x0003).await.unwrap();
    let second = a.route_send_request(0x0003).await.unwrap();
    assert_eq!(first.next_hop, second.next_hop);
    assert_eq!(second.hop_count, 2);

    network.stop_pump();
}

#[tokio::test]
async fn unreachable_destination_exhausts_the_ring_search() {
    let network = Network::new(chain_adjacency(), fast_config());
    let a = network.node(0x0001);

    let err = a.route_send_request(0x0099).await.unwrap_err();
    assert_eq!(err, styrene_mesh_route::RouteError::NoReply);

    network.stop_pump();
}

#[tokio::test]
async fn concurrent_requests_for_the_same_destination_both_resolve() {
    let network = Network::new(chain_adjacency(), fast_config());
    let a = network.node(0x0001);
    let a2 = network.node(0x0001);

    let (first, second) =
        tokio::join!(a.route_send_request(0x0003), a2.route_send_request(0x0003));
    assert_eq!(first.unwrap().next_hop, 0x0002);
    assert_eq!(second.unwrap().next_hop, 0x0002);

    network.stop_pump();
}
