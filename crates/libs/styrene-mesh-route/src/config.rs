use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-capacity pool sizes and lifetimes, all taken from the protocol's
/// tuning constants. Bundled into a config rather than left as bare
/// constants so tests can shrink lifetimes without sleeping real wall-clock
/// seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteEngineConfig {
    pub number_of_entries: usize,
    pub rwait_list_size: usize,
    pub rerr_list_size: usize,
    pub hello_list_size: usize,

    pub lifetime_data: Duration,
    pub rreq_wait: Duration,
    pub ring_interval: Duration,
    pub ring_max_ttl: u8,
    pub hello_lifetime: Duration,

    pub rssi_min: i32,
    pub alloc_timeout: Duration,

    /// Base cooperative-yield interval for the discovery loop.
    pub discovery_poll_interval: Duration,
    /// Jitter window added to `discovery_poll_interval` so concurrent
    /// originators don't lock-step.
    pub discovery_poll_jitter: Duration,
}

impl Default for RouteEngineConfig {
    fn default() -> Self {
        Self {
            number_of_entries: 20,
            rwait_list_size: 20,
            rerr_list_size: 20,
            hello_list_size: 20,
            lifetime_data: Duration::from_secs(120),
            rreq_wait: Duration::from_secs(1),
            ring_interval: Duration::from_secs(10),
            ring_max_ttl: 10,
            hello_lifetime: Duration::from_secs(20),
            rssi_min: -90,
            alloc_timeout: Duration::from_millis(100),
            discovery_poll_interval: Duration::from_millis(50),
            discovery_poll_jitter: Duration::from_millis(10),
        }
    }
}

impl RouteEngineConfig {
    /// The RWAIT extension multiplier applied to `ring_interval` when an
    /// intermediate node signals it is working on a directed lookup.
    pub fn rwait_extension(&self) -> Duration {
        self.ring_interval * 4
    }
}
