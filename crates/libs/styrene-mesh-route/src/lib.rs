//! Reactive, on-demand mesh route discovery and maintenance: an
//! AODV-style engine that finds and repairs paths between mesh elements
//! without a flooded topology exchange. The engine owns no radio, crypto,
//! or framing logic — a [`Collaborators`] implementation supplies those.

pub mod collaborators;
pub mod config;
pub mod control;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod error_collector;
pub mod hello;
pub mod route_table;
pub mod types;
pub mod wire;

pub use collaborators::Collaborators;
pub use config::RouteEngineConfig;
pub use engine::{Engine, EngineStats};
pub use error::RouteError;
pub use hello::NeighbourRecord;
pub use route_table::RouteEntry;
pub use types::{Addr, CtlOp, ElementRange, NetIdx, RxMeta, SeqNum, BROADCAST_ADDR};
