use thiserror::Error;

/// Error surface for the routing engine.
///
/// Variant names follow the error *kinds* named in the protocol design
/// rather than the call site that produced them — several different
/// operations can fail with `ResourceExhausted`, for instance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("route request source is a local element")]
    LocalLoopback,

    #[error("route request arrived after the destination's wait window closed")]
    LateRreq,

    #[error("ring search exhausted RING_MAX_TTL without a reply")]
    NoReply,

    #[error("{0} pool exhausted")]
    ResourceExhausted(&'static str),

    #[error("buffer too short to decode {0}")]
    DecodeShort(&'static str),

    #[error("lower layer reported a send failure: {0}")]
    SendFailure(String),
}
