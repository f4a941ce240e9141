//! pingu-services: shared state of a liveness node.
//!
//! `peer` holds the registry and health table; `pending` correlates inbound
//! pongs with the probes waiting for them.

pub mod peer;
pub mod pending;

pub use peer::{PeerTable, SharedPeerTable};
pub use pending::{PendingProbes, ProbeGuard, ProbeId};
