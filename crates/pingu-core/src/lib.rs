//! pingu-core: shared types, wire format, and configuration.
//! All other Pingu crates depend on this one.

pub mod addr;
pub mod config;
pub mod wire;

pub use addr::PeerAddr;
pub use config::{EngineConfig, OverflowPolicy, PinguConfig};
pub use wire::{Packet, PacketKind, WireError};
