use std::net::AddrParseError;
use std::time::Duration;

use pingu_core::{PeerAddr, WireError};

/// Errors surfaced to callers of the engine.
///
/// Per-datagram and per-address failures inside the receive loop and
/// broadcast cycles never reach this type; they are logged and contained.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid address {input:?}: {source}")]
    InvalidAddress {
        input: String,
        #[source]
        source: AddrParseError,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send ping to {addr}: {source}")]
    SendFailure {
        addr: PeerAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("ping-pong failed ip: {addr}, timeout: {timeout:?}")]
    PingPongTimeout { addr: PeerAddr, timeout: Duration },

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Parse a user-supplied endpoint, mapping failure to `InvalidAddress`.
pub(crate) fn parse_addr(input: &str) -> Result<PeerAddr, EngineError> {
    input.parse().map_err(|source| EngineError::InvalidAddress {
        input: input.to_string(),
        source,
    })
}
