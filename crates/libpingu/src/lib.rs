//! libpingu: UDP peer liveness over a PING/PONG handshake.
//!
//! ```no_run
//! # async fn demo() -> Result<(), libpingu::EngineError> {
//! use std::time::Duration;
//! use libpingu::{Engine, EngineConfig};
//!
//! let engine = Engine::bind("127.0.0.1:0", EngineConfig::default())?;
//! engine.start();
//! engine.register("127.0.0.1:4874")?;
//! let ticker = engine.broadcast_with_ticker(Duration::from_secs(1), Duration::from_millis(500));
//! // ...
//! ticker.cancel();
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod engine;
pub mod error;
mod listener;
pub mod probe;

pub use broadcast::{BroadcastHandle, SchedulerState, DEFAULT_BROADCAST_TIMEOUT};
pub use engine::{Engine, DEFAULT_ADDRESS};
pub use error::EngineError;
pub use probe::ProbeOutcome;

pub use pingu_core::{EngineConfig, OverflowPolicy, PeerAddr, WireError};
