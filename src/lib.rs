//! Client for the camera vendor's peer-to-peer session protocol.
//!
//! The crate brings one camera link from cold to streaming: transport
//! connect (direct or derived-key), AV channel start, the challenge/response
//! authentication exchange, then paced, clock-synchronized frame delivery
//! into named pipes for an external muxer.
//!
//! The vendor's native library sits behind the [`transport::TransportBinding`]
//! trait; a [`transport::runtime::TransportRuntime`] owns its process-wide
//! init/deinit state and hands out [`session::Session`]s.

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SessionOptions;
pub use error::{Error, Result};
pub use session::{Session, SessionState};
pub use transport::TransportBinding;
pub use transport::runtime::{TransportConfig, TransportRuntime};
