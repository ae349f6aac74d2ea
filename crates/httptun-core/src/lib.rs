//! httptun-core — wire constants, session identifiers, errors and configuration.
//! All other httptun crates depend on this one.

pub mod config;
pub mod error;
pub mod stream;
pub mod wire;

pub use error::TunnelError;
pub use stream::{IoFuture, StreamBridge};
pub use wire::{SessionId, TunnelAddr, WireError};
