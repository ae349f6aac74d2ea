//! httptun-client — drive a remote tunnel session with plain HTTP requests.

pub mod conn;
pub mod error;

pub use conn::TunnelConn;
pub use error::ClientError;
