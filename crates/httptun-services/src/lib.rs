//! httptun-services — sessions, the paired endpoint and the tunnel listener.

pub mod listener;
pub mod pipe;
pub mod session;
pub mod stream;

pub use listener::TunnelListener;
pub use pipe::{pipe, PipeEnd};
pub use session::{new_session_table, Session, SessionTable};
pub use stream::SessionStream;
