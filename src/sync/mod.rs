//! Conversation synchronization: cache, rendering, transports and the
//! session that ties them together

pub mod cache;
pub mod render;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use render::View;
pub use session::{start, LinkStatus, SendOutcome, SessionHandle, SessionTask};
pub use transport::build_transport;
