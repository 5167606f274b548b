//! Persistent connection management
//!
//! Lifecycle decisions are pure ([`transition`]); [`ConnectionManager`]
//! executes them against a [`SocketTransport`].

mod effect;
mod event;
mod manager;
mod state;
pub mod transition;
pub mod transport;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub mod testing;

pub use effect::Effect;
pub use event::ConnectionEvent;
pub use manager::{ConnectionError, ConnectionManager};
pub use state::{ConnectionState, ReconnectBudget};
pub use transition::transition;
pub use transport::{Frame, SocketConnection, SocketTransport, WsTransport};
