//! Events that drive the connection state machine

/// Socket lifecycle events and manager calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// `connect()` was called
    ConnectRequested,
    /// Transport acknowledged the connection
    Connected,
    /// Opening failed or timed out
    ConnectFailed { reason: String },
    /// An open connection went away without `close()`
    Disconnected,
    /// A scheduled reconnection timer fired
    ReconnectDue,
    /// `close()` was called
    Closed,
}
