//! Effects produced by connection state transitions

use super::ConnectionState;
use std::time::Duration;

/// Side effects the manager executes after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the transport (bounded by the connection timeout)
    OpenTransport,

    /// Tell status listeners about the new state
    NotifyStatus(ConnectionState),

    /// Tell error listeners about a failed attempt
    NotifyError(String),

    /// Call `connect` again after `delay`
    ScheduleReconnect { delay: Duration, attempt: u32 },

    /// Reconnection budget is spent; nothing more will be scheduled
    ReconnectExhausted { attempts: u32 },

    /// Drop any pending reconnection timer
    CancelReconnect,

    /// Close the live transport, if any
    TearDown,
}
