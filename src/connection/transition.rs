//! Pure connection state transitions
//!
//! Given the same state, budget, config and event this always yields the
//! same result. All I/O lives in the manager, which executes the effects.

use super::{ConnectionEvent, ConnectionState, Effect, ReconnectBudget};
use crate::config::ConnectionConfig;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub new_state: ConnectionState,
    pub budget: ReconnectBudget,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    fn new(state: ConnectionState, budget: ReconnectBudget) -> Self {
        Self {
            new_state: state,
            budget,
            effects: vec![],
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Schedule a reconnection if the budget allows, otherwise record exhaustion
    fn with_reconnect(mut self, config: &ConnectionConfig) -> Self {
        if self.budget.has_remaining() {
            self.budget.attempts += 1;
            let attempt = self.budget.attempts;
            self.with_effect(Effect::ScheduleReconnect {
                delay: config.reconnect_delay,
                attempt,
            })
        } else {
            let attempts = self.budget.attempts;
            self.with_effect(Effect::ReconnectExhausted { attempts })
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Connection already {0}")]
    AlreadyActive(ConnectionState),
    #[error("Invalid transition: {event:?} while {state}")]
    InvalidTransition {
        state: ConnectionState,
        event: ConnectionEvent,
    },
}

pub fn transition(
    state: ConnectionState,
    budget: ReconnectBudget,
    config: &ConnectionConfig,
    event: ConnectionEvent,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // connect() is a no-op while a connection is open or opening
        (
            ConnectionState::Connecting | ConnectionState::Connected,
            ConnectionEvent::ConnectRequested,
        ) => Err(TransitionError::AlreadyActive(state)),

        (
            ConnectionState::Disconnected | ConnectionState::Error,
            ConnectionEvent::ConnectRequested | ConnectionEvent::ReconnectDue,
        ) => Ok(TransitionResult::new(ConnectionState::Connecting, budget)
            .with_effect(Effect::NotifyStatus(ConnectionState::Connecting))
            .with_effect(Effect::OpenTransport)),

        (ConnectionState::Connecting, ConnectionEvent::Connected) => Ok(TransitionResult::new(
            ConnectionState::Connected,
            budget.reset(),
        )
        .with_effect(Effect::NotifyStatus(ConnectionState::Connected))),

        // The last permitted reconnection failed; give up and settle
        (ConnectionState::Connecting, ConnectionEvent::ConnectFailed { reason })
            if !budget.has_remaining() && budget.attempts > 0 =>
        {
            let attempts = budget.attempts;
            Ok(TransitionResult::new(ConnectionState::Disconnected, budget)
                .with_effect(Effect::NotifyError(reason))
                .with_effect(Effect::NotifyStatus(ConnectionState::Disconnected))
                .with_effect(Effect::ReconnectExhausted { attempts }))
        }

        (ConnectionState::Connecting, ConnectionEvent::ConnectFailed { reason }) => {
            Ok(TransitionResult::new(ConnectionState::Error, budget)
                .with_effect(Effect::NotifyStatus(ConnectionState::Error))
                .with_effect(Effect::NotifyError(reason))
                .with_reconnect(config))
        }

        (ConnectionState::Connected, ConnectionEvent::Disconnected) => {
            Ok(TransitionResult::new(ConnectionState::Disconnected, budget)
                .with_effect(Effect::NotifyStatus(ConnectionState::Disconnected))
                .with_reconnect(config))
        }

        // Listeners are already gone when close() runs, so nothing is notified
        (_, ConnectionEvent::Closed) => Ok(TransitionResult::new(
            ConnectionState::Disconnected,
            budget.reset(),
        )
        .with_effect(Effect::CancelReconnect)
        .with_effect(Effect::TearDown)),

        (state, event) => Err(TransitionError::InvalidTransition { state, event }),
    }
}
