//! Connection manager
//!
//! Owns one transport connection, its listener registry and its
//! reconnection lifecycle. Decisions come from [`transition`]; this module
//! only executes the resulting effects.

use super::transition::{transition, TransitionError};
use super::transport::{Frame, SocketConnection, SocketTransport};
use super::{ConnectionEvent, ConnectionState, Effect, ReconnectBudget};
use crate::config::ConnectionConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type StatusHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Why a `connect()` call failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection timeout")]
    Timeout,
    #[error("{0}")]
    Transport(String),
    #[error("connection closed while opening")]
    Closed,
}

#[derive(Default)]
struct Listeners {
    events: HashMap<String, Vec<EventHandler>>,
    status: Vec<StatusHandler>,
    errors: Vec<ErrorHandler>,
}

/// The live connection, driven by its reader task
struct Session {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
}

struct Core {
    state: ConnectionState,
    budget: ReconnectBudget,
    address: Option<String>,
    listeners: Listeners,
    session: Option<Session>,
    /// Cancels pending reconnection timers; replaced after each cancel
    reconnect: CancellationToken,
}

struct Shared<T> {
    transport: T,
    config: ConnectionConfig,
    core: Mutex<Core>,
}

/// Manages one persistent connection.
///
/// Cheap to clone; clones share the same connection.
pub struct ConnectionManager<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Action {
    Stop,
    Send(Frame),
    Receive(Option<Frame>),
}

impl<T: SocketTransport + 'static> ConnectionManager<T> {
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    budget: ReconnectBudget::new(config.max_reconnect_attempts),
                    address: None,
                    listeners: Listeners::default(),
                    session: None,
                    reconnect: CancellationToken::new(),
                }),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core().state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.core().budget.attempts
    }

    /// No further reconnection will be scheduled
    pub fn is_exhausted(&self) -> bool {
        !self.core().budget.has_remaining()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Open a connection to `address`.
    ///
    /// Returns `Ok(())` immediately when already connecting or connected, so
    /// an `Ok` does not mean the connection is usable yet: an attempt started
    /// elsewhere (e.g. a scheduled reconnection) may still be in flight. Check
    /// [`Self::state`] or wait for `Connected` via [`Self::on_status_change`]
    /// before emitting. A failure is reported here and to error listeners,
    /// and a reconnection is scheduled while the budget lasts.
    pub async fn connect(&self, address: &str) -> Result<(), ConnectionError> {
        {
            let mut core = self.core();
            if !core.state.is_active() {
                core.address = Some(address.to_string());
            }
        }
        self.drive(ConnectionEvent::ConnectRequested).await
    }

    /// Send an event over the live connection.
    ///
    /// Dropped unless connected; returns whether the frame was queued.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        let core = self.core();
        match (&core.session, core.state) {
            (Some(session), ConnectionState::Connected) => {
                session.outbound.send(Frame::new(event, payload)).is_ok()
            }
            _ => {
                tracing::debug!(event, state = %core.state, "Dropping emit while not connected");
                false
            }
        }
    }

    /// Subscribe to an inbound event; handlers run in registration order
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) {
        self.core()
            .listeners
            .events
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn on_status_change(&self, handler: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.core().listeners.status.push(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.core().listeners.errors.push(Arc::new(handler));
    }

    pub fn listener_count(&self) -> usize {
        let core = self.core();
        let events: usize = core.listeners.events.values().map(Vec::len).sum();
        events + core.listeners.status.len() + core.listeners.errors.len()
    }

    /// Remove every listener, tear down the transport, cancel any pending
    /// reconnection and return to `disconnected`.
    pub fn close(&self) {
        let effects = {
            let mut core = self.core();
            core.listeners = Listeners::default();
            match self.apply(&mut core, ConnectionEvent::Closed) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::debug!(error = %e, "Close rejected");
                    return;
                }
            }
        };
        self.execute(effects);
        tracing::info!("Connection closed");
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.shared
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one transition and store its outcome
    fn apply(
        &self,
        core: &mut Core,
        event: ConnectionEvent,
    ) -> Result<Vec<Effect>, TransitionError> {
        let result = transition(core.state, core.budget, &self.shared.config, event)?;
        if core.state != result.new_state {
            tracing::debug!(from = %core.state, to = %result.new_state, "Connection state change");
        }
        core.state = result.new_state;
        core.budget = result.budget;
        Ok(result.effects)
    }

    async fn drive(&self, event: ConnectionEvent) -> Result<(), ConnectionError> {
        let effects = {
            let mut core = self.core();
            match self.apply(&mut core, event) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring connection event");
                    return Ok(());
                }
            }
        };
        if self.execute(effects) {
            self.open_transport().await
        } else {
            Ok(())
        }
    }

    /// Execute effects; returns whether the transport should be opened
    fn execute(&self, effects: Vec<Effect>) -> bool {
        let mut open = false;
        for effect in effects {
            match effect {
                Effect::OpenTransport => open = true,
                Effect::NotifyStatus(state) => {
                    let handlers = self.core().listeners.status.clone();
                    for handler in handlers {
                        handler(state);
                    }
                }
                Effect::NotifyError(reason) => {
                    let handlers = self.core().listeners.errors.clone();
                    for handler in handlers {
                        handler(&reason);
                    }
                }
                Effect::ScheduleReconnect { delay, attempt } => {
                    self.schedule_reconnect(delay, attempt);
                }
                Effect::ReconnectExhausted { attempts } => {
                    tracing::warn!(attempts, "Reconnection attempts exhausted");
                }
                Effect::CancelReconnect => {
                    let mut core = self.core();
                    core.reconnect.cancel();
                    core.reconnect = CancellationToken::new();
                }
                Effect::TearDown => {
                    if let Some(session) = self.core().session.take() {
                        session.cancel.cancel();
                    }
                }
            }
        }
        open
    }

    fn schedule_reconnect(&self, delay: Duration, attempt: u32) {
        let cancel = self.core().reconnect.clone();
        let manager = self.clone();
        tracing::info!(attempt, delay_ms = %delay.as_millis(), "Scheduling reconnection");
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Err(e) = manager.drive(ConnectionEvent::ReconnectDue).await {
                        tracing::debug!(attempt, error = %e, "Reconnection attempt failed");
                    }
                }
            }
        });
    }

    async fn open_transport(&self) -> Result<(), ConnectionError> {
        let address = self.core().address.clone().unwrap_or_default();
        let timeout = self.shared.config.connection_timeout;

        let outcome = tokio::time::timeout(timeout, self.shared.transport.open(&address)).await;
        let connection = match outcome {
            Ok(Ok(connection)) => connection,
            Ok(Err(reason)) => return Err(self.fail(ConnectionError::Transport(reason))),
            Err(_) => return Err(self.fail(ConnectionError::Timeout)),
        };

        let effects = {
            let mut core = self.core();
            match self.apply(&mut core, ConnectionEvent::Connected) {
                Ok(effects) => {
                    core.session = Some(self.spawn_session(connection));
                    effects
                }
                Err(e) => {
                    // close() ran while we were opening
                    tracing::debug!(error = %e, "Discarding connection opened after close");
                    drop(core);
                    tokio::spawn(async move {
                        let mut connection = connection;
                        connection.close().await;
                    });
                    return Err(ConnectionError::Closed);
                }
            }
        };
        tracing::info!(address = %address, "Connected");
        self.execute(effects);
        Ok(())
    }

    fn fail(&self, error: ConnectionError) -> ConnectionError {
        tracing::warn!(error = %error, "Connection attempt failed");
        let effects = {
            let mut core = self.core();
            match self.apply(
                &mut core,
                ConnectionEvent::ConnectFailed {
                    reason: error.to_string(),
                },
            ) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring failure after close");
                    Vec::new()
                }
            }
        };
        self.execute(effects);
        error
    }

    fn spawn_session(&self, mut connection: Box<dyn SocketConnection>) -> Session {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let manager = self.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let action = tokio::select! {
                    () = task_cancel.cancelled() => Action::Stop,
                    frame = outbound_rx.recv() => frame.map_or(Action::Stop, Action::Send),
                    incoming = connection.recv() => Action::Receive(incoming),
                };
                match action {
                    Action::Stop => {
                        connection.close().await;
                        return;
                    }
                    Action::Send(frame) => {
                        if let Err(e) = connection.send(frame).await {
                            tracing::warn!(session = %id, error = %e, "Failed to send frame");
                        }
                    }
                    Action::Receive(Some(frame)) => manager.dispatch(&frame),
                    Action::Receive(None) => {
                        manager.handle_disconnect(id);
                        return;
                    }
                }
            }
        });

        Session {
            id,
            outbound,
            cancel,
        }
    }

    fn dispatch(&self, frame: &Frame) {
        let handlers = self
            .core()
            .listeners
            .events
            .get(&frame.event)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::debug!(event = %frame.event, "No listeners for event");
        }
        for handler in handlers {
            handler(&frame.data);
        }
    }

    fn handle_disconnect(&self, session_id: Uuid) {
        let effects = {
            let mut core = self.core();
            if core.session.as_ref().map(|s| s.id) != Some(session_id) {
                return;
            }
            core.session = None;
            match self.apply(&mut core, ConnectionEvent::Disconnected) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring disconnect");
                    return;
                }
            }
        };
        tracing::info!(session = %session_id, "Connection lost");
        self.execute(effects);
    }
}
