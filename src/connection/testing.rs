//! In-memory transport for testing the connection manager

use super::transport::{Frame, SocketConnection, SocketTransport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the next `open` call does
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept,
    Refuse(String),
    /// Never completes, so the connection timeout fires
    Hang,
}

/// Test-side handle to an accepted connection
#[derive(Clone)]
pub struct FakePeer {
    incoming: mpsc::UnboundedSender<Frame>,
    dropped: CancellationToken,
    sent: Arc<Mutex<Vec<Frame>>>,
}

impl FakePeer {
    /// Deliver a frame to the manager
    pub fn push(&self, frame: Frame) {
        let _ = self.incoming.send(frame);
    }

    /// Simulate the remote end going away
    pub fn disconnect(&self) {
        self.dropped.cancel();
    }

    /// Frames the manager sent to this peer
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.dropped.is_cancelled()
    }
}

/// Transport that follows a script of outcomes.
///
/// Once the script runs out every open is refused.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Outcome>>,
    /// Addresses passed to `open`, in order
    pub opens: Mutex<Vec<String>>,
    peers: Mutex<Vec<FakePeer>>,
}

impl FakeTransport {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// Handle for the `index`-th accepted connection
    pub fn peer(&self, index: usize) -> FakePeer {
        self.peers.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl SocketTransport for FakeTransport {
    async fn open(&self, address: &str) -> Result<Box<dyn SocketConnection>, String> {
        self.opens.lock().unwrap().push(address.to_string());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Outcome::Refuse("connection refused".into()));

        match outcome {
            Outcome::Accept => {
                let (incoming, incoming_rx) = mpsc::unbounded_channel();
                let dropped = CancellationToken::new();
                let sent = Arc::new(Mutex::new(Vec::new()));
                self.peers.lock().unwrap().push(FakePeer {
                    incoming,
                    dropped: dropped.clone(),
                    sent: Arc::clone(&sent),
                });
                Ok(Box::new(FakeConnection {
                    incoming: incoming_rx,
                    dropped,
                    sent,
                }))
            }
            Outcome::Refuse(reason) => Err(reason),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

struct FakeConnection {
    incoming: mpsc::UnboundedReceiver<Frame>,
    dropped: CancellationToken,
    sent: Arc<Mutex<Vec<Frame>>>,
}

#[async_trait]
impl SocketConnection for FakeConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), String> {
        if self.dropped.is_cancelled() {
            return Err("connection dropped".into());
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            () = self.dropped.cancelled() => None,
            frame = self.incoming.recv() => frame,
        }
    }

    async fn close(&mut self) {
        self.dropped.cancel();
    }
}
