//! In-process transport for tests.
//!
//! [`MockConnector`] hands every accepted connection to a [`MockServer`], so a
//! test plays the server: it reads the handshake, sends frames, and drops or
//! breaks the connection at will.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Connector, FrameSocket};
use async_trait::async_trait;
use keenotes_sync_protocol::{ClientMessage, ServerMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

enum Scripted {
    Text(String),
    Fail(String),
}

#[derive(Default)]
struct MockState {
    dials: AtomicUsize,
    failures_left: AtomicUsize,
    dial_delay: Mutex<Duration>,
}

/// A [`Connector`] backed by in-memory channels.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
    accepted: mpsc::UnboundedSender<MockPeer>,
}

/// Server side of a [`MockConnector`].
pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockConnector {
    /// Creates a connector and the server that receives its connections.
    pub fn new() -> (Self, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(MockState::default()),
                accepted: tx,
            },
            MockServer { accepted: rx },
        )
    }

    /// Number of dials attempted so far.
    pub fn dial_count(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    /// Makes the next `n` dials fail.
    pub fn fail_next_dials(&self, n: usize) {
        self.state.failures_left.store(n, Ordering::SeqCst);
    }

    /// Delays every dial, keeping the session in `Connecting` meanwhile.
    pub fn set_dial_delay(&self, delay: Duration) {
        *self.state.dial_delay.lock() = delay;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> SyncResult<Box<dyn FrameSocket>> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.dial_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SyncError::transport_retryable("mock dial refused"));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(MockPeer {
                to_client: Some(to_client),
                from_client,
            })
            .map_err(|_| SyncError::transport_retryable("mock server gone"))?;

        Ok(Box::new(MockSocket {
            from_server,
            to_server: Some(to_server),
        }))
    }
}

impl MockServer {
    /// Waits for the next connection.
    pub async fn accept(&mut self) -> Option<MockPeer> {
        self.accepted.recv().await
    }

    /// Returns an already accepted connection without waiting.
    pub fn try_accept(&mut self) -> Option<MockPeer> {
        self.accepted.try_recv().ok()
    }
}

/// The server's end of one mock connection.
pub struct MockPeer {
    to_client: Option<mpsc::UnboundedSender<Scripted>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    /// Sends a server message.
    pub fn send(&self, message: &ServerMessage) {
        if let Ok(text) = message.to_json() {
            self.send_raw(text);
        }
    }

    /// Sends an arbitrary text frame.
    pub fn send_raw(&self, text: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Scripted::Text(text.into()));
        }
    }

    /// Makes the client's next receive fail, as a dropped network would.
    pub fn break_connection(&self) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Scripted::Fail("mock connection reset".into()));
        }
    }

    /// Closes the connection cleanly from the server side.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Receives the next client message, or `None` once the client closed.
    ///
    /// Frames that are not valid client messages are skipped.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        while let Some(text) = self.from_client.recv().await {
            if let Ok(message) = serde_json::from_str(&text) {
                return Some(message);
            }
        }
        None
    }

    /// Returns the next raw text frame from the client, if one is queued.
    pub fn try_recv_raw(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

struct MockSocket {
    from_server: mpsc::UnboundedReceiver<Scripted>,
    to_server: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSocket for MockSocket {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        let tx = self.to_server.as_ref().ok_or(SyncError::NotConnected)?;
        tx.send(text)
            .map_err(|_| SyncError::transport_retryable("mock peer gone"))
    }

    async fn recv_text(&mut self) -> SyncResult<Option<String>> {
        match self.from_server.recv().await {
            Some(Scripted::Text(text)) => Ok(Some(text)),
            Some(Scripted::Fail(reason)) => Err(SyncError::transport_retryable(reason)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.to_server = None;
        self.from_server.close();
    }
}
