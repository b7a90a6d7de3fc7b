//! Sync client coordinator.
//!
//! One driver task owns the socket and the [`SessionMachine`]. Decoded frames
//! go onto a bounded, ordered queue drained by a reconciler task, which
//! applies each event on the blocking pool and waits for it before taking
//! the next one.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::reconciler::{InboundEvent, SyncReconciler, SyncStats, SyncStatus};
use crate::session::{SessionEffect, SessionEvent, SessionMachine, SessionState};
use crate::transport::{Connector, FrameSocket};
use keenotes_crypto::Password;
use keenotes_storage::NoteStore;
use keenotes_sync_protocol::{decode_server_frame, ClientMessage, ServerMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    /// Reconnect and resume from the durable watermark.
    Resync,
    Shutdown,
}

enum Internal {
    Dialed(Box<dyn FrameSocket>),
    DialFailed(SyncError),
    TimerFired(u64),
}

/// Entry point for starting a sync client.
pub struct SyncClient;

impl SyncClient {
    /// Spawns the driver and reconciler tasks on the current tokio runtime.
    ///
    /// The client starts disconnected; call [`SyncHandle::connect`].
    pub fn spawn<C, S>(
        config: SyncConfig,
        connector: C,
        reconciler: Arc<SyncReconciler<S>>,
    ) -> SyncResult<SyncHandle<S>>
    where
        C: Connector,
        S: NoteStore + 'static,
    {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_capacity);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let driver = Driver {
            machine: SessionMachine::new(config.reconnect_delay),
            connector: Arc::new(connector),
            reconciler: Arc::clone(&reconciler),
            socket: None,
            connect_timeout: config.connect_timeout,
            internal_tx,
            inbound: inbound_tx,
            timer: None,
            state_tx,
        };

        let driver_task = tokio::spawn(driver.run(commands_rx, internal_rx));
        let reconciler_task = tokio::spawn(reconcile(
            Arc::clone(&reconciler),
            inbound_rx,
            commands_tx.downgrade(),
        ));

        Ok(SyncHandle {
            commands: commands_tx,
            state: state_rx,
            reconciler,
            driver_task,
            reconciler_task,
        })
    }
}

/// Handle to a running sync client.
pub struct SyncHandle<S: NoteStore> {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    reconciler: Arc<SyncReconciler<S>>,
    driver_task: JoinHandle<()>,
    reconciler_task: JoinHandle<()>,
}

impl<S: NoteStore + 'static> SyncHandle<S> {
    /// Opens the sync channel. Does nothing if already connecting or connected.
    pub fn connect(&self) -> SyncResult<()> {
        self.send(Command::Connect)
    }

    /// Closes the sync channel and cancels any pending reconnect.
    pub fn disconnect(&self) -> SyncResult<()> {
        self.send(Command::Disconnect)
    }

    /// Returns the current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Waits until the session reaches `target`, up to `timeout`.
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> SyncResult<()> {
        let mut state = self.state.clone();
        let waited = tokio::time::timeout(timeout, state.wait_for(|s| *s == target))
            .await
            .map(|changed| changed.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SyncError::Cancelled),
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Returns the sync status.
    pub fn status(&self) -> SyncStatus {
        self.reconciler.status()
    }

    /// Returns the reconciler counters.
    pub fn stats(&self) -> SyncStats {
        self.reconciler.stats()
    }

    /// Caches the password used to open incoming notes.
    pub fn set_password(&self, password: Option<Password>) {
        self.reconciler.set_password(password);
    }

    /// Returns the reconciler.
    pub fn reconciler(&self) -> &Arc<SyncReconciler<S>> {
        &self.reconciler
    }

    /// Disconnects and waits for every queued event to be applied.
    pub async fn shutdown(self) -> SyncResult<()> {
        let _ = self.commands.send(Command::Shutdown);
        let driver = self.driver_task.await;
        let reconciler = self.reconciler_task.await;
        if driver.is_err() || reconciler.is_err() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::Cancelled)
    }
}

struct Driver<C: Connector, S: NoteStore> {
    machine: SessionMachine,
    connector: Arc<C>,
    reconciler: Arc<SyncReconciler<S>>,
    socket: Option<Box<dyn FrameSocket>>,
    connect_timeout: Duration,
    internal_tx: mpsc::UnboundedSender<Internal>,
    inbound: mpsc::Sender<InboundEvent>,
    timer: Option<JoinHandle<()>>,
    state_tx: watch::Sender<SessionState>,
}

impl<C: Connector, S: NoteStore + 'static> Driver<C, S> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.dispatch(SessionEvent::ConnectRequested).await,
                    Some(Command::Disconnect) => self.dispatch(SessionEvent::DisconnectRequested).await,
                    Some(Command::Resync) => {
                        info!("resyncing from durable watermark");
                        self.dispatch(SessionEvent::ReceiveFailed).await;
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = internal.recv() => match event {
                    Internal::Dialed(socket) => {
                        self.socket = Some(socket);
                        self.dispatch(SessionEvent::Dialed).await;
                    }
                    Internal::DialFailed(e) => {
                        if e.is_retryable() {
                            warn!(error = %e, "failed to connect");
                        } else {
                            error!(error = %e, "failed to connect");
                        }
                        self.dispatch(SessionEvent::DialFailed).await;
                    }
                    Internal::TimerFired(generation) => {
                        self.dispatch(SessionEvent::ReconnectTimerFired { generation }).await;
                    }
                },
                frame = next_frame(&mut self.socket) => self.on_frame(frame).await,
            }
        }

        self.dispatch(SessionEvent::DisconnectRequested).await;
        debug!("sync driver stopped");
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let before = self.machine.state();
            for effect in self.machine.step(event) {
                if let Err(e) = self.apply(effect).await {
                    warn!(error = %e, "sync connection failed");
                    pending.push_back(SessionEvent::ReceiveFailed);
                }
            }
            let after = self.machine.state();
            if before != after {
                debug!(from = ?before, to = ?after, ?event, "session state changed");
            }
        }
        self.state_tx.send_replace(self.machine.state());
    }

    async fn apply(&mut self, effect: SessionEffect) -> SyncResult<()> {
        match effect {
            SessionEffect::Dial => {
                let connector = Arc::clone(&self.connector);
                let internal = self.internal_tx.clone();
                let timeout = self.connect_timeout;
                tokio::spawn(async move {
                    let result = tokio::time::timeout(timeout, connector.connect())
                        .await
                        .unwrap_or(Err(SyncError::Timeout));
                    let _ = internal.send(match result {
                        Ok(socket) => Internal::Dialed(socket),
                        Err(e) => Internal::DialFailed(e),
                    });
                });
            }
            SessionEffect::SendHandshake => {
                // Queued ahead of any frame from the new socket.
                self.inbound
                    .send(InboundEvent::SessionStarted)
                    .await
                    .map_err(|_| SyncError::Cancelled)?;
                let reconciler = Arc::clone(&self.reconciler);
                let (client_id, last_sync_id) = tokio::task::spawn_blocking(move || {
                    reconciler
                        .last_sync_id()
                        .map(|id| (reconciler.client_id(), id))
                })
                .await
                .map_err(|_| SyncError::Cancelled)??;
                self.send(ClientMessage::handshake(client_id, last_sync_id))
                    .await?;
                info!(last_sync_id, "connected; handshake sent");
            }
            SessionEffect::ScheduleReconnect { delay, generation } => {
                self.abort_timer();
                let internal = self.internal_tx.clone();
                self.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal.send(Internal::TimerFired(generation));
                }));
                info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            }
            SessionEffect::CancelReconnect => self.abort_timer(),
            SessionEffect::CloseSocket => {
                if let Some(mut socket) = self.socket.take() {
                    socket.close().await;
                    info!("sync connection closed");
                }
            }
        }
        Ok(())
    }

    async fn on_frame(&mut self, frame: SyncResult<Option<String>>) {
        match frame {
            Ok(Some(text)) => self.on_text(&text).await,
            Ok(None) => {
                info!("server closed sync connection");
                self.dispatch(SessionEvent::ReceiveFailed).await;
            }
            Err(e) => {
                warn!(error = %e, "sync connection lost");
                self.dispatch(SessionEvent::ReceiveFailed).await;
            }
        }
    }

    async fn on_text(&mut self, text: &str) {
        let message = match decode_server_frame(text) {
            Ok(message) => message,
            Err(e) if e.carries_notes() => {
                warn!(error = %e, "note frame rejected; resyncing");
                self.dispatch(SessionEvent::ReceiveFailed).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "ignoring undecodable frame");
                return;
            }
        };
        debug!(kind = message.kind(), "frame received");

        if message == ServerMessage::Ping {
            if let Err(e) = self.send(ClientMessage::Pong).await {
                warn!(error = %e, "failed to answer ping");
                self.dispatch(SessionEvent::ReceiveFailed).await;
                return;
            }
        }

        match InboundEvent::from_server(message) {
            Some(event) => {
                if self.inbound.send(event).await.is_err() {
                    warn!("reconciler stopped; dropping frame");
                }
            }
            None => warn!("ignoring unknown frame type"),
        }
    }

    async fn send(&mut self, message: ClientMessage) -> SyncResult<()> {
        let socket = self.socket.as_mut().ok_or(SyncError::NotConnected)?;
        let text = message.to_json()?;
        debug!(kind = message.kind(), "sending frame");
        socket.send_text(text).await
    }

    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

async fn next_frame(socket: &mut Option<Box<dyn FrameSocket>>) -> SyncResult<Option<String>> {
    match socket {
        Some(socket) => socket.recv_text().await,
        None => std::future::pending().await,
    }
}

async fn reconcile<S: NoteStore + 'static>(
    reconciler: Arc<SyncReconciler<S>>,
    mut inbound: mpsc::Receiver<InboundEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
) {
    let resync = || {
        if let Some(commands) = commands.upgrade() {
            let _ = commands.send(Command::Resync);
        }
    };
    while let Some(event) = inbound.recv().await {
        let r = Arc::clone(&reconciler);
        match tokio::task::spawn_blocking(move || r.handle(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(SyncError::Storage(e))) => {
                error!(error = %e, "failed to persist sync event; resyncing");
                resync();
            }
            Ok(Err(e)) => warn!(error = %e, "failed to apply sync event"),
            Err(e) => {
                error!(error = %e, "sync event handler panicked; resyncing");
                resync();
            }
        }
    }
    debug!("reconciler stopped");
}
