//! Transport session state machine.
//!
//! Pure: `step` maps `(state, event)` to a new state plus the effects the
//! coordinator must carry out. No sockets or timers live here, so every
//! transition is testable without a network.

use std::time::Duration;

/// Connection state of the sync channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and none being attempted.
    Disconnected,
    /// A dial is in flight.
    Connecting,
    /// Socket open and handshake sent.
    Connected,
}

impl SessionState {
    /// Returns true while connecting or connected.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Caller asked to connect.
    ConnectRequested,
    /// The in-flight dial produced a socket.
    Dialed,
    /// The in-flight dial failed.
    DialFailed,
    /// Reading from or writing to the open socket failed, or the peer closed it.
    ReceiveFailed,
    /// Caller asked to disconnect.
    DisconnectRequested,
    /// A reconnect timer expired.
    ReconnectTimerFired {
        /// Generation the timer was scheduled with.
        generation: u64,
    },
}

/// Work the coordinator must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    /// Start dialing the server.
    Dial,
    /// Send the handshake on the new socket.
    SendHandshake,
    /// Fire `ReconnectTimerFired { generation }` after `delay`.
    ScheduleReconnect {
        /// How long to wait.
        delay: Duration,
        /// Generation to echo back.
        generation: u64,
    },
    /// Drop any pending reconnect timer.
    CancelReconnect,
    /// Close the current socket.
    CloseSocket,
}

/// The session state machine.
///
/// # Invariants
///
/// - At most one dial is in flight
/// - At most one reconnect timer is pending, and only the latest
///   generation is honoured
/// - `ConnectRequested` while connecting or connected does nothing
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    reconnect_delay: Duration,
    generation: u64,
    reconnect_pending: bool,
    dialing: bool,
}

impl SessionMachine {
    /// Creates a disconnected machine.
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: SessionState::Disconnected,
            reconnect_delay,
            generation: 0,
            reconnect_pending: false,
            dialing: false,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if a reconnect timer is pending.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Returns true if a dial is in flight.
    pub fn dialing(&self) -> bool {
        self.dialing
    }

    /// Applies one event.
    pub fn step(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        match (self.state, event) {
            (SessionState::Disconnected, SessionEvent::ConnectRequested) => {
                self.cancel_reconnect(&mut effects);
                self.state = SessionState::Connecting;
                // A dial abandoned by an earlier disconnect may still land;
                // reuse it instead of opening a second socket.
                if !self.dialing {
                    self.dialing = true;
                    effects.push(SessionEffect::Dial);
                }
            }
            (_, SessionEvent::ConnectRequested) => {}

            (SessionState::Connecting, SessionEvent::Dialed) => {
                self.dialing = false;
                self.state = SessionState::Connected;
                effects.push(SessionEffect::SendHandshake);
            }
            (_, SessionEvent::Dialed) => {
                self.dialing = false;
                effects.push(SessionEffect::CloseSocket);
            }

            (SessionState::Connecting, SessionEvent::DialFailed) => {
                self.dialing = false;
                self.state = SessionState::Disconnected;
                self.schedule_reconnect(&mut effects);
            }
            (_, SessionEvent::DialFailed) => {
                self.dialing = false;
            }

            (SessionState::Connected, SessionEvent::ReceiveFailed) => {
                self.state = SessionState::Disconnected;
                effects.push(SessionEffect::CloseSocket);
                self.schedule_reconnect(&mut effects);
            }
            (_, SessionEvent::ReceiveFailed) => {}

            (state, SessionEvent::DisconnectRequested) => {
                self.cancel_reconnect(&mut effects);
                if state == SessionState::Connected {
                    effects.push(SessionEffect::CloseSocket);
                }
                self.state = SessionState::Disconnected;
            }

            (state, SessionEvent::ReconnectTimerFired { generation }) => {
                if !self.reconnect_pending || generation != self.generation {
                    return effects;
                }
                self.reconnect_pending = false;
                if state == SessionState::Disconnected {
                    self.state = SessionState::Connecting;
                    if !self.dialing {
                        self.dialing = true;
                        effects.push(SessionEffect::Dial);
                    }
                }
            }
        }
        effects
    }

    fn schedule_reconnect(&mut self, effects: &mut Vec<SessionEffect>) {
        self.generation += 1;
        self.reconnect_pending = true;
        effects.push(SessionEffect::ScheduleReconnect {
            delay: self.reconnect_delay,
            generation: self.generation,
        });
    }

    fn cancel_reconnect(&mut self, effects: &mut Vec<SessionEffect>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.generation += 1;
            effects.push(SessionEffect::CancelReconnect);
        }
    }
}
