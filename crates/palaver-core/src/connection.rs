//! Connection lifecycle state machine.
//!
//! Manages connection lifecycle, heartbeats, timeouts, and graceful shutdown.
//! Uses the action pattern: methods take time as input and return actions for
//! the driver to execute. This keeps the state machine pure (no I/O) and makes
//! testing straightforward.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐  Identify   ┌───────┐  Goodbye/Timeout  ┌────────┐
//! │ Connecting │────────────>│ Ready │──────────────────>│ Closed │
//! └────────────┘             └───────┘                   └────────┘
//!        │
//!        │ Timeout/Error
//!        ↓
//!   ┌────────┐
//!   │ Closed │
//!   └────────┘
//! ```
//!
//! The Identify frame itself is handled by the server driver (it needs the
//! directory); the driver calls [`Connection::mark_identified`] once the
//! identity is resolved.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use bytes::Bytes;
use palaver_proto::{Frame, FrameHeader, Opcode, Payload, payloads::session::Goodbye};

use crate::error::ConnectionError;

/// Time allowed for the Identify frame to arrive after connecting.
pub const DEFAULT_IDENTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time allowed without any activity before the connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval at which the connection sends Ping frames while ready.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Actions returned by the connection state machine.
///
/// The driver (test harness or production server) executes these actions:
/// - `SendFrame`: Serialize and send the frame over the transport
/// - `Close`: Close the connection with the given reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport established, waiting for Identify
    Connecting,
    /// Identify accepted, connection participates in chat
    Ready,
    /// Connection closed (graceful or error)
    Closed,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for the Identify frame to arrive
    pub identify_timeout: Duration,
    /// Idle timeout before disconnecting
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < idle_timeout / 2)
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            identify_timeout: DEFAULT_IDENTIFY_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Connection state machine
///
/// Manages lifecycle, timeouts, and heartbeats for a single connection.
///
/// This is a pure state machine - no I/O, no Environment storage.
/// Time is passed as parameters to methods that need it.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state
    state: ConnectionState,
    /// Configuration
    config: ConnectionConfig,
    /// Last activity timestamp
    last_activity: I,
    /// Last heartbeat sent timestamp
    last_heartbeat: Option<I>,
    /// User the connection identified as
    user_id: Option<u64>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionState::Connecting`] state
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Connecting,
            config,
            last_activity: now,
            last_heartbeat: None,
            user_id: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// User the connection identified as. `None` before Identify.
    #[must_use]
    pub fn user_id(&self) -> Option<u64> {
        self.user_id
    }

    /// Maximum time allowed for the Identify frame to arrive.
    #[must_use]
    pub fn identify_timeout(&self) -> Duration {
        self.config.identify_timeout
    }

    /// Transition to Ready after the driver resolved an Identify.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in Connecting state
    pub fn mark_identified(&mut self, user_id: u64, now: I) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "mark_identified".to_string(),
            });
        }

        self.state = ConnectionState::Ready;
        self.user_id = Some(user_id);
        self.last_activity = now;
        Ok(())
    }

    /// Mark connection as closed.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Mark connection as active (call when receiving frames).
    pub fn update_activity(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Elapsed time since last activity, if timeout exceeded. `None` otherwise.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let elapsed = now - self.last_activity;

        let timeout = match self.state {
            ConnectionState::Connecting => self.config.identify_timeout,
            ConnectionState::Ready => self.config.idle_timeout,
            ConnectionState::Closed => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Process periodic maintenance (timeouts and heartbeats).
    ///
    /// Call this periodically to trigger timeout detection and heartbeat
    /// sending.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                ConnectionState::Connecting => format!("identify timeout after {elapsed:?}"),
                ConnectionState::Ready => format!("idle timeout after {elapsed:?}"),
                ConnectionState::Closed => "timeout".to_string(),
            };

            self.close();
            actions.push(ConnectionAction::Close { reason });
            return actions;
        }

        if self.state == ConnectionState::Ready {
            let should_send = match self.last_heartbeat {
                None => true, // Never sent heartbeat
                Some(last) => {
                    let elapsed = now - last;
                    elapsed >= self.config.heartbeat_interval
                },
            };

            if should_send {
                let ping_frame = Frame::new(FrameHeader::new(Opcode::Ping), Bytes::new());
                actions.push(ConnectionAction::SendFrame(ping_frame));
                self.last_heartbeat = Some(now);
            }
        }

        actions
    }

    /// Process an incoming lifecycle frame and update state.
    ///
    /// Handles Ping, Pong, Goodbye, and Error frames. Application frames
    /// (Publish, JoinRoom, ...) are the driver's job; for those this method
    /// only records activity and returns no actions. Identify never reaches
    /// here - the driver intercepts it and calls
    /// [`Connection::mark_identified`].
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` if opcode invalid for current
    ///   state (any non-lifecycle frame before Identify, or any frame after
    ///   close)
    /// - `ConnectionError::InvalidPayload` if CBOR deserialization fails
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.last_activity = now;

        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state,
                opcode: frame.header.opcode(),
            });
        };

        match (self.state, opcode) {
            // Both: Ping when Ready
            (ConnectionState::Ready, Opcode::Ping) => {
                let pong_frame = Frame::new(FrameHeader::new(Opcode::Pong), Bytes::new());
                Ok(vec![ConnectionAction::SendFrame(pong_frame)])
            },

            // Both: Pong when Ready
            (ConnectionState::Ready, Opcode::Pong) => {
                // Activity already updated
                Ok(vec![])
            },

            // Both: Goodbye (any state except Closed)
            (state, Opcode::Goodbye) if state != ConnectionState::Closed => {
                let payload = Payload::from_frame(frame)?;

                let reason = match payload {
                    Payload::Goodbye(goodbye) => goodbye.reason,
                    _ => {
                        return Err(ConnectionError::InvalidPayload {
                            expected: "Goodbye",
                            opcode: Opcode::Goodbye.to_u16(),
                        });
                    },
                };

                self.state = ConnectionState::Closed;

                let reply = Payload::Goodbye(Goodbye { reason: "ack".to_string() });
                let frame = reply.into_frame(FrameHeader::new(Opcode::Goodbye))?;

                Ok(vec![ConnectionAction::SendFrame(frame), ConnectionAction::Close {
                    reason: format!("peer goodbye: {reason}"),
                }])
            },

            // Both: Error frame
            (state, Opcode::Error) if state != ConnectionState::Closed => {
                self.state = ConnectionState::Closed;

                Ok(vec![ConnectionAction::Close { reason: "peer error".to_string() }])
            },

            // Application frames while Ready: activity recorded, driver routes
            (ConnectionState::Ready, _) => Ok(vec![]),

            // Default: unexpected frame for current state
            (state, opcode) => {
                Err(ConnectionError::UnexpectedFrame { state, opcode: opcode.to_u16() })
            },
        }
    }
}
