//! Server driver.
//!
//! Ties together connection state machines, the presence registry, room
//! membership, the dedup cache, and the store/directory/media adapters.
//!
//! The driver is sans-IO: it consumes [`ServerEvent`]s and produces
//! [`ServerAction`]s for a runtime (production or simulation) to execute.
//! Rejections never escape as errors; they become Error frames addressed to
//! the origin connection.

use std::{collections::HashMap, time::Duration};

use palaver_core::{
    Identity, Message, MessageId, RoomName,
    connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState},
    env::Environment,
};
use palaver_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::{
        chat::{HistoryResponse, MediaStored, MessageDeleted, MessageEvent, SenderInfo},
        moderation::{RoomCleared, UserMuted, UserUnmuted},
        presence::{PresenceSnapshot, Role},
        session::IdentifyAck,
    },
};

use crate::{
    directory::{Directory, DirectoryError},
    fanout::{DEFAULT_DEDUP_CAPACITY, DedupCache, validate_body},
    media::{MediaError, MediaStore},
    moderation,
    presence::PresenceRegistry,
    rejection::Rejection,
    rooms::{JoinOutcome, RoomRegistry},
    server_error::ServerError,
    storage::MessageStore,
};

/// Default page size for history requests.
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound on the history page size.
const MAX_HISTORY_LIMIT: u32 = 100;

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Connection configuration (timeouts, heartbeat interval)
    pub connection: ConnectionConfig,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Room to place identified-but-roomless connections into, if any
    pub default_room: Option<RoomName>,
    /// Grace period before the default-room placement kicks in
    pub default_room_grace: Duration,
    /// Capacity of the recent-submit dedup cache
    pub dedup_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_connections: 10_000,
            default_room: None,
            default_room_grace: Duration::from_secs(5),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        connection_id: u64,
    },

    /// A frame was received from a connection
    FrameReceived {
        /// Connection that sent the frame
        connection_id: u64,
        /// The received frame
        frame: Frame,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        connection_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Periodic tick for timeout checking
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Send a frame to a specific connection
    SendToConnection {
        /// Target connection ID
        connection_id: u64,
        /// Frame to send
        frame: Frame,
    },

    /// Broadcast a frame to every member of a room
    BroadcastToRoom {
        /// Target room
        room: RoomName,
        /// Frame to broadcast
        frame: Frame,
        /// Optional connection to exclude from the broadcast
        exclude: Option<u64>,
    },

    /// Broadcast a frame to every live connection
    BroadcastAll {
        /// Frame to broadcast
        frame: Frame,
    },

    /// Close a connection
    CloseConnection {
        /// Connection to close
        connection_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
///
/// Orchestrates connection management, presence, room fan-out, history, and
/// moderation.
pub struct ServerDriver<E, S, D, M>
where
    E: Environment,
    S: MessageStore,
    D: Directory,
    M: MediaStore,
{
    /// Connection state machines (connection_id → Connection)
    connections: HashMap<u64, Connection<E::Instant>>,
    /// When each connection became Ready (for default-room placement)
    identified_at: HashMap<u64, E::Instant>,
    /// Presence registry (connection → identity)
    presence: PresenceRegistry,
    /// Room membership
    rooms: RoomRegistry,
    /// Recent-submit dedup cache
    dedup: DedupCache,
    /// Message store backend
    store: S,
    /// Identity directory
    directory: D,
    /// Media store
    media: M,
    /// Environment (time, RNG)
    env: E,
    /// Driver configuration
    config: DriverConfig,
}

impl<E, S, D, M> ServerDriver<E, S, D, M>
where
    E: Environment,
    S: MessageStore,
    D: Directory,
    M: MediaStore,
{
    /// Create a new server driver.
    pub fn new(env: E, store: S, directory: D, media: M, config: DriverConfig) -> Self {
        let dedup = DedupCache::new(config.dedup_capacity);
        Self {
            connections: HashMap::new(),
            identified_at: HashMap::new(),
            presence: PresenceRegistry::new(),
            rooms: RoomRegistry::new(),
            dedup,
            store,
            directory,
            media,
            env,
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    ///
    /// # Errors
    ///
    /// - `ServerError::ConnectionNotFound` for a frame from an untracked
    ///   connection
    /// - `ServerError::ConnectionFailed` when the lifecycle state machine
    ///   rejects a frame
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::ConnectionAccepted { connection_id } => {
                self.handle_connection_accepted(connection_id)
            },
            ServerEvent::FrameReceived { connection_id, frame } => {
                self.handle_frame_received(connection_id, &frame)
            },
            ServerEvent::ConnectionClosed { connection_id, reason } => {
                self.handle_connection_closed(connection_id, &reason)
            },
            ServerEvent::Tick => self.handle_tick(),
        }
    }

    /// Handle a new connection being accepted.
    fn handle_connection_accepted(
        &mut self,
        connection_id: u64,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let now = self.env.now();

        if self.connections.len() >= self.config.max_connections {
            return Ok(vec![ServerAction::CloseConnection {
                connection_id,
                reason: "max connections exceeded".to_string(),
            }]);
        }

        let conn = Connection::new(now, self.config.connection.clone());
        self.connections.insert(connection_id, conn);

        Ok(vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection {connection_id} accepted, awaiting identify"),
        }])
    }

    /// Handle a frame received from a connection.
    fn handle_frame_received(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let now = self.env.now();

        if !self.connections.contains_key(&connection_id) {
            return Err(ServerError::ConnectionNotFound(connection_id));
        }

        match frame.header.opcode_enum() {
            // Identify needs the directory, so the driver owns it instead of
            // the connection state machine.
            Some(Opcode::Identify) => Ok(self.handle_identify(connection_id, frame)),

            Some(Opcode::Ping | Opcode::Pong | Opcode::Goodbye | Opcode::Error) => {
                self.handle_lifecycle_frame(connection_id, frame, now)
            },

            Some(
                Opcode::JoinRoom
                | Opcode::PresenceRequest
                | Opcode::Publish
                | Opcode::HistoryRequest
                | Opcode::DeleteMessage
                | Opcode::MediaUpload
                | Opcode::Mute
                | Opcode::Unmute
                | Opcode::ClearRoom,
            ) => {
                if let Some(conn) = self.connections.get_mut(&connection_id) {
                    conn.update_activity(now);
                }
                Ok(self.handle_app_frame(connection_id, frame))
            },

            // Server-to-client opcodes arriving FROM a client, or an opcode
            // we do not recognize at all.
            _ => Ok(self.reject(
                connection_id,
                frame.header.request_id(),
                &Rejection::InvalidPayload(format!(
                    "unexpected opcode {:#06x}",
                    frame.header.opcode()
                )),
            )),
        }
    }

    /// Route an application frame to its handler, converting rejections into
    /// Error frames for the origin connection.
    fn handle_app_frame(&mut self, connection_id: u64, frame: &Frame) -> Vec<ServerAction> {
        let request_id = frame.header.request_id();

        let result = match frame.header.opcode_enum() {
            Some(Opcode::JoinRoom) => self.try_join_room(connection_id, frame),
            Some(Opcode::PresenceRequest) => self.try_presence_request(connection_id, frame),
            Some(Opcode::Publish) => self.try_publish(connection_id, frame),
            Some(Opcode::HistoryRequest) => self.try_history_request(connection_id, frame),
            Some(Opcode::DeleteMessage) => self.try_delete_message(connection_id, frame),
            Some(Opcode::MediaUpload) => self.try_media_upload(connection_id, frame),
            Some(Opcode::Mute) => self.try_mute(connection_id, frame),
            Some(Opcode::Unmute) => self.try_unmute(connection_id, frame),
            Some(Opcode::ClearRoom) => self.try_clear_room(connection_id, frame),
            // Dispatch guarantees an application opcode
            _ => Ok(Vec::new()),
        };

        match result {
            Ok(actions) => actions,
            Err(rejection) => self.reject(connection_id, request_id, &rejection),
        }
    }

    /// Handle lifecycle frames (Ping, Pong, Goodbye, Error) via the
    /// connection state machine.
    fn handle_lifecycle_frame(
        &mut self,
        connection_id: u64,
        frame: &Frame,
        now: E::Instant,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let conn = self
            .connections
            .get_mut(&connection_id)
            .ok_or(ServerError::ConnectionNotFound(connection_id))?;

        let conn_actions = conn
            .handle_frame(frame, now)
            .map_err(|e| ServerError::ConnectionFailed { connection_id, reason: e.to_string() })?;

        Ok(conn_actions
            .into_iter()
            .map(|action| Self::convert_connection_action(connection_id, action))
            .collect())
    }

    /// Handle an Identify frame: resolve the identity, register presence,
    /// ack, and push a fresh presence snapshot to everyone.
    fn handle_identify(&mut self, connection_id: u64, frame: &Frame) -> Vec<ServerAction> {
        let request_id = frame.header.request_id();

        match self.try_identify(connection_id, frame) {
            Ok(actions) => actions,
            // The connection stays open after a rejected Identify; the
            // client may retry with a corrected frame.
            Err(rejection) => self.reject(connection_id, request_id, &rejection),
        }
    }

    fn try_identify(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        let now = self.env.now();

        let identify = match Payload::from_frame(frame) {
            Ok(Payload::Identify(identify)) => identify,
            Ok(_) => {
                return Err(Rejection::MalformedIdentify("expected Identify payload".to_string()));
            },
            Err(e) => {
                return Err(Rejection::MalformedIdentify(format!(
                    "failed to decode Identify: {e}"
                )));
            },
        };

        if identify.user_id == 0 {
            return Err(Rejection::MalformedIdentify("user id must be non-zero".to_string()));
        }
        if identify.username.trim().is_empty() {
            return Err(Rejection::MalformedIdentify("blank username".to_string()));
        }

        let identity = if let Some(token) = &identify.auth_token {
            match self.directory.authenticate(token) {
                Ok(identity) => identity,
                Err(DirectoryError::InvalidToken) => {
                    return Err(Rejection::Forbidden("invalid token".to_string()));
                },
                Err(e) => return Err(Rejection::StoreUnavailable(e.to_string())),
            }
        } else {
            let existing = self
                .directory
                .lookup(identify.user_id)
                .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;

            // Client-reported hints never reach privilege state. A known
            // user keeps the directory's role and muted flags; an unknown
            // tokenless user is recorded as an unmuted regular user. Admin
            // privilege only ever enters the directory through a verified
            // token or out-of-band provisioning.
            let identity = match existing {
                Some(record) => {
                    // Admin accounts bind through token verification only;
                    // a tokenless claim of an admin user id is refused.
                    if record.role == Role::Admin {
                        return Err(Rejection::Forbidden(
                            "admin identity requires an auth token".to_string(),
                        ));
                    }
                    Identity {
                        user_id: record.user_id,
                        username: identify.username.clone(),
                        avatar_url: identify.avatar_url.clone(),
                        role: record.role,
                        muted: record.muted,
                    }
                },
                None => Identity {
                    user_id: identify.user_id,
                    username: identify.username.clone(),
                    avatar_url: identify.avatar_url.clone(),
                    role: Role::User,
                    muted: false,
                },
            };

            self.directory
                .upsert(&identity)
                .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;
            identity
        };

        // First identify flips the state machine to Ready; a re-identify
        // just overwrites the presence binding.
        if let Some(conn) = self.connections.get_mut(&connection_id) {
            if conn.state() == ConnectionState::Connecting {
                conn.mark_identified(identity.user_id, now)
                    .map_err(|e| Rejection::MalformedIdentify(e.to_string()))?;
                self.identified_at.insert(connection_id, now);
            }
        }

        self.presence.register(connection_id, identity.clone());

        let mut header = FrameHeader::new(Opcode::IdentifyAck);
        header.set_request_id(frame.header.request_id());
        header.set_timestamp_ms(self.env.wall_clock_ms());

        let ack =
            Payload::IdentifyAck(IdentifyAck { connection_id, identity: identity.clone().into() });
        let ack_frame = match Self::encode_or_log(ack, header) {
            Ok(frame) => frame,
            Err(log) => return Ok(vec![log]),
        };

        let mut actions = vec![ServerAction::SendToConnection { connection_id, frame: ack_frame }];
        actions.extend(self.broadcast_snapshot());
        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!(
                "connection {connection_id} identified as user {} ({})",
                identity.user_id, identity.username
            ),
        });

        Ok(actions)
    }

    fn try_join_room(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        let identity = self.sender_identity(connection_id)?;

        let join = match Payload::from_frame(frame) {
            Ok(Payload::JoinRoom(join)) => join,
            Ok(_) => return Err(Rejection::InvalidPayload("expected JoinRoom payload".to_string())),
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!("failed to decode JoinRoom: {e}")));
            },
        };

        let room =
            RoomName::new(join.room).map_err(|e| Rejection::InvalidPayload(e.to_string()))?;

        let message = match self.rooms.join(connection_id, room.clone()) {
            JoinOutcome::Joined { previous: Some(previous) } => format!(
                "connection {connection_id} (user {}) moved from {previous} to {room}",
                identity.user_id
            ),
            JoinOutcome::Joined { previous: None } => {
                format!("connection {connection_id} (user {}) joined {room}", identity.user_id)
            },
            JoinOutcome::AlreadyMember => {
                format!("connection {connection_id} (user {}) re-joined {room}", identity.user_id)
            },
        };

        Ok(vec![ServerAction::Log { level: LogLevel::Debug, message }])
    }

    fn try_presence_request(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        self.sender_identity(connection_id)?;

        let snapshot =
            Payload::PresenceSnapshot(PresenceSnapshot { entries: self.presence.snapshot() });
        let mut header = FrameHeader::new(Opcode::PresenceSnapshot);
        header.set_request_id(frame.header.request_id());
        header.set_timestamp_ms(self.env.wall_clock_ms());

        Ok(match Self::encode_or_log(snapshot, header) {
            Ok(frame) => vec![ServerAction::SendToConnection { connection_id, frame }],
            Err(log) => vec![log],
        })
    }

    /// Publish pipeline: validate, dedup, persist, then broadcast.
    ///
    /// The order is a hard invariant: a message that fails to persist is
    /// never broadcast. A duplicate submit (same sender, same non-zero
    /// nonce) re-sends the originally stored message to the sender only.
    fn try_publish(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        let identity = self.sender_identity(connection_id)?;
        if identity.muted {
            return Err(Rejection::Muted(identity.user_id));
        }

        let publish = match Payload::from_frame(frame) {
            Ok(Payload::Publish(publish)) => publish,
            Ok(_) => return Err(Rejection::InvalidPayload("expected Publish payload".to_string())),
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!("failed to decode Publish: {e}")));
            },
        };

        validate_body(&publish.body)?;
        let room =
            RoomName::new(publish.room).map_err(|e| Rejection::InvalidPayload(e.to_string()))?;

        let nonce = frame.header.request_id();

        if let Some(original) = self.dedup.get(identity.user_id, nonce).cloned() {
            let event = Payload::MessageEvent(MessageEvent { message: original.to_wire() });
            let mut header = FrameHeader::new(Opcode::MessageEvent);
            header.set_request_id(nonce);
            header.set_sender_id(identity.user_id);
            header.set_timestamp_ms(original.created_at_ms);

            return Ok(match Self::encode_or_log(event, header) {
                Ok(frame) => vec![
                    ServerAction::SendToConnection { connection_id, frame },
                    ServerAction::Log {
                        level: LogLevel::Debug,
                        message: format!(
                            "duplicate submit from user {} (nonce {nonce}), re-sent message {}",
                            identity.user_id, original.id
                        ),
                    },
                ],
                Err(log) => vec![log],
            });
        }

        let created_at_ms = self.env.wall_clock_ms();
        let message = Message {
            id: MessageId::new(identity.user_id, created_at_ms, self.env.random_u32()),
            room: room.clone(),
            sender: SenderInfo {
                user_id: identity.user_id,
                username: identity.username.clone(),
                avatar_url: identity.avatar_url.clone(),
            },
            body: publish.body,
            created_at_ms,
        };

        // Persist-then-broadcast: a store failure rejects the submit and
        // nothing reaches the room.
        self.store
            .append(&message)
            .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;
        self.dedup.record(identity.user_id, nonce, message.clone());

        let event = Payload::MessageEvent(MessageEvent { message: message.to_wire() });
        let mut header = FrameHeader::new(Opcode::MessageEvent);
        header.set_request_id(nonce);
        header.set_sender_id(identity.user_id);
        header.set_timestamp_ms(created_at_ms);

        Ok(match Self::encode_or_log(event, header) {
            Ok(frame) => vec![
                ServerAction::BroadcastToRoom { room, frame, exclude: None },
                ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!("message {} stored and fanned out to {}", message.id, message.room),
                },
            ],
            Err(log) => vec![log],
        })
    }

    fn try_history_request(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        self.sender_identity(connection_id)?;

        let request = match Payload::from_frame(frame) {
            Ok(Payload::HistoryRequest(request)) => request,
            Ok(_) => {
                return Err(Rejection::InvalidPayload(
                    "expected HistoryRequest payload".to_string(),
                ));
            },
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!(
                    "failed to decode HistoryRequest: {e}"
                )));
            },
        };

        let room =
            RoomName::new(request.room).map_err(|e| Rejection::InvalidPayload(e.to_string()))?;

        let limit = request.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        let offset = request.offset.unwrap_or(0);

        let page = self
            .store
            .load_page(&room, usize::try_from(limit).unwrap_or(usize::MAX), offset)
            .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;
        let count = self
            .store
            .message_count(&room)
            .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;

        let has_more = offset.saturating_add(u64::from(limit)) < count;

        let response = Payload::HistoryResponse(HistoryResponse {
            room: room.as_str().to_string(),
            messages: page.iter().map(Message::to_wire).collect(),
            has_more,
        });
        let mut header = FrameHeader::new(Opcode::HistoryResponse);
        header.set_request_id(frame.header.request_id());
        header.set_timestamp_ms(self.env.wall_clock_ms());

        Ok(match Self::encode_or_log(response, header) {
            Ok(frame) => vec![ServerAction::SendToConnection { connection_id, frame }],
            Err(log) => vec![log],
        })
    }

    fn try_delete_message(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        let identity = self.sender_identity(connection_id)?;

        let request = match Payload::from_frame(frame) {
            Ok(Payload::DeleteMessage(request)) => request,
            Ok(_) => {
                return Err(Rejection::InvalidPayload("expected DeleteMessage payload".to_string()));
            },
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!(
                    "failed to decode DeleteMessage: {e}"
                )));
            },
        };

        let id = MessageId::from_string(request.message_id);
        let message = self
            .store
            .find(&id)
            .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?
            .ok_or_else(|| Rejection::NotFound(format!("message {id}")))?;

        moderation::authorize_delete(&self.directory, identity.user_id, &message)?;

        self.store.delete(&id).map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;

        let announce = Payload::MessageDeleted(MessageDeleted {
            message_id: id.as_str().to_string(),
            room: message.room.as_str().to_string(),
        });
        let mut header = FrameHeader::new(Opcode::MessageDeleted);
        header.set_request_id(frame.header.request_id());
        header.set_timestamp_ms(self.env.wall_clock_ms());

        Ok(match Self::encode_or_log(announce, header) {
            Ok(announce_frame) => vec![
                ServerAction::BroadcastToRoom {
                    room: message.room.clone(),
                    frame: announce_frame,
                    exclude: None,
                },
                ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("message {id} deleted by user {}", identity.user_id),
                },
            ],
            Err(log) => vec![log],
        })
    }

    fn try_media_upload(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        self.sender_identity(connection_id)?;

        let upload = match Payload::from_frame(frame) {
            Ok(Payload::MediaUpload(upload)) => upload,
            Ok(_) => {
                return Err(Rejection::InvalidPayload("expected MediaUpload payload".to_string()));
            },
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!(
                    "failed to decode MediaUpload: {e}"
                )));
            },
        };

        let url = self.media.store(&upload.content_type, &upload.bytes).map_err(|e| match e {
            MediaError::Empty | MediaError::UnsupportedType(_) => {
                Rejection::InvalidPayload(e.to_string())
            },
            MediaError::Io(msg) => Rejection::StoreUnavailable(msg),
        })?;

        let stored = Payload::MediaStored(MediaStored { url: url.clone() });
        let mut header = FrameHeader::new(Opcode::MediaStored);
        header.set_request_id(frame.header.request_id());
        header.set_timestamp_ms(self.env.wall_clock_ms());

        Ok(match Self::encode_or_log(stored, header) {
            Ok(frame) => vec![
                ServerAction::SendToConnection { connection_id, frame },
                ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!("media stored at {url}"),
                },
            ],
            Err(log) => vec![log],
        })
    }

    fn try_mute(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        let actor = self.sender_identity(connection_id)?;
        moderation::require_admin(&self.directory, actor.user_id)?;

        let mute = match Payload::from_frame(frame) {
            Ok(Payload::Mute(mute)) => mute,
            Ok(_) => return Err(Rejection::InvalidPayload("expected Mute payload".to_string())),
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!("failed to decode Mute: {e}")));
            },
        };

        let target = moderation::check_mute_target(&self.directory, mute.target)?;

        self.directory.set_muted(target.user_id, true).map_err(Self::directory_rejection)?;
        self.presence.set_muted(target.user_id, true);

        let announce = Payload::UserMuted(UserMuted {
            target: target.user_id,
            username: target.username.clone(),
        });

        let mut actions = self.broadcast_all_or_log(announce);
        actions.extend(self.broadcast_snapshot());
        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("user {} muted by admin {}", target.user_id, actor.user_id),
        });
        Ok(actions)
    }

    fn try_unmute(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        let actor = self.sender_identity(connection_id)?;
        moderation::require_admin(&self.directory, actor.user_id)?;

        let unmute = match Payload::from_frame(frame) {
            Ok(Payload::Unmute(unmute)) => unmute,
            Ok(_) => return Err(Rejection::InvalidPayload("expected Unmute payload".to_string())),
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!("failed to decode Unmute: {e}")));
            },
        };

        // Unmuting an unmuted user is a no-op, not an error
        let target = moderation::check_unmute_target(&self.directory, unmute.target)?;

        self.directory.set_muted(target.user_id, false).map_err(Self::directory_rejection)?;
        self.presence.set_muted(target.user_id, false);

        let announce = Payload::UserUnmuted(UserUnmuted {
            target: target.user_id,
            username: target.username.clone(),
        });

        let mut actions = self.broadcast_all_or_log(announce);
        actions.extend(self.broadcast_snapshot());
        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("user {} unmuted by admin {}", target.user_id, actor.user_id),
        });
        Ok(actions)
    }

    fn try_clear_room(
        &mut self,
        connection_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, Rejection> {
        let actor = self.sender_identity(connection_id)?;
        moderation::require_admin(&self.directory, actor.user_id)?;

        let request = match Payload::from_frame(frame) {
            Ok(Payload::ClearRoom(request)) => request,
            Ok(_) => {
                return Err(Rejection::InvalidPayload("expected ClearRoom payload".to_string()));
            },
            Err(e) => {
                return Err(Rejection::InvalidPayload(format!("failed to decode ClearRoom: {e}")));
            },
        };

        let room =
            RoomName::new(request.room).map_err(|e| Rejection::InvalidPayload(e.to_string()))?;

        let removed = self
            .store
            .clear_room(&room)
            .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;

        let announce = Payload::RoomCleared(RoomCleared { room: room.as_str().to_string() });

        let mut actions = self.broadcast_all_or_log(announce);
        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!(
                "room {room} cleared by admin {} ({removed} messages removed)",
                actor.user_id
            ),
        });
        Ok(actions)
    }

    /// Handle a connection being closed.
    fn handle_connection_closed(
        &mut self,
        connection_id: u64,
        reason: &str,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let mut actions = Vec::new();

        if let Some(mut conn) = self.connections.remove(&connection_id) {
            conn.close();
        }
        self.identified_at.remove(&connection_id);
        self.rooms.leave(connection_id);

        // If the connection had presence, everyone gets a fresh snapshot
        if let Some(identity) = self.presence.unregister(connection_id) {
            actions.extend(self.broadcast_snapshot());
            actions.push(ServerAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "connection {connection_id} (user {}) closed: {reason}",
                    identity.user_id
                ),
            });
        } else {
            actions.push(ServerAction::Log {
                level: LogLevel::Info,
                message: format!("connection {connection_id} closed: {reason}"),
            });
        }

        Ok(actions)
    }

    /// Handle periodic tick: timeouts, heartbeats, and default-room
    /// placement.
    fn handle_tick(&mut self) -> Result<Vec<ServerAction>, ServerError> {
        let now = self.env.now();
        let mut actions = Vec::new();

        let connection_ids: Vec<u64> = self.connections.keys().copied().collect();

        for connection_id in connection_ids {
            if let Some(conn) = self.connections.get_mut(&connection_id) {
                for action in conn.tick(now) {
                    actions.push(Self::convert_connection_action(connection_id, action));
                }
            }
        }

        if let Some(default_room) = self.config.default_room.clone() {
            let grace = self.config.default_room_grace;

            let candidates: Vec<u64> = self
                .connections
                .iter()
                .filter(|(connection_id, conn)| {
                    conn.state() == ConnectionState::Ready
                        && self.rooms.room_of(**connection_id).is_none()
                })
                .filter(|(connection_id, _)| {
                    self.identified_at
                        .get(connection_id)
                        .is_some_and(|since| now - *since >= grace)
                })
                .map(|(connection_id, _)| *connection_id)
                .collect();

            for connection_id in candidates {
                self.rooms.join(connection_id, default_room.clone());
                actions.push(ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!(
                        "connection {connection_id} placed in default room {default_room}"
                    ),
                });
            }
        }

        Ok(actions)
    }

    /// Build the Error frame and warning log for a rejected request.
    fn reject(
        &self,
        connection_id: u64,
        request_id: u32,
        rejection: &Rejection,
    ) -> Vec<ServerAction> {
        let payload = Payload::Error(rejection.to_error_payload());
        let mut header = FrameHeader::new(Opcode::Error);
        header.set_request_id(request_id);
        header.set_timestamp_ms(self.env.wall_clock_ms());

        match payload.into_frame(header) {
            Ok(frame) => vec![
                ServerAction::SendToConnection { connection_id, frame },
                ServerAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "rejected request from connection {connection_id}: {rejection}"
                    ),
                },
            ],
            Err(e) => vec![ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode error response: {e}"),
            }],
        }
    }

    /// Ordered presence snapshot pushed to every connection.
    fn broadcast_snapshot(&self) -> Vec<ServerAction> {
        let snapshot =
            Payload::PresenceSnapshot(PresenceSnapshot { entries: self.presence.snapshot() });
        let mut header = FrameHeader::new(Opcode::PresenceSnapshot);
        header.set_timestamp_ms(self.env.wall_clock_ms());

        match snapshot.into_frame(header) {
            Ok(frame) => vec![ServerAction::BroadcastAll { frame }],
            Err(e) => vec![ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode presence snapshot: {e}"),
            }],
        }
    }

    fn broadcast_all_or_log(&self, payload: Payload) -> Vec<ServerAction> {
        let mut header = FrameHeader::new(payload.opcode());
        header.set_timestamp_ms(self.env.wall_clock_ms());

        match payload.into_frame(header) {
            Ok(frame) => vec![ServerAction::BroadcastAll { frame }],
            Err(e) => vec![ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode broadcast frame: {e}"),
            }],
        }
    }

    fn encode_or_log(payload: Payload, header: FrameHeader) -> Result<Frame, ServerAction> {
        payload.into_frame(header).map_err(|e| ServerAction::Log {
            level: LogLevel::Error,
            message: format!("failed to encode response frame: {e}"),
        })
    }

    fn convert_connection_action(connection_id: u64, action: ConnectionAction) -> ServerAction {
        match action {
            ConnectionAction::SendFrame(frame) => {
                ServerAction::SendToConnection { connection_id, frame }
            },
            ConnectionAction::Close { reason } => {
                ServerAction::CloseConnection { connection_id, reason }
            },
        }
    }

    /// Presence identity for a connection, or the UnknownSender rejection.
    fn sender_identity(&self, connection_id: u64) -> Result<Identity, Rejection> {
        self.presence.get(connection_id).cloned().ok_or(Rejection::UnknownSender(connection_id))
    }

    fn directory_rejection(error: DirectoryError) -> Rejection {
        match error {
            DirectoryError::UserNotFound(id) => Rejection::NotFound(format!("user {id}")),
            other => Rejection::StoreUnavailable(other.to_string()),
        }
    }

    /// Member connections of a room.
    pub fn connections_in_room(&self, room: &RoomName) -> Vec<u64> {
        self.rooms.members(room).collect()
    }

    /// All live connection ids.
    pub fn connection_ids(&self) -> Vec<u64> {
        self.connections.keys().copied().collect()
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Room a connection is currently in.
    pub fn room_of(&self, connection_id: u64) -> Option<&RoomName> {
        self.rooms.room_of(connection_id)
    }

    /// Current ordered presence snapshot.
    pub fn presence_snapshot(&self) -> Vec<palaver_proto::payloads::presence::PresenceEntry> {
        self.presence.snapshot()
    }

    /// Message store backend.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<E, S, D, M> std::fmt::Debug for ServerDriver<E, S, D, M>
where
    E: Environment,
    S: MessageStore,
    D: Directory,
    M: MediaStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connection_count", &self.connections.len())
            .field("room_count", &self.rooms.room_count())
            .field("presence_count", &self.presence.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::Instant,
    };

    use palaver_proto::payloads::session::Identify;

    use super::*;
    use crate::{directory::MemoryDirectory, media::MemoryMediaStore, storage::MemoryStore};

    #[derive(Clone)]
    struct TestEnv {
        counter: Arc<AtomicU32>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { counter: Arc::new(AtomicU32::new(0)) }
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock_ms(&self) -> u64 {
            1_700_000_000_000
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // Deterministic but distinct per call
            let seed = self.counter.fetch_add(1, Ordering::Relaxed);
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (seed as u8).wrapping_add(i as u8);
            }
        }
    }

    type TestDriver = ServerDriver<TestEnv, MemoryStore, MemoryDirectory, MemoryMediaStore>;

    fn driver() -> TestDriver {
        ServerDriver::new(
            TestEnv::new(),
            MemoryStore::new(),
            MemoryDirectory::new(),
            MemoryMediaStore::new(),
            DriverConfig::default(),
        )
    }

    fn identify_frame(user_id: u64, username: &str) -> Frame {
        let identify = Payload::Identify(Identify {
            user_id,
            username: username.to_string(),
            avatar_url: None,
            role: None,
            muted: None,
            auth_token: None,
        });
        identify.into_frame(FrameHeader::new(Opcode::Identify)).unwrap()
    }

    #[test]
    fn server_accepts_connection() {
        let mut server = driver();

        let actions =
            server.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        assert_eq!(server.connection_count(), 1);
        assert!(matches!(actions[0], ServerAction::Log { level: LogLevel::Debug, .. }));
    }

    #[test]
    fn server_rejects_when_max_connections_exceeded() {
        let mut server = ServerDriver::new(
            TestEnv::new(),
            MemoryStore::new(),
            MemoryDirectory::new(),
            MemoryMediaStore::new(),
            DriverConfig { max_connections: 2, ..Default::default() },
        );

        server.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();
        server.process_event(ServerEvent::ConnectionAccepted { connection_id: 2 }).unwrap();

        let actions =
            server.process_event(ServerEvent::ConnectionAccepted { connection_id: 3 }).unwrap();

        assert_eq!(server.connection_count(), 2);
        assert!(matches!(actions[0], ServerAction::CloseConnection { .. }));
    }

    #[test]
    fn identify_acks_and_broadcasts_snapshot() {
        let mut server = driver();
        server.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        let actions = server
            .process_event(ServerEvent::FrameReceived {
                connection_id: 1,
                frame: identify_frame(42, "alice"),
            })
            .unwrap();

        assert!(matches!(
            &actions[0],
            ServerAction::SendToConnection { connection_id: 1, frame }
                if frame.header.opcode_enum() == Some(Opcode::IdentifyAck)
        ));
        assert!(matches!(
            &actions[1],
            ServerAction::BroadcastAll { frame }
                if frame.header.opcode_enum() == Some(Opcode::PresenceSnapshot)
        ));

        let snapshot = server.presence_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].username, "alice");
    }

    #[test]
    fn blank_username_rejected_but_connection_survives() {
        let mut server = driver();
        server.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        let actions = server
            .process_event(ServerEvent::FrameReceived {
                connection_id: 1,
                frame: identify_frame(42, "   "),
            })
            .unwrap();

        assert!(matches!(
            &actions[0],
            ServerAction::SendToConnection { connection_id: 1, frame }
                if frame.header.opcode_enum() == Some(Opcode::Error)
        ));
        assert!(!actions.iter().any(|a| matches!(a, ServerAction::CloseConnection { .. })));
        assert_eq!(server.connection_count(), 1);
        assert!(server.presence_snapshot().is_empty());
    }

    #[test]
    fn publish_before_identify_is_unknown_sender() {
        let mut server = driver();
        server.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        let publish = Payload::Publish(palaver_proto::payloads::chat::Publish {
            room: "geral".to_string(),
            body: palaver_proto::payloads::chat::MessageBody::Text("oi".to_string()),
        });
        let frame = publish.into_frame(FrameHeader::new(Opcode::Publish)).unwrap();

        let actions = server
            .process_event(ServerEvent::FrameReceived { connection_id: 1, frame })
            .unwrap();

        assert!(matches!(
            &actions[0],
            ServerAction::SendToConnection { connection_id: 1, frame }
                if frame.header.opcode_enum() == Some(Opcode::Error)
        ));
    }

    #[test]
    fn server_handles_connection_closed() {
        let mut server = driver();
        server.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();
        server
            .process_event(ServerEvent::FrameReceived {
                connection_id: 1,
                frame: identify_frame(42, "alice"),
            })
            .unwrap();
        assert_eq!(server.connection_count(), 1);

        let actions = server
            .process_event(ServerEvent::ConnectionClosed {
                connection_id: 1,
                reason: "client disconnect".to_string(),
            })
            .unwrap();

        assert_eq!(server.connection_count(), 0);
        assert!(server.presence_snapshot().is_empty());
        // Departure triggers a fresh snapshot for the survivors
        assert!(matches!(actions[0], ServerAction::BroadcastAll { .. }));
    }

    #[test]
    fn frame_from_unknown_connection_fails() {
        let mut server = driver();

        let result = server.process_event(ServerEvent::FrameReceived {
            connection_id: 99,
            frame: identify_frame(42, "alice"),
        });

        assert!(matches!(result, Err(ServerError::ConnectionNotFound(99))));
    }
}
