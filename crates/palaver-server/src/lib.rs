//! Palaver production server.
//!
//! Production server implementation using Quinn for QUIC transport, Tokio for
//! async runtime, and system time with cryptographic RNG.
//!
//! # Architecture
//!
//! This crate provides production "glue" that wraps [`palaver_core`]'s
//! action-based logic with real I/O. The [`ServerDriver`] follows the Sans-IO
//! pattern (see [`palaver_core`] for details), while [`Server`] executes the
//! actions using Quinn QUIC and Tokio async runtime.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`Server`]: Production runtime that executes ServerDriver actions
//! - [`QuinnTransport`]: QUIC transport via Quinn library
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)
//! - [`storage`]: Message store backends (in-memory and redb)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod driver;
mod error;
mod fanout;
mod media;
mod moderation;
mod presence;
mod rejection;
mod rooms;
mod server_error;
pub mod storage;
mod system_env;
mod transport;

use std::{collections::HashMap, sync::Arc};

use bytes::{Bytes, BytesMut};
pub use directory::{Directory, DirectoryError, MemoryDirectory};
pub use driver::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use fanout::{DEFAULT_DEDUP_CAPACITY, DedupCache, validate_body};
pub use media::{MediaError, MediaStore, MemoryMediaStore};
use palaver_core::env::Environment;
use palaver_proto::{Frame, FrameHeader};
pub use presence::PresenceRegistry;
pub use rejection::Rejection;
pub use rooms::{JoinOutcome, RoomRegistry};
pub use server_error::ServerError as DriverError;
pub use storage::{ChaoticStore, MemoryStore, MessageStore, StoreError};
pub use system_env::SystemEnv;
use tokio::sync::RwLock;
pub use transport::{QuinnConnection, QuinnTransport};

/// Shared state for all connections.
///
/// This holds connection and stream maps for message routing.
struct SharedState {
    /// Map of connection ID to QUIC connection (for closing)
    connections: RwLock<HashMap<u64, QuinnConnection>>,
    /// Map of connection ID to persistent outbound stream
    /// All frames to a client go through this single stream, ensuring
    /// ordering.
    outbound_streams: RwLock<HashMap<u64, tokio::sync::Mutex<quinn::SendStream>>>,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Driver configuration (timeouts, limits, default room)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            driver: DriverConfig::default(),
        }
    }
}

/// Driver instantiated with the production environment and adapters.
type ProductionDriver<S> = ServerDriver<SystemEnv, S, MemoryDirectory, MemoryMediaStore>;

/// Production Palaver server.
///
/// Wraps `ServerDriver` with Quinn QUIC transport and system environment.
pub struct Server<S: MessageStore> {
    /// The action-based server driver
    driver: ProductionDriver<S>,
    /// QUIC endpoint
    transport: QuinnTransport,
    /// Environment
    env: SystemEnv,
}

impl Server<MemoryStore> {
    /// Create and bind a new server with in-memory storage.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` or `ServerError::Transport` when binding fails.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        Self::bind_with_storage(config, MemoryStore::new())
    }
}

impl<S: MessageStore + Send + 'static> Server<S> {
    /// Create and bind a new server with an explicit storage backend.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` or `ServerError::Transport` when binding fails.
    pub fn bind_with_storage(
        config: ServerRuntimeConfig,
        store: S,
    ) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(
            env.clone(),
            store,
            MemoryDirectory::new(),
            MemoryMediaStore::new(),
            config.driver,
        );

        let transport =
            QuinnTransport::bind(&config.bind_address, config.cert_path, config.key_path)?;

        Ok(Self { driver, transport, env })
    }

    /// Run the server, accepting connections and processing frames.
    ///
    /// This method runs until the server is shut down or an error occurs.
    ///
    /// # Errors
    ///
    /// `ServerError::Transport` when the endpoint fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        let env = self.env;
        let driver = Arc::new(tokio::sync::Mutex::new(self.driver));
        let shared = Arc::new(SharedState {
            connections: RwLock::new(HashMap::new()),
            outbound_streams: RwLock::new(HashMap::new()),
        });

        // Periodic tick drives heartbeats, timeouts, and default-room
        // placement.
        {
            let driver = Arc::clone(&driver);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    let ops = {
                        let mut driver = driver.lock().await;
                        let actions = match driver.process_event(ServerEvent::Tick) {
                            Ok(actions) => actions,
                            Err(e) => {
                                tracing::warn!("Tick processing error: {}", e);
                                continue;
                            },
                        };
                        match resolve_actions(&driver, actions) {
                            Ok(ops) => ops,
                            Err(e) => {
                                tracing::warn!("Tick action error: {}", e);
                                continue;
                            },
                        }
                    };
                    execute_io(&shared, ops);
                }
            });
        }

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let driver = Arc::clone(&driver);
                    let shared = Arc::clone(&shared);
                    let env = env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, driver, shared, env).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }

    /// Local address the server is bound to.
    ///
    /// # Errors
    ///
    /// `ServerError::Transport` if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }
}

/// Handle a single QUIC connection.
async fn handle_connection<S: MessageStore + Send + 'static>(
    conn: QuinnConnection,
    driver: Arc<tokio::sync::Mutex<ProductionDriver<S>>>,
    shared: Arc<SharedState>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let connection_id = env.random_u64();

    tracing::debug!("New connection: {}", connection_id);

    let outbound_stream = conn
        .open_uni()
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to open outbound stream: {e}")))?;

    {
        let mut connections = shared.connections.write().await;
        connections.insert(connection_id, conn.clone());
    }

    {
        let mut streams = shared.outbound_streams.write().await;
        streams.insert(connection_id, tokio::sync::Mutex::new(outbound_stream));
    }

    let ops = {
        let mut driver = driver.lock().await;
        let actions = driver.process_event(ServerEvent::ConnectionAccepted { connection_id })?;
        resolve_actions(&driver, actions)?
    };
    execute_io(&shared, ops);

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let driver = Arc::clone(&driver);
                let shared = Arc::clone(&shared);

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(connection_id, send, recv, driver, &shared).await
                    {
                        tracing::debug!("Stream error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!("Connection closed: {}", e);
                break;
            },
        }
    }

    {
        let mut connections = shared.connections.write().await;
        connections.remove(&connection_id);
    }

    {
        let mut streams = shared.outbound_streams.write().await;
        streams.remove(&connection_id);
    }

    let ops = {
        let mut driver = driver.lock().await;
        let actions = driver.process_event(ServerEvent::ConnectionClosed {
            connection_id,
            reason: "connection closed".to_string(),
        })?;
        resolve_actions(&driver, actions)?
    };
    execute_io(&shared, ops);

    Ok(())
}

/// Handle a single bidirectional stream.
async fn handle_stream<S: MessageStore + Send + 'static>(
    connection_id: u64,
    send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    driver: Arc<tokio::sync::Mutex<ProductionDriver<S>>>,
    shared: &Arc<SharedState>,
) -> Result<(), ServerError> {
    drop(send); // responses go over the persistent outbound stream

    let mut buf = BytesMut::with_capacity(65536);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);

        match recv.read_exact(&mut buf[..FrameHeader::SIZE]).await {
            Ok(()) => {},
            Err(e) => {
                tracing::debug!("Read error: {}", e);
                break;
            },
        }

        let payload_size = {
            let header = match FrameHeader::from_bytes(&buf[..FrameHeader::SIZE]) {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!("Invalid frame header: {}", e);
                    break;
                },
            };
            header.payload_size() as usize
        };

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            if let Err(e) = recv.read_exact(&mut buf[FrameHeader::SIZE..]).await {
                tracing::debug!("Payload read error: {}", e);
                break;
            }
        }

        let frame = match Frame::decode(&buf) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Frame decode error: {}", e);
                break;
            },
        };

        // The driver lock covers event processing and target resolution
        // only; network writes happen after it is released.
        let ops = {
            let mut driver = driver.lock().await;
            let actions =
                match driver.process_event(ServerEvent::FrameReceived { connection_id, frame }) {
                    Ok(actions) => actions,
                    Err(e) => {
                        tracing::warn!("Frame processing error: {}", e);
                        continue;
                    },
                };
            resolve_actions(&driver, actions)?
        };
        execute_io(shared, ops);
    }

    Ok(())
}

/// Write an encoded frame to a connection's outbound stream.
async fn write_to_connection(shared: &SharedState, connection_id: u64, bytes: &[u8]) {
    let streams = shared.outbound_streams.read().await;
    if let Some(stream_mutex) = streams.get(&connection_id) {
        let mut stream = stream_mutex.lock().await;
        if let Err(e) = stream.write_all(bytes).await {
            tracing::warn!("Write failed for {}: {}", connection_id, e);
        }
    } else {
        tracing::warn!("Connection {} has no outbound stream", connection_id);
    }
}

/// A network operation resolved from a driver action.
///
/// Built while the driver lock is held (broadcast targets come from the
/// driver's registries) and executed after it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IoOp {
    /// Write encoded frame bytes to a connection's outbound stream.
    Write {
        /// Target connection.
        connection_id: u64,
        /// Encoded frame.
        bytes: Bytes,
    },
    /// Close a connection.
    Close {
        /// Target connection.
        connection_id: u64,
        /// Reason passed to the QUIC close.
        reason: String,
    },
}

impl IoOp {
    fn connection_id(&self) -> u64 {
        match self {
            Self::Write { connection_id, .. } | Self::Close { connection_id, .. } => {
                *connection_id
            },
        }
    }
}

/// Resolve driver actions into network operations.
///
/// Log actions are emitted immediately; everything touching the network is
/// deferred so it can run without the driver lock.
fn resolve_actions<S: MessageStore>(
    driver: &ProductionDriver<S>,
    actions: Vec<ServerAction>,
) -> Result<Vec<IoOp>, ServerError> {
    let mut ops = Vec::new();

    for action in actions {
        match action {
            ServerAction::SendToConnection { connection_id, frame } => {
                let bytes = frame.encode().map_err(|e| ServerError::Protocol(e.to_string()))?;
                ops.push(IoOp::Write { connection_id, bytes });
            },

            ServerAction::BroadcastToRoom { room, frame, exclude } => {
                let bytes = frame.encode().map_err(|e| ServerError::Protocol(e.to_string()))?;

                for connection_id in driver.connections_in_room(&room) {
                    if Some(connection_id) != exclude {
                        ops.push(IoOp::Write { connection_id, bytes: bytes.clone() });
                    }
                }
            },

            ServerAction::BroadcastAll { frame } => {
                let bytes = frame.encode().map_err(|e| ServerError::Protocol(e.to_string()))?;

                for connection_id in driver.connection_ids() {
                    ops.push(IoOp::Write { connection_id, bytes: bytes.clone() });
                }
            },

            ServerAction::CloseConnection { connection_id, reason } => {
                ops.push(IoOp::Close { connection_id, reason });
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }

    Ok(ops)
}

/// Group operations by target connection, preserving per-connection order.
fn group_by_connection(ops: Vec<IoOp>) -> HashMap<u64, Vec<IoOp>> {
    let mut grouped: HashMap<u64, Vec<IoOp>> = HashMap::new();
    for op in ops {
        grouped.entry(op.connection_id()).or_default().push(op);
    }
    grouped
}

/// Execute resolved operations without holding the driver lock.
///
/// One task per target connection: frames to a single peer stay ordered,
/// while a stalled or slow peer never delays writes to the others.
fn execute_io(shared: &Arc<SharedState>, ops: Vec<IoOp>) {
    for (_, ops) in group_by_connection(ops) {
        let shared = Arc::clone(shared);

        tokio::spawn(async move {
            for op in ops {
                match op {
                    IoOp::Write { connection_id, bytes } => {
                        write_to_connection(&shared, connection_id, &bytes).await;
                    },
                    IoOp::Close { connection_id, reason } => {
                        tracing::info!("Closing connection {}: {}", connection_id, reason);
                        let mut connections = shared.connections.write().await;
                        if let Some(conn) = connections.remove(&connection_id) {
                            conn.close(0u32.into(), reason.as_bytes());
                        }
                    },
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use palaver_proto::{Opcode, Payload};
    use palaver_proto::payloads::{chat::MessageBody, presence::JoinRoom, session::Identify};

    use super::*;

    fn driver_with_room_members() -> ProductionDriver<MemoryStore> {
        let mut driver = ServerDriver::new(
            SystemEnv::new(),
            MemoryStore::new(),
            MemoryDirectory::new(),
            MemoryMediaStore::new(),
            DriverConfig::default(),
        );

        for (connection_id, user_id, username) in [(1, 41, "alice"), (2, 42, "bruno")] {
            driver.process_event(ServerEvent::ConnectionAccepted { connection_id }).unwrap();

            let identify = Payload::Identify(Identify {
                user_id,
                username: username.to_string(),
                avatar_url: None,
                role: None,
                muted: None,
                auth_token: None,
            });
            let frame = identify.into_frame(FrameHeader::new(Opcode::Identify)).unwrap();
            driver.process_event(ServerEvent::FrameReceived { connection_id, frame }).unwrap();

            let join = Payload::JoinRoom(JoinRoom { room: "geral".to_string() });
            let frame = join.into_frame(FrameHeader::new(Opcode::JoinRoom)).unwrap();
            driver.process_event(ServerEvent::FrameReceived { connection_id, frame }).unwrap();
        }

        driver
    }

    #[test]
    fn broadcast_resolves_to_per_member_writes() {
        let driver = driver_with_room_members();
        let room = palaver_core::RoomName::new("geral").unwrap();

        let payload = Payload::Publish(palaver_proto::payloads::chat::Publish {
            room: "geral".to_string(),
            body: MessageBody::Text("oi".to_string()),
        });
        let frame = payload.into_frame(FrameHeader::new(Opcode::Publish)).unwrap();

        let actions = vec![ServerAction::BroadcastToRoom { room, frame, exclude: Some(2) }];
        let ops = resolve_actions(&driver, actions).unwrap();

        // Connection 2 is excluded; only connection 1 gets a write
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], IoOp::Write { connection_id: 1, .. }));
    }

    #[test]
    fn grouping_keeps_per_connection_order() {
        let ops = vec![
            IoOp::Write { connection_id: 1, bytes: Bytes::from_static(b"a") },
            IoOp::Write { connection_id: 2, bytes: Bytes::from_static(b"b") },
            IoOp::Write { connection_id: 1, bytes: Bytes::from_static(b"c") },
            IoOp::Close { connection_id: 1, reason: "bye".to_string() },
        ];

        let grouped = group_by_connection(ops);

        assert_eq!(
            grouped[&1],
            vec![
                IoOp::Write { connection_id: 1, bytes: Bytes::from_static(b"a") },
                IoOp::Write { connection_id: 1, bytes: Bytes::from_static(b"c") },
                IoOp::Close { connection_id: 1, reason: "bye".to_string() },
            ]
        );
        assert_eq!(grouped[&2].len(), 1);
    }

    #[test]
    fn log_actions_produce_no_network_operations() {
        let driver = driver_with_room_members();

        let actions = vec![ServerAction::Log {
            level: LogLevel::Info,
            message: "nothing to write".to_string(),
        }];

        assert!(resolve_actions(&driver, actions).unwrap().is_empty());
    }
}
