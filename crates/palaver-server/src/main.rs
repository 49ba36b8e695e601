//! Palaver server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate and in-memory storage (development)
//! palaver-server --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate and persistent storage (production)
//! palaver-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem \
//!     --storage /var/lib/palaver/messages.redb --default-room lobby
//! ```

use clap::Parser;
use palaver_core::RoomName;
use palaver_server::{
    DriverConfig, Server, ServerRuntimeConfig,
    storage::{MemoryStore, RedbStore},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Palaver chat server
#[derive(Parser, Debug)]
#[command(name = "palaver-server")]
#[command(about = "Palaver multi-room chat server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Room to place idle identified connections into
    #[arg(long)]
    default_room: Option<String>,

    /// Path to a redb database file for persistent message storage.
    /// Omit for in-memory storage.
    #[arg(long)]
    storage: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Palaver server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let default_room = match args.default_room {
        Some(name) => Some(RoomName::new(name)?),
        None => None,
    };

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        driver: DriverConfig {
            max_connections: args.max_connections,
            default_room,
            ..Default::default()
        },
    };

    match args.storage {
        Some(path) => {
            tracing::info!("Using persistent storage at {}", path);
            let store = RedbStore::open(&path)?;
            let server = Server::bind_with_storage(config, store)?;
            tracing::info!("Server listening on {}", server.local_addr()?);
            server.run().await?;
        },
        None => {
            tracing::warn!("Using in-memory storage - messages are lost on restart");
            let server = Server::bind_with_storage(config, MemoryStore::new())?;
            tracing::info!("Server listening on {}", server.local_addr()?);
            server.run().await?;
        },
    }

    Ok(())
}
