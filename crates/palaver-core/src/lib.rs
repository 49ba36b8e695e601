//! Palaver chat core.
//!
//! Pure protocol logic shared by server and test harnesses: the connection
//! lifecycle state machine, identity and message domain types, and the
//! environment abstraction that keeps time and randomness out of the logic.
//!
//! Nothing in this crate performs I/O. State machines take time as method
//! parameters and return actions for a driver to execute.

pub mod connection;
pub mod env;
pub mod error;
pub mod identity;
pub mod message;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;
pub use identity::Identity;
pub use message::{Message, MessageId, RoomName};
