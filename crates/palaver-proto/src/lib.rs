//! Palaver wire protocol.
//!
//! Frames are a fixed 32-byte binary header (Big Endian, parsed zero-copy)
//! followed by a CBOR payload. The header carries everything the server
//! needs for routing and request correlation; payload decoding is driven by
//! the opcode in the header, so no variant tag travels on the wire.

mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};

/// ALPN protocol identifier for QUIC transport negotiation.
pub const ALPN_PROTOCOL: &[u8] = b"palaver";
