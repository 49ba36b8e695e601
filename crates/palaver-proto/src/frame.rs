//! Complete frame assembly (header + payload).

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    header::FrameHeader,
    opcode::Opcode,
};

/// A complete wire frame: 32-byte header plus CBOR payload.
///
/// The header's `payload_size` field is kept in sync with the payload buffer
/// by the constructors; [`Frame::encode`] re-checks the size limit so an
/// oversized frame can never be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (routing and correlation metadata)
    pub header: FrameHeader,
    /// CBOR-encoded payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a header and payload, fixing up `payload_size`.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: Bytes) -> Self {
        // invariant: payloads are capped at 16 MB, far below u32::MAX
        #[allow(clippy::expect_used)]
        let size = u32::try_from(payload.len()).expect("invariant: payload length exceeds u32");
        header.set_payload_size(size);
        Self { header, payload }
    }

    /// Create an empty frame (header only) for the given opcode.
    #[must_use]
    pub fn empty(opcode: Opcode) -> Self {
        Self::new(FrameHeader::new(opcode), Bytes::new())
    }

    /// Serialize the frame to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::PayloadTooLarge` if the payload exceeds
    /// [`FrameHeader::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let mut buf = BytesMut::with_capacity(FrameHeader::SIZE + self.payload.len());
        buf.put_slice(&self.header.to_bytes());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse a frame from wire bytes.
    ///
    /// The payload is copied out of the input buffer so the returned frame
    /// owns its data.
    ///
    /// # Errors
    ///
    /// Returns header validation errors from [`FrameHeader::from_bytes`],
    /// or `ProtocolError::FrameTruncated` if the buffer holds fewer payload
    /// bytes than the header claims.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let available = bytes.len() - FrameHeader::SIZE;
        if available < payload_size {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: available,
            });
        }

        let payload = Bytes::copy_from_slice(
            &bytes[FrameHeader::SIZE..FrameHeader::SIZE + payload_size],
        );

        Ok(Self { header, payload })
    }

    /// Total serialized size in bytes.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }
}
