// Wire format: [u32 big-endian payload length][payload bytes]

use std::fmt;
use std::io::{self, Cursor};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error as ThisError;

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 4;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("connection closed by peer before a complete frame was received")]
    ConnectionClosed,
    #[error("frame of {length} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { length: u64, max: u64 },
    #[error("payload source ended after {actual} of {expected} bytes")]
    SourceTooShort { expected: u64, actual: u64 },
    #[error("no progress on the connection for {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A single length-prefixed message. The header is not stored; it is always the payload length.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Frame {
        Frame {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the payload length declared by the header at the start of `src`, if the whole
    /// header is there.
    pub fn peek_length(src: &[u8]) -> Option<u32> {
        let header: [u8; HEADER_LEN] = src.get(..HEADER_LEN)?.try_into().ok()?;
        Some(u32::from_be_bytes(header))
    }

    /// Parses one frame from the cursor, leaving the cursor right after it. Returns
    /// `Error::Incomplete` if the buffer does not hold the whole frame yet; the cursor position is
    /// unspecified in that case.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if src.remaining() < HEADER_LEN {
            return Err(Error::Incomplete);
        }
        let length = src.get_u32() as usize;

        if src.remaining() < length {
            return Err(Error::Incomplete);
        }
        let payload = src.copy_to_bytes(length);

        Ok(Frame { payload })
    }

    /// Writes the header for a payload of `length` bytes.
    pub fn write_header<B: BufMut>(length: usize, dst: &mut B) -> Result<(), Error> {
        let length = u32::try_from(length).map_err(|_| Error::FrameTooLarge {
            length: length as u64,
            max: u32::MAX as u64,
        })?;
        dst.put_u32(length);
        Ok(())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        Frame::write_header(self.payload.len(), &mut bytes)?;
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::new(text)
    }
}

impl From<&'static str> for Frame {
    fn from(text: &'static str) -> Self {
        Frame::new(text)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Frame::new(bytes)
    }
}

// Payloads are usually text, so the lossy form is good enough for logs.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.payload.len(),
            String::from_utf8_lossy(&self.payload)
        )
    }
}
