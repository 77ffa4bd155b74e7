//! Framing for agent messages over a byte stream.
//!
//! Each frame is a 4-byte big-endian length prefix followed by the JSON
//! image of one [Message]. JSON keeps the encoding self-describing and
//! portable between independently built agents; the length prefix makes
//! frame boundaries unambiguous on a raw duplex stream.

use std::io::{Read, Write};

use crate::msg::Message;

/// Upper bound on a single frame. Anything larger is a protocol error,
/// not a legitimate message.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("connection: {0}")]
    Io(String),
    #[error("invalid message encoding: {0}")]
    Json(String),
    #[error("frame of {0} bytes exceeds the maximum frame length")]
    FrameTooLarge(usize),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Writes framed messages to the underlying stream.
#[derive(Debug)]
pub struct Encoder<W> {
    inner: W,
}

impl<W: Write> Encoder<W> {
    pub fn new(inner: W) -> Self {
        Encoder { inner }
    }

    pub fn encode(&mut self, msg: &Message) -> Result<(), Error> {
        let body = serde_json::to_vec(msg).map_err(|e| Error::Json(e.to_string()))?;
        if body.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(body.len()));
        }
        self.inner.write_all(&(body.len() as u32).to_be_bytes())?;
        self.inner.write_all(&body)?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Reads framed messages from the underlying stream.
#[derive(Debug)]
pub struct Decoder<R> {
    inner: R,
}

impl<R: Read> Decoder<R> {
    pub fn new(inner: R) -> Self {
        Decoder { inner }
    }

    pub fn decode(&mut self) -> Result<Message, Error> {
        let mut len = [0u8; 4];
        self.inner.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(len));
        }
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body)?;
        serde_json::from_slice(&body).map_err(|e| Error::Json(e.to_string()))
    }
}
