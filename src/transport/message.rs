//! Wire format of a subscription.
//!
//! Commands arrive as a stream of JSON strings. They may be separated by
//! whitespace or simply concatenated, and may be split across body chunks
//! at any byte. Frames go out as one JSON value per line: a message frame is
//! the payload as a base64 JSON string, an error frame is `{"error": "..."}`.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::broker::Payload;
use crate::transport::error::{CodecError, ErrorBody, ServerError};

pub const CMD_INIT: &str = "INIT";
pub const CMD_ACK: &str = "ACK";
pub const CMD_NACK: &str = "NACK";

/// Largest command value the decoder buffers. Real commands are a few bytes.
pub const MAX_COMMAND_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// First command of a subscription: fetch the first message.
    Init,
    /// The outstanding message was processed; remove it and fetch the next.
    Ack,
    /// The outstanding message failed; put it back at the head and fetch.
    Nack,
    Unknown(String),
}

impl From<String> for Command {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            CMD_INIT => Command::Init,
            CMD_ACK => Command::Ack,
            CMD_NACK => Command::Nack,
            _ => Command::Unknown(raw),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Init => f.write_str(CMD_INIT),
            Command::Ack => f.write_str(CMD_ACK),
            Command::Nack => f.write_str(CMD_NACK),
            Command::Unknown(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Payload),
    Error(String),
}

impl Frame {
    pub fn error(err: ServerError) -> Self {
        Frame::Error(err.to_string())
    }

    /// Encode into a standalone chunk, trailing newline included.
    pub fn into_bytes(self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        FrameCodec.encode(self, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Decodes the request body of a subscription into [`Command`]s.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, CodecError> {
        let leading = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(leading);
        if src.is_empty() {
            return Ok(None);
        }

        let (next, consumed) = {
            let mut values = serde_json::Deserializer::from_slice(&src[..]).into_iter::<String>();
            let next = values.next();
            (next, values.byte_offset())
        };

        match next {
            Some(Ok(_)) if consumed > MAX_COMMAND_BYTES => {
                Err(CodecError::TooLong(MAX_COMMAND_BYTES))
            }
            Some(Ok(raw)) => {
                src.advance(consumed);
                Ok(Some(Command::from(raw)))
            }
            // partial value, wait for more bytes unless it is already too big
            Some(Err(e)) if e.is_eof() => {
                if src.len() > MAX_COMMAND_BYTES {
                    Err(CodecError::TooLong(MAX_COMMAND_BYTES))
                } else {
                    Ok(None)
                }
            }
            Some(Err(e)) => Err(e.into()),
            None => {
                src.clear();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Command>, CodecError> {
        match self.decode(src)? {
            Some(command) => Ok(Some(command)),
            None if src.iter().all(u8::is_ascii_whitespace) => Ok(None),
            None => Err(CodecError::Truncated),
        }
    }
}

/// Encodes [`Frame`]s, one JSON value per line.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let json = match frame {
            Frame::Message(payload) => serde_json::to_vec(&STANDARD.encode(&payload))?,
            Frame::Error(error) => serde_json::to_vec(&ErrorBody { error })?,
        };

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
