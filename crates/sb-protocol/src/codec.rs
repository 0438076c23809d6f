//! Length-prefixed framed codec.
//!
//! Each TCP frame is a `u32` big-endian length followed by exactly that many
//! bytes of UTF-8 JSON (the [`Message`](crate::Message) envelope).  The
//! decoder waits for more data when a frame is incomplete and rejects frames
//! whose header claims more than [`MAX_FRAME_SIZE`] bytes.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::Message;

/// Upper bound on a single frame's payload.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Framing/decoding failures.
///
/// `Malformed` frames have already been consumed from the read buffer, so the
/// stream may keep decoding subsequent frames; `FrameTooLarge` and `Io` leave
/// the stream unusable.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// True when the connection cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CodecError::Malformed(_))
    }
}

/// Codec for [`Message`] frames over a TCP stream.
#[derive(Debug, Default)]
pub struct MessageCodec {
    _private: (),
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut header = [0u8; 4];
        header.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(header) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(length));
        }

        if src.len() < 4 + length {
            // Incomplete frame; wait for more data.
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let body = src.split_to(length);
        Message::from_wire_json(&body).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = msg
            .to_wire_json()
            .map_err(|e| CodecError::Malformed(format!("encoding envelope: {e}")))?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(body.len()));
        }
        // Length and payload land in the same buffer flush, so a frame is
        // always written atomically with respect to other messages.
        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
