//! Frame codec for the stream and datagram transports.
//!
//! Stream framing is a `u32` big-endian payload length followed by the
//! serialized [`Message`]. The decoder buffers bytes and extracts exactly
//! one frame once `length + 4` bytes are available, leaving any remainder
//! in the buffer; a partial frame is never consumed, so a frame split
//! across arbitrary read boundaries decodes identically to one delivered
//! whole.
//!
//! An intact frame whose payload fails to parse is still a successfully
//! decoded item ([`Frame::Malformed`]), not a codec error: the buffer is
//! already at the next frame boundary and the connection remains usable.
//! `Framed` fuses its read side after a `Decoder` error, so only failures
//! that genuinely poison the stream (an oversized length header, transport
//! I/O) are reported as errors.
//!
//! The datagram transport carries one serialized message per datagram
//! with no length prefix.

use crate::error::ProtocolError;
use crate::message::Message;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum payload length of one frame (1 MB).
///
/// A 4096-channel spectrum serializes to a few tens of kilobytes, so this
/// bounds memory without constraining any legitimate message.
pub const MAX_FRAME_LEN: usize = 1_048_576;

/// Length of the frame header.
const HEADER_LEN: usize = 4;

/// One decoded stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed message.
    Message(Message),

    /// The frame was intact but its payload was not a valid message;
    /// the reason is suitable for an `error` reply to the peer.
    Malformed(String),
}

/// Codec for length-prefixed protocol frames.
///
/// Stateless apart from the buffer the `Framed` wrapper owns, so a fresh
/// codec per connection resets the receive buffer for free.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let payload_len = u32::from_be_bytes(header) as usize;

        if payload_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: payload_len,
                max: MAX_FRAME_LEN,
            });
        }

        if src.len() < HEADER_LEN + payload_len {
            // Partial frame - reserve what we still expect and wait.
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len);

        match serde_json::from_slice(&payload) {
            Ok(msg) => Ok(Some(Frame::Message(msg))),
            Err(e) => Ok(Some(Frame::Malformed(e.to_string()))),
        }
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(msg).map_err(ProtocolError::malformed)?;

        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: payload.len(),
                max: MAX_FRAME_LEN,
            });
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        <Self as Encoder<&Message>>::encode(self, &msg, dst)
    }
}

/// Encodes one message as a standalone frame (header plus payload).
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = BytesMut::new();
    let mut codec = FrameCodec;
    <FrameCodec as Encoder<&Message>>::encode(&mut codec, msg, &mut buf)?;
    Ok(buf.to_vec())
}

/// Encodes one message for the datagram transport (no length prefix).
pub fn encode_datagram(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(msg).map_err(ProtocolError::malformed)
}

/// Decodes one datagram into a message.
pub fn decode_datagram(data: &[u8]) -> Result<Message, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::malformed)
}
