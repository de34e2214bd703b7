//! Gamma Protocol - Wire protocol for daemon communication
//!
//! This crate provides the framed message format spoken between the
//! daemon, the terminal client, and the operator station: a flat JSON
//! object carrying a `command` tag plus arbitrary fields, delivered
//! either length-prefixed over a byte stream or one message per
//! datagram.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode_datagram, encode_datagram, encode_frame, Frame, FrameCodec, MAX_FRAME_LEN};
pub use error::ProtocolError;
pub use message::{tags, Message};
