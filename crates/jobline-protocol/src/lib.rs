//! Wire format spoken between a jobline worker and its broker.
//!
//! Two layers live here: [`Frame`] is the versioned message schema (the
//! version tag is always the first byte), and [`FrameCodec`] delimits frames
//! on a byte stream with a length prefix.

mod frame;
mod codec;

pub use frame::{decode_job, encode_result, Frame, FrameType, DecodeError};
pub use codec::FrameCodec;

use thiserror::Error;

/// Schema version written into every frame
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum frame size: 11MB (to accommodate 10MB job payload + overhead)
pub const MAX_FRAME_SIZE: usize = 11 * 1024 * 1024;

/// Longest identity accepted on the wire
pub const MAX_IDENTITY_LEN: usize = 255;

/// Stream-level failures. A malformed frame body is a [`DecodeError`], not one
/// of these: only the framing itself can fail here.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
