//! Error types for RED container handling and Opus packet inspection

use thiserror::Error;

/// Errors raised while splitting or building an RFC 2198 container.
///
/// None of these ever escape a frame transform: the transform logs them and
/// forwards the frame untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedError {
    #[error("Malformed RED container: {0}")]
    MalformedContainer(&'static str),

    #[error("RED block payload type {found} does not match codec payload type {expected}")]
    PayloadTypeMismatch { expected: u8, found: u8 },

    #[error("Primary block could not be isolated")]
    UnrecoverableFrame,

    #[error("Payload of {len} bytes exceeds limit of {max} bytes")]
    OversizePayload { len: usize, max: usize },

    #[error("Empty primary payload")]
    EmptyPayload,
}

/// Opus framing errors (RFC 6716 section 3)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusError {
    #[error("Invalid Opus packet")]
    InvalidPacket,
}

pub type Result<T> = std::result::Result<T, RedError>;
