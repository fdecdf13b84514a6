//! Central error types for the decode bridge (thiserror-based).
//!
//! Every variant is `Clone` so the first failure that deactivates a session
//! can be stored once and handed back to every later caller.

use thiserror::Error;

use crate::codec::{ChromaFormat, VideoCodec};
use crate::types::Resolution;

/// A lower-level hardware or driver call returned a non-success status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{call} failed: {reason}")]
pub struct HwCallError {
    /// Name of the driver entry point (e.g. `cuvidDecodePicture`).
    pub call: &'static str,
    pub reason: String,
}

impl HwCallError {
    pub fn new(call: &'static str, reason: impl Into<String>) -> Self {
        Self {
            call,
            reason: reason.into(),
        }
    }

    /// Build from a raw driver status code.
    pub fn from_code(call: &'static str, code: i32) -> Self {
        Self::new(call, format!("error code {code}"))
    }
}

/// Decode session errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("No usable decode device at ordinal {ordinal} (found {count})")]
    DeviceUnavailable { ordinal: usize, count: usize },

    #[error("Unsupported format: {codec:?} {chroma:?} {bit_depth}-bit")]
    UnsupportedFormat {
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u8,
    },

    #[error("Resolution {requested} exceeds device limit {limit}")]
    ResolutionTooLarge {
        requested: Resolution,
        limit: Resolution,
    },

    #[error("Unsupported mid-session reconfiguration: {0}")]
    UnsupportedReconfiguration(String),

    #[error("Decoder reconfiguration failed: {0}")]
    ReconfigureFailed(String),

    #[error("Decode requested before the hardware decoder was created")]
    DecoderNotReady,

    #[error("Handoff ring full, picture dropped")]
    Overflow,

    #[error("No outstanding picture to release")]
    Underflow,

    #[error("Hardware call failed: {0}")]
    HardwareCall(#[from] HwCallError),

    #[error("Unsupported codec for HW decode: {0:?}")]
    UnsupportedCodec(VideoCodec),

    #[error("Decode session is inactive")]
    Inactive,

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),
}

impl DecodeError {
    /// Backpressure conditions that leave the session usable.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Overflow | Self::Underflow)
    }
}

/// Convenience Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
