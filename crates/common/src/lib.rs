//! `nvb-common`: Shared types, configuration, and errors for the NVDEC decode bridge.
//!
//! This crate is the foundation the other bridge crates depend on:
//!
//! - **Types**: `Resolution`, `Rect`, `WallClockMs`, `ParserTicks` (newtypes for safety)
//! - **Codec**: `VideoCodec`, `ChromaFormat`
//! - **Packets**: `CompressedPacket`, `PacketTag`
//! - **Errors**: `DecodeError`, `HwCallError` (thiserror-based)
//! - **Config**: `SessionConfig`

pub mod codec;
pub mod config;
pub mod error;
pub mod packet;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{ChromaFormat, VideoCodec};
pub use config::{SessionConfig, DEFAULT_BUFFER_DEPTH};
pub use error::{DecodeError, DecodeResult, HwCallError};
pub use packet::{CompressedPacket, PacketTag, SlotId, SubsessionId};
pub use types::{ParserTicks, Rect, Resolution, WallClockMs, PARSER_TICKS_PER_MS};
