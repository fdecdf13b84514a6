//! `nvb-decoder`: Push-to-pull bridge between NVDEC and a frame consumer.
//!
//! The NVDEC parser delivers sequence, decode, and display events through
//! callbacks fired from inside its parse call. This crate turns those events
//! into a pull-style API: submit compressed packets, then fetch and release
//! planar YUV 4:2:0 pictures from a fixed handoff ring.
//!
//! # Architecture
//!
//! - [`engine`]: Traits the session uses to reach the hardware
//! - [`session`]: [`DecodeSession`]: event handling, negotiation, handoff
//! - [`manager`]: [`SessionFactory`]: device probing and session creation
//! - [`format`]: Stream format negotiation and reconfigure planning
//! - [`ring`] / [`picture`]: Handoff ring and the picture pool behind it
//! - [`convert`]: Semi-planar surface to planar picture conversion
//! - [`deferred`] / [`surfaces`]: Per-packet tags and decode-surface sizing
//! - [`nvdec`]: nvcuvid bindings and the NVDEC engine (`nvdec` feature)
//!
//! ## Usage
//!
//! ```ignore
//! use nvb_common::{CompressedPacket, SessionConfig, VideoCodec, WallClockMs};
//! use nvb_decoder::SessionFactory;
//!
//! let factory = SessionFactory::nvdec()?;
//! let session = factory.create_session(&SessionConfig::new(VideoCodec::H264))?;
//!
//! for (data, ms) in access_units {
//!     if session.submit(&CompressedPacket::new(data, WallClockMs(ms)))? {
//!         if let Some(picture) = session.fetch() {
//!             consume(picture.y(), picture.u(), picture.v());
//!             picture.release()?;
//!         }
//!     }
//! }
//! session.drain()?;
//! ```

pub mod convert;
pub mod deferred;
pub mod engine;
pub mod format;
pub mod manager;
pub mod nvdec;
pub mod picture;
pub mod ring;
pub mod session;
pub mod surfaces;

pub use engine::{DeviceProvider, HwDevice, HwVideoDecoder, ParserEvents, VideoParser};
pub use format::{NegotiatedFormat, OutputGeometry};
pub use manager::SessionFactory;
pub use picture::PictureBuffer;
pub use session::{DecodeSession, PictureLease, SessionStats};
