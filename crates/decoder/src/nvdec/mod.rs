//! NVDEC backend for the decode session.
//!
//! The nvcuvid library is loaded dynamically at runtime, so a process
//! without NVIDIA hardware still links and can fall back gracefully.
//!
//! # Module Structure
//!
//! - [`ffi`]: Raw FFI bindings for nvcuvid (loaded via `libloading`).
//! - [`parser`]: `cuvidCreateVideoParser` wrapper and its callback trampolines.
//! - `device`: [`NvdecProvider`], [`NvdecDevice`] and [`NvdecDecoder`]
//!   (needs the `nvdec` feature for the CUDA driver layer).
//!
//! # Architecture
//!
//! 1. [`NvdecProvider::load()`] loads nvcuvid once per process.
//! 2. The session factory opens an [`NvdecDevice`] per session.
//! 3. The session's parser fires sequence, decode, and display callbacks
//!    from inside `cuvidParseVideoData`; the trampolines in [`parser`]
//!    forward them to the session.
//! 4. Displayed surfaces are mapped, copied to host memory on the
//!    decoder's stream, and unmapped before the callback returns.

#[cfg(feature = "nvdec")]
mod device;
pub mod ffi;
pub mod parser;

#[cfg(feature = "nvdec")]
pub use device::{NvdecDecoder, NvdecDevice, NvdecProvider};
pub use ffi::{NvcuvidLibrary, NvcuvidLoadError};
pub use parser::NvdecParser;
