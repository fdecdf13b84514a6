//! `nvb-gpu-hal`: GPU hardware layer for the decode bridge.
//!
//! The host-side [`pitch`] module is always available. The `cuda` feature
//! adds the CUDA driver layer used by the real NVDEC device.

#[cfg(feature = "cuda")]
pub mod cuda;

pub mod pitch;

pub use pitch::{CopyError, PitchedCopy};
