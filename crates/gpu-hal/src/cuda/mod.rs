//! CUDA backend: the driver calls the decode bridge needs (NVIDIA GPUs).
//!
//! Wraps cudarc 0.16 for device enumeration, context push/pop, and
//! device-to-host readback of decoded surfaces.
//!
//! # Architecture
//!
//! - [`context::CudaDevice`] opens a device and retains its primary context.
//! - [`context::ContextGuard`] keeps the context current on the calling thread.
//! - [`stream::CopyStream`] queues pitched copies and synchronizes them.

pub mod context;
pub mod error;
pub mod stream;

pub use self::context::{device_count, enumerate_devices, pop_current, ContextGuard, CudaDevice};
pub use self::error::CudaError;
pub use self::stream::CopyStream;

/// Raw device pointer type shared with nvcuvid.
pub type DevicePtr = cudarc::driver::sys::CUdeviceptr;
