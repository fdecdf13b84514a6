//! Copy stream: device-to-host pitched copies queued on one CUDA stream.

use std::ffi::c_void;
use std::sync::Arc;

use cudarc::driver::safe::CudaStream as CudarcStream;
use cudarc::driver::sys;
use tracing::trace;

use super::context::CudaDevice;
use super::error::CudaError;
use crate::pitch::PitchedCopy;

/// A non-blocking stream used for readback of decoded surfaces.
#[derive(Debug)]
pub struct CopyStream {
    inner: Arc<CudarcStream>,
}

impl CopyStream {
    pub fn new(device: &CudaDevice) -> Result<Self, CudaError> {
        let inner = device
            .context()
            .new_stream()
            .map_err(|e| CudaError::DeviceInit {
                ordinal: device.ordinal(),
                reason: format!("Failed to create CUDA stream: {e}"),
            })?;
        Ok(Self { inner })
    }

    /// Raw stream handle.
    pub fn raw(&self) -> sys::CUstream {
        self.inner.cu_stream()
    }

    /// Queue a pitched copy from device memory at `src` into `dst`.
    ///
    /// The copy is asynchronous: `dst` must not be read before
    /// [`CopyStream::synchronize`] returns.
    ///
    /// # Safety
    ///
    /// `src` must point to at least `copy.src_extent()` bytes of device
    /// memory that stays mapped until the stream is synchronized, and the
    /// owning context must be current on this thread.
    pub unsafe fn copy_to_host_async(
        &self,
        src: sys::CUdeviceptr,
        copy: PitchedCopy,
        dst: &mut [u8],
    ) -> Result<(), CudaError> {
        copy.validate(copy.src_extent(), dst.len())?;

        let mut params: sys::CUDA_MEMCPY2D = std::mem::zeroed();
        params.srcMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
        params.srcDevice = src;
        params.srcPitch = copy.src_pitch;
        params.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
        params.dstHost = dst.as_mut_ptr() as *mut c_void;
        params.dstPitch = copy.dst_pitch;
        params.WidthInBytes = copy.width_bytes;
        params.Height = copy.rows;

        sys::cuMemcpy2DAsync_v2(&params, self.raw())
            .result()
            .map_err(|source| CudaError::Call {
                call: "cuMemcpy2DAsync",
                source,
            })?;
        trace!(
            width_bytes = copy.width_bytes,
            rows = copy.rows,
            src_pitch = copy.src_pitch,
            "Queued device-to-host copy"
        );
        Ok(())
    }

    /// Block until all queued copies complete.
    pub fn synchronize(&self) -> Result<(), CudaError> {
        // SAFETY: the stream handle is owned by `self.inner`.
        unsafe { sys::cuStreamSynchronize(self.raw()) }
            .result()
            .map_err(|source| CudaError::Call {
                call: "cuStreamSynchronize",
                source,
            })
    }
}
