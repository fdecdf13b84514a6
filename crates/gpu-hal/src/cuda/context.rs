//! CUDA context management: wraps cudarc `CudaContext` with device
//! enumeration and explicit push/pop of the context on the calling thread.

use std::sync::Arc;

use cudarc::driver::safe::CudaContext;
use cudarc::driver::sys;
use tracing::{debug, info, warn};

use super::error::CudaError;

/// Number of CUDA devices visible to the driver.
pub fn device_count() -> Result<usize, CudaError> {
    let count = CudaContext::device_count().map_err(|e| CudaError::DeviceInit {
        ordinal: 0,
        reason: format!("Failed to get device count: {e}"),
    })?;
    Ok(count.max(0) as usize)
}

/// Enumerate device names in ordinal order.
pub fn enumerate_devices() -> Result<Vec<String>, CudaError> {
    let count = device_count()?;
    let mut names = Vec::with_capacity(count);
    for ordinal in 0..count {
        let ctx = CudaContext::new(ordinal).map_err(|e| CudaError::DeviceInit {
            ordinal,
            reason: format!("{e}"),
        })?;
        names.push(ctx.name()?);
    }
    info!(count = names.len(), "Enumerated CUDA devices");
    Ok(names)
}

/// A CUDA device with its primary context retained for the lifetime of
/// this value.
#[derive(Debug)]
pub struct CudaDevice {
    ctx: Arc<CudaContext>,
    ordinal: usize,
    name: String,
}

impl CudaDevice {
    /// Open the device at `ordinal`.
    pub fn open(ordinal: usize) -> Result<Self, CudaError> {
        let count = device_count()?;
        if count == 0 {
            return Err(CudaError::NoDevices);
        }
        if ordinal >= count {
            return Err(CudaError::InvalidOrdinal { ordinal, count });
        }

        let ctx = CudaContext::new(ordinal).map_err(|e| CudaError::DeviceInit {
            ordinal,
            reason: format!("{e}"),
        })?;
        let name = ctx.name().map_err(|e| CudaError::DeviceInit {
            ordinal,
            reason: format!("Failed to get device name: {e}"),
        })?;

        info!(device = %name, ordinal, "CUDA device opened");
        Ok(Self { ctx, ordinal, name })
    }

    pub fn context(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    /// Raw context handle, for APIs such as nvcuvid that take one.
    pub fn raw_context(&self) -> sys::CUcontext {
        self.ctx.cu_ctx()
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make this context current on the calling thread. Must be balanced
    /// by [`pop_current`].
    pub fn push_current(&self) -> Result<(), CudaError> {
        // SAFETY: the context handle is owned by `self.ctx` and stays valid
        // while `self` lives.
        unsafe { sys::cuCtxPushCurrent_v2(self.raw_context()) }
            .result()
            .map_err(|source| CudaError::Call {
                call: "cuCtxPushCurrent",
                source,
            })
    }

    /// Make this context current until the guard is popped or dropped.
    pub fn push(&self) -> Result<ContextGuard<'_>, CudaError> {
        self.push_current()?;
        Ok(ContextGuard {
            device: self,
            popped: false,
        })
    }
}

/// Restores the previously current context when popped.
#[derive(Debug)]
pub struct ContextGuard<'a> {
    device: &'a CudaDevice,
    popped: bool,
}

impl ContextGuard<'_> {
    /// Pop the context, reporting failure.
    pub fn pop(mut self) -> Result<(), CudaError> {
        self.popped = true;
        pop_current()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            if let Err(e) = pop_current() {
                warn!(device = %self.device.name, error = %e, "Failed to pop CUDA context in Drop");
            }
        }
    }
}

/// Restore whichever context was current before the matching push.
pub fn pop_current() -> Result<(), CudaError> {
    let mut previous: sys::CUcontext = std::ptr::null_mut();
    // SAFETY: cuCtxPopCurrent writes the popped handle into a valid pointer.
    unsafe { sys::cuCtxPopCurrent_v2(&mut previous) }
        .result()
        .map_err(|source| CudaError::Call {
            call: "cuCtxPopCurrent",
            source,
        })?;
    debug!("CUDA context popped");
    Ok(())
}
