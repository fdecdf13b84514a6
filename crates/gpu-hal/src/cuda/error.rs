//! CUDA-specific error types wrapping cudarc driver errors.

use thiserror::Error;

use crate::pitch::CopyError;

/// CUDA backend error type.
#[derive(Error, Debug)]
pub enum CudaError {
    /// CUDA driver error from cudarc.
    #[error("CUDA driver error: {0}")]
    Driver(#[from] cudarc::driver::DriverError),

    /// A named raw driver entry point failed.
    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: cudarc::driver::DriverError,
    },

    /// Device initialization failed.
    #[error("CUDA device init failed (ordinal {ordinal}): {reason}")]
    DeviceInit { ordinal: usize, reason: String },

    /// No CUDA devices found.
    #[error("No CUDA devices found")]
    NoDevices,

    /// Invalid device ordinal.
    #[error("Invalid CUDA device ordinal {ordinal} (found {count} devices)")]
    InvalidOrdinal { ordinal: usize, count: usize },

    /// Copy geometry does not fit the host buffer.
    #[error("CUDA memory transfer rejected: {0}")]
    Copy(#[from] CopyError),
}

impl From<CudaError> for nvb_common::HwCallError {
    fn from(err: CudaError) -> Self {
        match err {
            CudaError::Call { call, source } => {
                nvb_common::HwCallError::new(call, format!("{source:?}"))
            }
            CudaError::Driver(e) => nvb_common::HwCallError::new("cuda", format!("{e:?}")),
            CudaError::Copy(e) => nvb_common::HwCallError::new("cuMemcpy2DAsync", e.to_string()),
            other => nvb_common::HwCallError::new("cuInit", other.to_string()),
        }
    }
}
