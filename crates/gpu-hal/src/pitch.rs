//! Geometry of 2D pitched copies between row-strided buffers.
//!
//! A [`PitchedCopy`] describes the same rectangle the CUDA driver's
//! `cuMemcpy2D` moves: `rows` rows of `width_bytes` bytes, read every
//! `src_pitch` bytes and written every `dst_pitch` bytes. The host-side
//! [`PitchedCopy::copy_host`] is the reference implementation used when both
//! ends are in host memory.

use thiserror::Error;

/// Errors from validating a pitched copy against its buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CopyError {
    #[error("Row width {width_bytes} exceeds {side} pitch {pitch}")]
    WidthExceedsPitch {
        side: &'static str,
        width_bytes: usize,
        pitch: usize,
    },

    #[error("{side} buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        side: &'static str,
        needed: usize,
        got: usize,
    },
}

/// A 2D rectangle copy between two pitched buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PitchedCopy {
    pub width_bytes: usize,
    pub rows: usize,
    pub src_pitch: usize,
    pub dst_pitch: usize,
}

impl PitchedCopy {
    pub fn new(width_bytes: usize, rows: usize, src_pitch: usize, dst_pitch: usize) -> Self {
        Self {
            width_bytes,
            rows,
            src_pitch,
            dst_pitch,
        }
    }

    /// Bytes the copy touches in the source, from its first byte.
    pub fn src_extent(&self) -> usize {
        extent(self.rows, self.src_pitch, self.width_bytes)
    }

    /// Bytes the copy touches in the destination, from its first byte.
    pub fn dst_extent(&self) -> usize {
        extent(self.rows, self.dst_pitch, self.width_bytes)
    }

    /// Check pitches and buffer sizes before any bytes move.
    pub fn validate(&self, src_len: usize, dst_len: usize) -> Result<(), CopyError> {
        if self.width_bytes > self.src_pitch {
            return Err(CopyError::WidthExceedsPitch {
                side: "source",
                width_bytes: self.width_bytes,
                pitch: self.src_pitch,
            });
        }
        if self.width_bytes > self.dst_pitch {
            return Err(CopyError::WidthExceedsPitch {
                side: "destination",
                width_bytes: self.width_bytes,
                pitch: self.dst_pitch,
            });
        }
        if src_len < self.src_extent() {
            return Err(CopyError::BufferTooSmall {
                side: "source",
                needed: self.src_extent(),
                got: src_len,
            });
        }
        if dst_len < self.dst_extent() {
            return Err(CopyError::BufferTooSmall {
                side: "destination",
                needed: self.dst_extent(),
                got: dst_len,
            });
        }
        Ok(())
    }

    /// Copy between two host buffers.
    pub fn copy_host(&self, src: &[u8], dst: &mut [u8]) -> Result<(), CopyError> {
        self.validate(src.len(), dst.len())?;
        if self.width_bytes == 0 {
            return Ok(());
        }
        for (src_row, dst_row) in src
            .chunks(self.src_pitch)
            .zip(dst.chunks_mut(self.dst_pitch))
            .take(self.rows)
        {
            dst_row[..self.width_bytes].copy_from_slice(&src_row[..self.width_bytes]);
        }
        Ok(())
    }
}

fn extent(rows: usize, pitch: usize, width_bytes: usize) -> usize {
    if rows == 0 || width_bytes == 0 {
        0
    } else {
        (rows - 1) * pitch + width_bytes
    }
}
