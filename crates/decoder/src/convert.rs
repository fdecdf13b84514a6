//! NV12 surface → planar YUV 4:2:0 conversion.
//!
//! Luma is already planar and is copied straight from the mapped surface
//! into the picture's Y plane. The interleaved UV plane is first read back
//! into a host scratch buffer with the surface's own pitch, then split into
//! the U and V planes on the host.

use thiserror::Error;
use tracing::debug;

use nvb_common::{HwCallError, Resolution};
use nvb_gpu_hal::{CopyError, PitchedCopy};

use crate::engine::{HwVideoDecoder, MappedSurface};
use crate::picture::{chroma_size, PictureBuffer};

/// Errors from converting a mapped surface into a picture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error(transparent)]
    Hardware(#[from] HwCallError),

    #[error("Surface copy geometry invalid: {0}")]
    Copy(#[from] CopyError),

    #[error("{plane} plane too small: need {needed} bytes, got {got}")]
    PlaneTooSmall {
        plane: &'static str,
        needed: usize,
        got: usize,
    },
}

impl From<ConvertError> for HwCallError {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::Hardware(e) => e,
            other => HwCallError::new("plane conversion", other.to_string()),
        }
    }
}

/// How the picture sits in the decoded surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SurfaceLayout {
    /// Output picture size.
    pub output: Resolution,
    /// Height of the decoded surface; the UV plane starts this many rows in.
    pub surface_height: u32,
    pub bytes_per_sample: usize,
}

/// Host staging buffer for the interleaved chroma plane.
#[derive(Debug, Default)]
pub struct ChromaScratch {
    buf: Vec<u8>,
    pitch: usize,
    height: usize,
}

impl ChromaScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reallocate to `pitch × height` bytes if either changed since the last
    /// call. Returns `true` when a reallocation happened.
    pub fn ensure(&mut self, pitch: usize, height: usize) -> bool {
        if self.pitch == pitch && self.height == height && !self.buf.is_empty() {
            return false;
        }
        self.buf = vec![0; pitch * height];
        self.pitch = pitch;
        self.height = height;
        true
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Copy a mapped surface into `picture`.
///
/// The caller must hold the decoder's device context current for the whole
/// call (see [`crate::engine::with_context`]).
pub fn copy_surface_to_picture(
    decoder: &dyn HwVideoDecoder,
    surface: &MappedSurface,
    layout: SurfaceLayout,
    scratch: &mut ChromaScratch,
    picture: &mut PictureBuffer,
) -> Result<(), ConvertError> {
    let width = layout.output.width as usize;
    let height = layout.output.height as usize;
    let bps = layout.bytes_per_sample;
    let chroma = chroma_size(layout.output);
    let chroma_rows = chroma.height as usize;
    let pairs = chroma.width as usize;
    let pitch = surface.pitch;

    if scratch.ensure(pitch, height) {
        debug!(pitch, height, "Reallocated chroma scratch buffer");
    }

    let planes = picture.planes_mut();

    let luma = PitchedCopy::new(width * bps, height, pitch, planes.y_stride);
    decoder.copy_to_host(surface, 0, luma, planes.y)?;

    let uv = PitchedCopy::new(pairs * 2 * bps, chroma_rows, pitch, pitch);
    decoder.copy_to_host(
        surface,
        layout.surface_height as usize,
        uv,
        scratch.as_mut_slice(),
    )?;

    decoder.synchronize()?;

    deinterleave_chroma(
        scratch.as_slice(),
        pitch,
        pairs,
        chroma_rows,
        bps,
        planes.u,
        planes.uv_stride,
        planes.v,
        planes.uv_stride,
    )
}

/// Split `rows` rows of interleaved UV pairs into separate U and V planes.
///
/// Row `i` of `src` holds `U0 V0 U1 V1 ...` (each sample `bytes_per_sample`
/// wide); afterwards `u` row `i` holds `U0 U1 ...` and `v` row `i` holds
/// `V0 V1 ...`. All `pairs` pairs of every row are converted.
#[allow(clippy::too_many_arguments)]
pub fn deinterleave_chroma(
    src: &[u8],
    src_pitch: usize,
    pairs: usize,
    rows: usize,
    bytes_per_sample: usize,
    u: &mut [u8],
    u_stride: usize,
    v: &mut [u8],
    v_stride: usize,
) -> Result<(), ConvertError> {
    let pair_bytes = 2 * bytes_per_sample;
    let plane_row = pairs * bytes_per_sample;
    if pairs == 0 || rows == 0 {
        return Ok(());
    }

    PitchedCopy::new(pairs * pair_bytes, rows, src_pitch, src_pitch).validate(src.len(), usize::MAX)?;
    check_plane("U", u.len(), rows, u_stride, plane_row)?;
    check_plane("V", v.len(), rows, v_stride, plane_row)?;

    let rows_iter = src
        .chunks(src_pitch)
        .zip(u.chunks_mut(u_stride))
        .zip(v.chunks_mut(v_stride))
        .take(rows);

    for ((src_row, u_row), v_row) in rows_iter {
        let interleaved = &src_row[..pairs * pair_bytes];
        let u_row = &mut u_row[..plane_row];
        let v_row = &mut v_row[..plane_row];
        for ((pair, u_sample), v_sample) in interleaved
            .chunks_exact(pair_bytes)
            .zip(u_row.chunks_exact_mut(bytes_per_sample))
            .zip(v_row.chunks_exact_mut(bytes_per_sample))
        {
            let (cb, cr) = pair.split_at(bytes_per_sample);
            u_sample.copy_from_slice(cb);
            v_sample.copy_from_slice(cr);
        }
    }
    Ok(())
}

fn check_plane(
    plane: &'static str,
    len: usize,
    rows: usize,
    stride: usize,
    row_bytes: usize,
) -> Result<(), ConvertError> {
    if row_bytes > stride {
        return Err(ConvertError::Copy(CopyError::WidthExceedsPitch {
            side: plane,
            width_bytes: row_bytes,
            pitch: stride,
        }));
    }
    let needed = (rows - 1) * stride + row_bytes;
    if len < needed {
        return Err(ConvertError::PlaneTooSmall {
            plane,
            needed,
            got: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── De-interleave ──

    #[test]
    fn splits_interleaved_row_into_u_and_v() {
        let src = [10, 20, 11, 21, 12, 22, 13, 23];
        let mut u = [0u8; 4];
        let mut v = [0u8; 4];
        deinterleave_chroma(&src, 8, 4, 1, 1, &mut u, 4, &mut v, 4).unwrap();
        assert_eq!(u, [10, 11, 12, 13]);
        assert_eq!(v, [20, 21, 22, 23]);
    }

    #[test]
    fn last_pair_of_each_row_is_converted() {
        // Two rows, source pitch 6 (one padding pair), three pairs per row.
        let src = [1, 2, 3, 4, 5, 6, 0xEE, 0xEE, 7, 8, 9, 10, 11, 12];
        let mut u = [0u8; 6];
        let mut v = [0u8; 6];
        deinterleave_chroma(&src, 8, 3, 2, 1, &mut u, 3, &mut v, 3).unwrap();
        assert_eq!(u, [1, 3, 5, 7, 9, 11]);
        assert_eq!(v, [2, 4, 6, 8, 10, 12]);
    }

    #[test]
    fn sixteen_bit_samples_move_as_units() {
        let src = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut u = [0u8; 4];
        let mut v = [0u8; 4];
        deinterleave_chroma(&src, 8, 2, 1, 2, &mut u, 4, &mut v, 4).unwrap();
        assert_eq!(u, [0x01, 0x02, 0x05, 0x06]);
        assert_eq!(v, [0x03, 0x04, 0x07, 0x08]);
    }

    #[test]
    fn short_u_plane_rejected() {
        let src = [0u8; 8];
        let mut u = [0u8; 3];
        let mut v = [0u8; 4];
        let err = deinterleave_chroma(&src, 8, 4, 1, 1, &mut u, 4, &mut v, 4).unwrap_err();
        assert_eq!(
            err,
            ConvertError::PlaneTooSmall {
                plane: "U",
                needed: 4,
                got: 3
            }
        );
    }

    #[test]
    fn short_source_rejected() {
        let src = [0u8; 6];
        let mut u = [0u8; 4];
        let mut v = [0u8; 4];
        let err = deinterleave_chroma(&src, 8, 4, 1, 1, &mut u, 4, &mut v, 4).unwrap_err();
        assert!(matches!(err, ConvertError::Copy(CopyError::BufferTooSmall { .. })));
    }

    // ── Scratch buffer ──

    #[test]
    fn scratch_reallocates_only_on_geometry_change() {
        let mut scratch = ChromaScratch::new();
        assert!(scratch.ensure(256, 64));
        assert_eq!(scratch.len(), 256 * 64);
        assert!(!scratch.ensure(256, 64));
        assert!(scratch.ensure(512, 64));
        assert!(scratch.ensure(512, 32));
        assert_eq!(scratch.len(), 512 * 32);
        assert_eq!(scratch.pitch(), 512);
    }
}
