//! Negotiated stream format and the rules for changing it.
//!
//! [`NegotiatedFormat`] is a value: every accepted sequence event produces a
//! whole new one. [`NegotiatedFormat::plan_update`] decides, without
//! touching hardware, what a later sequence event requires.

use nvb_common::{ChromaFormat, DecodeError, Rect, Resolution, SessionConfig, VideoCodec};

use crate::engine::{
    DecoderCreateParams, DeinterlaceMode, ReconfigureParams, SurfaceFormat, VideoFormat,
};

/// Output surfaces the decoder may have mapped at once.
const OUTPUT_SURFACES: u32 = 2;

/// Requested crop and scale of decoded pictures.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputGeometry {
    pub crop: Option<Rect>,
    pub resize: Option<Resolution>,
}

impl OutputGeometry {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            crop: config.crop,
            resize: config.resize,
        }
    }

    /// No crop and no resize: the decoder outputs its full surface.
    pub fn is_passthrough(&self) -> bool {
        self.crop.is_none() && self.resize.is_none()
    }

    fn resolve(&self, format: &VideoFormat) -> ResolvedGeometry {
        if self.is_passthrough() {
            return ResolvedGeometry {
                display_area: Rect::default(),
                target: format.coded,
                output: format.display_area.size(),
            };
        }
        let mut display_area = format.display_area;
        let mut output = format.display_area.size();
        if let Some(size) = self.resize {
            output = size;
        }
        if let Some(crop) = self.crop {
            display_area = crop;
            output = crop.size();
        }
        ResolvedGeometry {
            display_area,
            target: output,
            output,
        }
    }
}

struct ResolvedGeometry {
    display_area: Rect,
    target: Resolution,
    output: Resolution,
}

/// Everything agreed with the hardware for the current sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub codec: VideoCodec,
    pub chroma: ChromaFormat,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub coded: Resolution,
    /// Display area the stream itself declared.
    pub stream_display_area: Rect,
    /// Area the decoder was told to decode; all-zero means the full frame.
    pub display_area: Rect,
    /// Decoder surface size.
    pub target: Resolution,
    /// Size of pictures handed to the consumer.
    pub output: Resolution,
    /// Largest coded size the decoder instance accepts.
    pub max: Resolution,
    pub decode_surfaces: u32,
    pub geometry: OutputGeometry,
}

/// What a sequence event on an already-configured decoder requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatUpdate {
    /// Growth the driver handles internally; nothing changes.
    DriverAbsorbed,
    /// Bookkeeping only; no hardware call.
    Local(NegotiatedFormat),
    /// Reconfigure the decoder, then adopt `next`.
    Reconfigure {
        params: ReconfigureParams,
        next: NegotiatedFormat,
    },
}

impl NegotiatedFormat {
    /// Format for the first sequence of a session.
    pub fn initial(
        format: &VideoFormat,
        geometry: OutputGeometry,
        max_hint: Option<Resolution>,
        decode_surfaces: u32,
    ) -> Self {
        let resolved = geometry.resolve(format);
        Self {
            codec: format.codec,
            chroma: format.chroma,
            bit_depth_luma: format.bit_depth_luma,
            bit_depth_chroma: format.bit_depth_chroma,
            coded: format.coded,
            stream_display_area: format.display_area,
            display_area: resolved.display_area,
            target: resolved.target,
            output: resolved.output,
            max: max_hint.unwrap_or_default().max(format.coded),
            decode_surfaces,
            geometry,
        }
    }

    pub fn create_params(&self) -> DecoderCreateParams {
        DecoderCreateParams {
            codec: self.codec,
            chroma: self.chroma,
            bit_depth_luma: self.bit_depth_luma,
            coded: self.coded,
            max: self.max,
            decode_surfaces: self.decode_surfaces,
            output_surfaces: OUTPUT_SURFACES,
            surface_format: SurfaceFormat::for_bit_depth(self.bit_depth_luma),
            deinterlace: DeinterlaceMode::Weave,
            display_area: self.display_area,
            target: self.target,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        if self.bit_depth_luma > 8 {
            2
        } else {
            1
        }
    }

    /// Bit depth and chroma layout are fixed for the life of a session.
    pub fn check_compatible(&self, format: &VideoFormat) -> Result<(), DecodeError> {
        if format.bit_depth_luma != self.bit_depth_luma
            || format.bit_depth_chroma != self.bit_depth_chroma
        {
            return Err(DecodeError::UnsupportedReconfiguration(format!(
                "bit depth changed from {}/{} to {}/{}",
                self.bit_depth_luma,
                self.bit_depth_chroma,
                format.bit_depth_luma,
                format.bit_depth_chroma
            )));
        }
        if format.chroma != self.chroma {
            return Err(DecodeError::UnsupportedReconfiguration(format!(
                "chroma format changed from {} to {}",
                self.chroma.display_name(),
                format.chroma.display_name()
            )));
        }
        Ok(())
    }

    /// Decide how to follow a new sequence on the existing decoder.
    ///
    /// `pending` is an externally requested geometry not yet applied.
    pub fn plan_update(
        &self,
        format: &VideoFormat,
        pending: Option<OutputGeometry>,
        decode_surfaces: u32,
    ) -> Result<FormatUpdate, DecodeError> {
        self.check_compatible(format)?;

        if !format.coded.fits_within(self.max) {
            if self.codec.driver_handles_growth() && pending.is_none() {
                return Ok(FormatUpdate::DriverAbsorbed);
            }
            return Err(DecodeError::ResolutionTooLarge {
                requested: format.coded,
                limit: self.max,
            });
        }

        let coded_changed = format.coded != self.coded;
        let display_changed = format.display_area != self.stream_display_area;

        if !coded_changed && pending.is_none() {
            let mut next = self.clone();
            if display_changed {
                next.stream_display_area = format.display_area;
                if self.geometry.is_passthrough() {
                    next.output = format.display_area.size();
                }
            }
            return Ok(FormatUpdate::Local(next));
        }

        let mut next = self.clone();
        next.coded = format.coded;
        next.stream_display_area = format.display_area;
        next.decode_surfaces = decode_surfaces;
        // Without a pending request the decoder keeps its surface size and
        // scales the new coded frame into it.
        if let Some(geometry) = pending {
            let resolved = geometry.resolve(format);
            next.display_area = resolved.display_area;
            next.target = resolved.target;
            next.output = resolved.output;
            next.geometry = geometry;
        }

        let params = ReconfigureParams {
            coded: next.coded,
            target: next.target,
            display_area: next.display_area,
            decode_surfaces,
        };
        Ok(FormatUpdate::Reconfigure { params, next })
    }
}
