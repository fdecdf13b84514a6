//! Hardware engine seams.
//!
//! The decode session talks to the hardware only through these traits:
//!
//! - [`DeviceProvider`] enumerates devices and opens one.
//! - [`HwDevice`] answers capability queries and creates decoders and parsers.
//! - [`VideoParser`] consumes compressed packets and fires [`ParserEvents`]
//!   synchronously from inside [`VideoParser::parse`].
//! - [`HwVideoDecoder`] decodes, maps, and reads back pictures.
//!
//! The NVDEC implementation lives in [`crate::nvdec`]; tests drive the
//! session through scripted fakes.

use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use nvb_common::{ChromaFormat, HwCallError, ParserTicks, Rect, Resolution, VideoCodec};
use nvb_gpu_hal::PitchedCopy;

// ---------------------------------------------------------------------------
// Values exchanged with the engine
// ---------------------------------------------------------------------------

/// Stream parameters reported by a sequence event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub codec: VideoCodec,
    pub chroma: ChromaFormat,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub coded: Resolution,
    /// Visible area inside the coded frame.
    pub display_area: Rect,
    pub progressive: bool,
    /// Minimum decode surfaces the parser needs.
    pub min_decode_surfaces: u32,
}

impl VideoFormat {
    /// 8-bit 4:2:0 progressive stream whose display area covers the coded frame.
    pub fn new(codec: VideoCodec, coded: Resolution) -> Self {
        Self {
            codec,
            chroma: ChromaFormat::Yuv420,
            bit_depth_luma: 8,
            bit_depth_chroma: 8,
            coded,
            display_area: Rect::from_size(coded),
            progressive: true,
            min_decode_surfaces: 1,
        }
    }

    pub fn with_display_area(mut self, area: Rect) -> Self {
        self.display_area = area;
        self
    }

    pub fn with_bit_depth(mut self, luma: u8, chroma: u8) -> Self {
        self.bit_depth_luma = luma;
        self.bit_depth_chroma = chroma;
        self
    }

    pub fn with_chroma(mut self, chroma: ChromaFormat) -> Self {
        self.chroma = chroma;
        self
    }

    /// Bytes per decoded sample: 1 for 8-bit, 2 for 16-bit containers.
    pub fn bytes_per_sample(&self) -> usize {
        if self.bit_depth_luma > 8 {
            2
        } else {
            1
        }
    }
}

/// Decoder limits for one codec/chroma/bit-depth triple.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderCaps {
    pub supported: bool,
    pub max: Resolution,
    pub max_macroblocks: u64,
    pub min: Resolution,
}

/// Surface layout the decoder writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// 8-bit luma plane followed by an interleaved UV plane.
    Nv12,
    /// 16-bit variant of NV12.
    P016,
}

impl SurfaceFormat {
    pub fn for_bit_depth(bit_depth: u8) -> Self {
        if bit_depth > 8 {
            Self::P016
        } else {
            Self::Nv12
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeinterlaceMode {
    Weave,
    Bob,
    Adaptive,
}

/// Everything needed to create a hardware decoder instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderCreateParams {
    pub codec: VideoCodec,
    pub chroma: ChromaFormat,
    pub bit_depth_luma: u8,
    pub coded: Resolution,
    /// Largest coded size later reconfigures may request.
    pub max: Resolution,
    pub decode_surfaces: u32,
    pub output_surfaces: u32,
    pub surface_format: SurfaceFormat,
    pub deinterlace: DeinterlaceMode,
    /// Source area to decode; all-zero means the whole frame.
    pub display_area: Rect,
    /// Post-processed surface size.
    pub target: Resolution,
}

/// In-place reconfiguration of an existing decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconfigureParams {
    pub coded: Resolution,
    pub target: Resolution,
    pub display_area: Rect,
    pub decode_surfaces: u32,
}

/// Parameters for creating a bitstream parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserParams {
    pub codec: VideoCodec,
    /// Frames the parser may hold back for reordering (0 = lowest latency).
    pub max_display_delay: u32,
}

/// Opaque per-picture parameters, handed from the parser to the decoder
/// unchanged.
pub struct PictureParams {
    picture_index: i32,
    raw: *mut c_void,
}

impl PictureParams {
    /// Parameters that carry only a picture index.
    pub fn new(picture_index: i32) -> Self {
        Self {
            picture_index,
            raw: ptr::null_mut(),
        }
    }

    /// Wrap the parser's native parameter block.
    ///
    /// # Safety
    ///
    /// `raw` must stay valid for as long as this value is used, which is the
    /// duration of the decode event that produced it.
    pub unsafe fn from_raw(picture_index: i32, raw: *mut c_void) -> Self {
        Self { picture_index, raw }
    }

    pub fn picture_index(&self) -> i32 {
        self.picture_index
    }

    /// Native parameter block, or null.
    pub fn as_raw(&mut self) -> *mut c_void {
        self.raw
    }
}

impl fmt::Debug for PictureParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureParams")
            .field("picture_index", &self.picture_index)
            .field("has_raw", &!self.raw.is_null())
            .finish()
    }
}

/// A picture the parser declared ready for display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DisplayInfo {
    pub picture_index: i32,
    /// Echo of the originating packet's parser-clock timestamp.
    pub timestamp: ParserTicks,
    pub progressive: bool,
    pub top_field_first: bool,
    /// Fields to repeat after the frame; negative marks an unpaired field.
    pub repeat_first_field: i32,
}

impl DisplayInfo {
    pub fn progressive(picture_index: i32, timestamp: ParserTicks) -> Self {
        Self {
            picture_index,
            timestamp,
            progressive: true,
            top_field_first: false,
            repeat_first_field: 0,
        }
    }
}

/// A decoded surface mapped into device memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MappedSurface {
    pub device_ptr: u64,
    /// Row pitch in bytes.
    pub pitch: usize,
    pub picture_index: i32,
}

/// Hardware decode result for one picture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    InProgress,
    Success,
    Error,
    /// Errors were concealed by the decoder.
    Concealed,
    Unknown(i32),
}

impl DecodeStatus {
    pub fn is_damaged(self) -> bool {
        matches!(self, Self::Error | Self::Concealed)
    }
}

/// Compressed data handed to the parser.
#[derive(Copy, Clone, Debug)]
pub struct SourcePacket<'a> {
    pub data: &'a [u8],
    pub timestamp: Option<ParserTicks>,
    pub end_of_stream: bool,
}

impl<'a> SourcePacket<'a> {
    pub fn new(data: &'a [u8], timestamp: ParserTicks) -> Self {
        Self {
            data,
            timestamp: Some(timestamp),
            end_of_stream: false,
        }
    }

    /// Empty packet asking the parser to emit every buffered picture.
    pub fn end_of_stream() -> SourcePacket<'static> {
        SourcePacket {
            data: &[],
            timestamp: None,
            end_of_stream: true,
        }
    }
}

/// Reply to a sequence event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SequenceReply {
    /// Reject the sequence; the parser stops delivering pictures.
    Failed,
    /// Accept without changing the parser's surface count.
    Accepted,
    /// Accept and tell the parser how many decode surfaces exist.
    Surfaces(u32),
}

impl SequenceReply {
    /// Integer the native parser expects back from its sequence callback.
    pub fn code(self) -> i32 {
        match self {
            Self::Failed => 0,
            Self::Accepted => 1,
            Self::Surfaces(n) => n.min(i32::MAX as u32) as i32,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Receiver for the parser's three events.
///
/// Implementations must tolerate being invoked re-entrantly from inside
/// [`VideoParser::parse`] on the submitting thread.
pub trait ParserEvents: Send + Sync {
    fn on_sequence(&self, format: &VideoFormat) -> SequenceReply;

    /// Returns `false` to abort the picture.
    fn on_decode(&self, params: &mut PictureParams) -> bool;

    /// `None` signals end of stream.
    fn on_display(&self, info: Option<&DisplayInfo>) -> bool;
}

/// Bitstream parser bound to one [`ParserEvents`] receiver.
pub trait VideoParser: Send {
    fn parse(&mut self, packet: &SourcePacket<'_>) -> Result<(), HwCallError>;
}

/// One hardware decoder instance.
pub trait HwVideoDecoder: Send + Sync {
    fn decode_picture(&self, params: &mut PictureParams) -> Result<(), HwCallError>;

    fn reconfigure(&self, params: &ReconfigureParams) -> Result<(), HwCallError>;

    fn decode_status(&self, picture_index: i32) -> Result<DecodeStatus, HwCallError>;

    fn map(&self, info: &DisplayInfo) -> Result<MappedSurface, HwCallError>;

    fn unmap(&self, surface: MappedSurface) -> Result<(), HwCallError>;

    /// Make the decoder's device context current on this thread.
    fn push_context(&self) -> Result<(), HwCallError>;

    fn pop_context(&self) -> Result<(), HwCallError>;

    /// Queue a copy of `copy` from the surface, starting `row_offset`
    /// pitched rows past its base address. Completes on [`Self::synchronize`].
    fn copy_to_host(
        &self,
        surface: &MappedSurface,
        row_offset: usize,
        copy: PitchedCopy,
        dst: &mut [u8],
    ) -> Result<(), HwCallError>;

    fn synchronize(&self) -> Result<(), HwCallError>;
}

/// An opened decode device.
pub trait HwDevice: Send + Sync {
    fn ordinal(&self) -> usize;

    fn name(&self) -> &str;

    fn decoder_caps(
        &self,
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u8,
    ) -> Result<DecoderCaps, HwCallError>;

    fn create_decoder(
        &self,
        params: &DecoderCreateParams,
    ) -> Result<Arc<dyn HwVideoDecoder>, HwCallError>;

    fn create_parser(
        &self,
        params: &ParserParams,
        events: Arc<dyn ParserEvents>,
    ) -> Result<Box<dyn VideoParser>, HwCallError>;
}

/// Device enumeration for the session factory.
pub trait DeviceProvider: Send + Sync {
    fn device_count(&self) -> Result<usize, HwCallError>;

    fn device_name(&self, ordinal: usize) -> Result<String, HwCallError>;

    fn open(&self, ordinal: usize) -> Result<Arc<dyn HwDevice>, HwCallError>;

    /// Codecs this provider can build sessions for.
    fn supports_codec(&self, codec: VideoCodec) -> bool {
        let _ = codec;
        true
    }
}

/// Run `f` with the decoder's context current, popping it even when `f`
/// fails. The first error wins.
pub fn with_context<R>(
    decoder: &dyn HwVideoDecoder,
    f: impl FnOnce() -> Result<R, HwCallError>,
) -> Result<R, HwCallError> {
    decoder.push_context()?;
    let result = f();
    let popped = decoder.pop_context();
    let value = result?;
    popped?;
    Ok(value)
}
