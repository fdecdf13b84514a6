//! Raw FFI bindings for NVIDIA's CUVID (nvcuvid) library.
//!
//! These bindings are loaded dynamically at runtime via `libloading`.
//! They cover decoder capability queries, decoder creation and in-place
//! reconfiguration, decode status, frame mapping, and the video parser.
//!
//! Struct layouts follow `cuviddec.h` / `nvcuvid.h` from the Video Codec SDK
//! 12.x. Fields declared `unsigned long` in C are [`c_ulong`] here, which is
//! 32-bit on Windows and 64-bit on Linux.

use std::ffi::c_void;
use std::os::raw::c_ulong;

use libloading::Library;
use tracing::{debug, info};

use nvb_common::{ChromaFormat, HwCallError, VideoCodec};

// ---------------------------------------------------------------------------
// Handles and result codes
// ---------------------------------------------------------------------------

/// CUDA context handle (opaque pointer).
pub type CUcontext = *mut c_void;

/// CUDA stream handle (opaque pointer).
pub type CUstream = *mut c_void;

/// CUDA device pointer (GPU virtual address).
pub type CUdeviceptr = u64;

/// CUVID API return type; 0 means success.
pub type CUresult = i32;

pub const CUDA_SUCCESS: CUresult = 0;

/// Opaque NVDEC decoder handle.
pub type CUvideodecoder = *mut c_void;

/// Opaque CUVID video parser handle.
pub type CUvideoparser = *mut c_void;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Matches `cudaVideoCodec` from `cuviddec.h`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoCodec {
    Mpeg1 = 0,
    Mpeg2 = 1,
    Mpeg4 = 2,
    Vc1 = 3,
    H264 = 4,
    Jpeg = 5,
    H264Svc = 6,
    H264Mvc = 7,
    Hevc = 8,
    Vp8 = 9,
    Vp9 = 10,
    Av1 = 11,
}

impl CudaVideoCodec {
    pub fn from_common(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::Mpeg2 => Self::Mpeg2,
            VideoCodec::Mpeg4 => Self::Mpeg4,
            VideoCodec::Vc1 => Self::Vc1,
            VideoCodec::H264 => Self::H264,
            VideoCodec::H265 => Self::Hevc,
            VideoCodec::Mjpeg => Self::Jpeg,
            VideoCodec::Vp8 => Self::Vp8,
            VideoCodec::Vp9 => Self::Vp9,
            VideoCodec::Av1 => Self::Av1,
        }
    }

    /// Decode the raw value the parser reports in `CUVIDEOFORMAT::codec`.
    pub fn common_from_raw(raw: i32) -> Option<VideoCodec> {
        match raw {
            1 => Some(VideoCodec::Mpeg2),
            2 => Some(VideoCodec::Mpeg4),
            3 => Some(VideoCodec::Vc1),
            4 => Some(VideoCodec::H264),
            5 => Some(VideoCodec::Mjpeg),
            8 => Some(VideoCodec::H265),
            9 => Some(VideoCodec::Vp8),
            10 => Some(VideoCodec::Vp9),
            11 => Some(VideoCodec::Av1),
            _ => None,
        }
    }
}

/// Matches `cudaVideoChromaFormat`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoChromaFormat {
    Monochrome = 0,
    Yuv420 = 1,
    Yuv422 = 2,
    Yuv444 = 3,
}

impl CudaVideoChromaFormat {
    pub fn from_common(chroma: ChromaFormat) -> Self {
        match chroma {
            ChromaFormat::Monochrome => Self::Monochrome,
            ChromaFormat::Yuv420 => Self::Yuv420,
            ChromaFormat::Yuv422 => Self::Yuv422,
            ChromaFormat::Yuv444 => Self::Yuv444,
        }
    }

    pub fn common_from_raw(raw: i32) -> Option<ChromaFormat> {
        match raw {
            0 => Some(ChromaFormat::Monochrome),
            1 => Some(ChromaFormat::Yuv420),
            2 => Some(ChromaFormat::Yuv422),
            3 => Some(ChromaFormat::Yuv444),
            _ => None,
        }
    }
}

/// Matches `cudaVideoSurfaceFormat`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoSurfaceFormat {
    Nv12 = 0,
    P016 = 1,
    Yuv444 = 2,
    Yuv444_16Bit = 3,
}

/// Matches `cudaVideoDeinterlaceMode`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoDeinterlaceMode {
    Weave = 0,
    Bob = 1,
    Adaptive = 2,
}

/// Matches `cudaVideoCreateFlags`.
pub mod create_flags {
    pub const DEFAULT: u32 = 0x00;
    pub const PREFER_CUDA: u32 = 0x01;
    pub const PREFER_DXVA: u32 = 0x02;
    pub const PREFER_CUVID: u32 = 0x04;
}

/// Matches `cuvidDecodeStatus`.
pub mod decode_status {
    pub const INVALID: i32 = 0;
    pub const IN_PROGRESS: i32 = 1;
    pub const SUCCESS: i32 = 2;
    pub const ERROR: i32 = 8;
    pub const ERROR_CONCEALED: i32 = 9;
}

/// Flags for [`CuvidSourceDataPacket::flags`].
pub mod packet_flags {
    pub const CUVID_PKT_ENDOFSTREAM: u32 = 0x01;
    pub const CUVID_PKT_TIMESTAMP: u32 = 0x02;
    pub const CUVID_PKT_DISCONTINUITY: u32 = 0x04;
    pub const CUVID_PKT_ENDOFPICTURE: u32 = 0x08;
    pub const CUVID_PKT_NOTIFY_EOS: u32 = 0x10;
}

// ---------------------------------------------------------------------------
// Small C structs
// ---------------------------------------------------------------------------

/// `struct { short left, top, right, bottom; }`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ShortRect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl ShortRect {
    pub fn from_rect(rect: nvb_common::Rect) -> Self {
        Self {
            left: clamp_i16(rect.left),
            top: clamp_i16(rect.top),
            right: clamp_i16(rect.right),
            bottom: clamp_i16(rect.bottom),
        }
    }
}

fn clamp_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

// ---------------------------------------------------------------------------
// CUVIDDECODECAPS
// ---------------------------------------------------------------------------

/// Matches `CUVIDDECODECAPS`. Input fields are the first three; the driver
/// fills the rest.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct CuvidDecodeCaps {
    pub codec_type: CudaVideoCodec,
    pub chroma_format: CudaVideoChromaFormat,
    pub bit_depth_minus8: u32,
    pub reserved1: [u32; 3],
    pub is_supported: u8,
    pub num_nvdecs: u8,
    pub output_format_mask: u16,
    pub max_width: u32,
    pub max_height: u32,
    pub max_mb_count: u32,
    pub min_width: u16,
    pub min_height: u16,
    pub is_histogram_supported: u8,
    pub counter_bit_depth: u8,
    pub max_histogram_bins: u16,
    pub reserved3: [u32; 10],
}

impl CuvidDecodeCaps {
    pub fn query(codec: VideoCodec, chroma: ChromaFormat, bit_depth: u8) -> Self {
        Self {
            codec_type: CudaVideoCodec::from_common(codec),
            chroma_format: CudaVideoChromaFormat::from_common(chroma),
            bit_depth_minus8: u32::from(bit_depth.saturating_sub(8)),
            reserved1: [0; 3],
            is_supported: 0,
            num_nvdecs: 0,
            output_format_mask: 0,
            max_width: 0,
            max_height: 0,
            max_mb_count: 0,
            min_width: 0,
            min_height: 0,
            is_histogram_supported: 0,
            counter_bit_depth: 0,
            max_histogram_bins: 0,
            reserved3: [0; 10],
        }
    }
}

// ---------------------------------------------------------------------------
// CUVIDDECODECREATEINFO
// ---------------------------------------------------------------------------

/// Matches `CUVIDDECODECREATEINFO` from `cuviddec.h`.
#[repr(C)]
#[derive(Clone)]
pub struct CuvidDecodeCreateInfo {
    /// ulWidth
    pub coded_width: c_ulong,
    /// ulHeight
    pub coded_height: c_ulong,
    /// ulNumDecodeSurfaces
    pub num_decode_surfaces: c_ulong,
    pub codec_type: CudaVideoCodec,
    pub chroma_format: CudaVideoChromaFormat,
    /// ulCreationFlags (see [`create_flags`])
    pub creation_flags: c_ulong,
    pub bit_depth_minus8: c_ulong,
    pub intra_decode_only: c_ulong,
    /// Largest coded size a later reconfigure may request.
    pub max_width: c_ulong,
    pub max_height: c_ulong,
    pub reserved1: c_ulong,
    /// Source area to decode; all-zero selects the full frame.
    pub display_area: ShortRect,
    pub output_format: CudaVideoSurfaceFormat,
    pub deinterlace_mode: CudaVideoDeinterlaceMode,
    pub target_width: c_ulong,
    pub target_height: c_ulong,
    /// Surfaces that may be mapped at once.
    pub num_output_surfaces: c_ulong,
    /// CUvideoctxlock; null for none.
    pub vid_lock: *mut c_void,
    pub target_rect: ShortRect,
    pub enable_histogram: c_ulong,
    pub reserved2: [c_ulong; 4],
}

impl Default for CuvidDecodeCreateInfo {
    fn default() -> Self {
        // SAFETY: All-zeros is a valid default state for this POD struct.
        // Enum fields become their 0 variant and the lock pointer null.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDRECONFIGUREDECODERINFO
// ---------------------------------------------------------------------------

/// Matches `CUVIDRECONFIGUREDECODERINFO`.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct CuvidReconfigureDecoderInfo {
    pub coded_width: u32,
    pub coded_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub num_decode_surfaces: u32,
    pub reserved1: [u32; 12],
    pub display_area: ShortRect,
    pub target_rect: ShortRect,
    pub reserved2: [u32; 11],
}

impl Default for CuvidReconfigureDecoderInfo {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDGETDECODESTATUS
// ---------------------------------------------------------------------------

/// Matches `CUVIDGETDECODESTATUS`.
#[repr(C)]
pub struct CuvidGetDecodeStatus {
    /// See [`decode_status`].
    pub decode_status: i32,
    pub reserved: [u32; 31],
    pub p_reserved: [*mut c_void; 8],
}

impl Default for CuvidGetDecodeStatus {
    fn default() -> Self {
        // SAFETY: All-zeros is valid; pointers become null.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDPICPARAMS
// ---------------------------------------------------------------------------

/// Leading fields of `CUVIDPICPARAMS`.
///
/// The full struct carries a large codec-specific union. It is only ever
/// read through a pointer the parser hands to the decode callback and
/// passed back to `cuvidDecodePicture` untouched, so it is never
/// constructed on the Rust side.
#[repr(C)]
pub struct CuvidPicParams {
    pub pic_width_in_mbs: i32,
    pub frame_height_in_mbs: i32,
    /// Decode surface this picture is written to.
    pub curr_pic_idx: i32,
}

// ---------------------------------------------------------------------------
// CUVIDPROCPARAMS
// ---------------------------------------------------------------------------

/// Matches `CUVIDPROCPARAMS` from `cuviddec.h`.
#[repr(C)]
#[derive(Clone)]
pub struct CuvidProcParams {
    pub progressive_frame: i32,
    pub second_field: i32,
    pub top_field_first: i32,
    pub unpaired_field: i32,
    pub reserved_flags: u32,
    pub reserved_zero: u32,
    pub raw_input_dptr: u64,
    pub raw_input_pitch: u32,
    pub raw_input_format: u32,
    pub raw_output_dptr: u64,
    pub raw_output_pitch: u32,
    pub reserved1: u32,
    /// Stream the post-processing runs on.
    pub output_stream: CUstream,
    pub reserved: [u32; 46],
    pub histogram_dptr: *mut u64,
    pub reserved2: [*mut c_void; 1],
}

impl Default for CuvidProcParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDEOFORMAT
// ---------------------------------------------------------------------------

/// Matches `CUVIDEOFORMAT` from `nvcuvid.h`.
///
/// `codec` and `chroma_format` are kept as raw integers: the driver may
/// report values this binding has no variant for.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct CuVideoFormat {
    pub codec: i32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub progressive_sequence: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub min_num_decode_surfaces: u8,
    pub coded_width: u32,
    pub coded_height: u32,
    pub display_area_left: i32,
    pub display_area_top: i32,
    pub display_area_right: i32,
    pub display_area_bottom: i32,
    pub chroma_format: i32,
    pub bitrate: u32,
    pub display_aspect_ratio_x: i32,
    pub display_aspect_ratio_y: i32,
    /// Packed `video_signal_description` bit fields.
    pub video_signal_description: u32,
    pub seqhdr_data_length: u32,
}

// ---------------------------------------------------------------------------
// Parser structs and callbacks
// ---------------------------------------------------------------------------

/// Returns 0 to fail, 1 to accept, or >1 to set the decode surface count.
pub type PfnCuvidSequenceCallback =
    unsafe extern "C" fn(user_data: *mut c_void, format: *mut CuVideoFormat) -> i32;

/// Returns 1 on success, 0 on failure.
pub type PfnCuvidDecodePicture =
    unsafe extern "C" fn(user_data: *mut c_void, pic_params: *mut CuvidPicParams) -> i32;

/// `disp_info` is null at end of stream.
pub type PfnCuvidDisplayPicture =
    unsafe extern "C" fn(user_data: *mut c_void, disp_info: *mut CuvidParserDispInfo) -> i32;

pub type PfnCuvidGetOperatingPoint =
    unsafe extern "C" fn(user_data: *mut c_void, op_info: *mut c_void) -> i32;

pub type PfnCuvidGetSeiMsg =
    unsafe extern "C" fn(user_data: *mut c_void, sei_msg: *mut c_void) -> i32;

/// Matches `CUVIDPARSERPARAMS`.
#[repr(C)]
pub struct CuvidParserParams {
    pub codec_type: CudaVideoCodec,
    pub max_num_decode_surfaces: u32,
    /// Timestamp clock in Hz; 0 selects 10 MHz.
    pub clock_rate: u32,
    /// Percentage of corrupted macroblocks tolerated before a picture is dropped.
    pub error_threshold: u32,
    pub max_display_delay: u32,
    /// `bAnnexb`/`bMemoryOptimize` bit fields followed by `uReserved1[4]`.
    pub reserved1: [u32; 5],
    pub user_data: *mut c_void,
    pub pfn_sequence_callback: Option<PfnCuvidSequenceCallback>,
    pub pfn_decode_picture: Option<PfnCuvidDecodePicture>,
    pub pfn_display_picture: Option<PfnCuvidDisplayPicture>,
    pub pfn_get_operating_point: Option<PfnCuvidGetOperatingPoint>,
    pub pfn_get_sei_msg: Option<PfnCuvidGetSeiMsg>,
    pub reserved2: [*mut c_void; 5],
    /// CUVIDEOFORMATEX*; null when the stream carries its own headers.
    pub ext_video_info: *mut c_void,
}

impl Default for CuvidParserParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid: function pointers become None,
        // raw pointers become null.
        unsafe { std::mem::zeroed() }
    }
}

/// Matches `CUVIDPARSERDISPINFO`.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct CuvidParserDispInfo {
    pub picture_index: i32,
    pub progressive_frame: i32,
    pub top_field_first: i32,
    pub repeat_first_field: i32,
    pub timestamp: i64,
}

/// Matches `CUVIDSOURCEDATAPACKET`.
#[repr(C)]
pub struct CuvidSourceDataPacket {
    /// See [`packet_flags`].
    pub flags: c_ulong,
    pub payload_size: c_ulong,
    pub payload: *const u8,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Dynamic library wrapper
// ---------------------------------------------------------------------------

/// Dynamically loaded nvcuvid library with typed function pointers.
#[allow(non_snake_case)]
pub struct NvcuvidLibrary {
    /// Keeps the symbols below valid.
    _lib: Library,

    pub cuvidGetDecoderCaps: unsafe extern "C" fn(caps: *mut CuvidDecodeCaps) -> CUresult,
    pub cuvidCreateDecoder: unsafe extern "C" fn(
        decoder: *mut CUvideodecoder,
        params: *mut CuvidDecodeCreateInfo,
    ) -> CUresult,
    pub cuvidReconfigureDecoder: unsafe extern "C" fn(
        decoder: CUvideodecoder,
        params: *mut CuvidReconfigureDecoderInfo,
    ) -> CUresult,
    pub cuvidDestroyDecoder: unsafe extern "C" fn(decoder: CUvideodecoder) -> CUresult,
    pub cuvidDecodePicture:
        unsafe extern "C" fn(decoder: CUvideodecoder, params: *mut CuvidPicParams) -> CUresult,
    pub cuvidGetDecodeStatus: unsafe extern "C" fn(
        decoder: CUvideodecoder,
        pic_idx: i32,
        status: *mut CuvidGetDecodeStatus,
    ) -> CUresult,
    pub cuvidMapVideoFrame64: unsafe extern "C" fn(
        decoder: CUvideodecoder,
        pic_idx: i32,
        dev_ptr: *mut CUdeviceptr,
        pitch: *mut u32,
        params: *mut CuvidProcParams,
    ) -> CUresult,
    pub cuvidUnmapVideoFrame64:
        unsafe extern "C" fn(decoder: CUvideodecoder, dev_ptr: CUdeviceptr) -> CUresult,

    pub cuvidCreateVideoParser: unsafe extern "C" fn(
        parser: *mut CUvideoparser,
        params: *mut CuvidParserParams,
    ) -> CUresult,
    pub cuvidDestroyVideoParser: unsafe extern "C" fn(parser: CUvideoparser) -> CUresult,
    pub cuvidParseVideoData:
        unsafe extern "C" fn(parser: CUvideoparser, packet: *mut CuvidSourceDataPacket) -> CUresult,
}

// SAFETY: the function pointers refer to driver entry points that may be
// called from any thread; `_lib` keeps them loaded.
unsafe impl Send for NvcuvidLibrary {}
unsafe impl Sync for NvcuvidLibrary {}

impl std::fmt::Debug for NvcuvidLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvcuvidLibrary")
            .field("loaded", &true)
            .finish()
    }
}

/// Copy one symbol out of `lib`.
///
/// # Safety
///
/// `T` must match the C signature of `name`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, NvcuvidLoadError> {
    lib.get::<T>(name).map(|sym| *sym).map_err(|e| {
        let printable = String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name));
        NvcuvidLoadError::SymbolNotFound(format!("{printable}: {e}"))
    })
}

impl NvcuvidLibrary {
    /// Load the nvcuvid library from the default system path.
    pub fn load() -> Result<Self, NvcuvidLoadError> {
        let lib_name = Self::library_name();
        info!(library = %lib_name, "Loading NVDEC library");

        // SAFETY: loading the NVIDIA driver's video library runs no
        // initialisers beyond registering its entry points.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            NvcuvidLoadError::LibraryNotFound(format!(
                "Failed to load {lib_name}: {e}. Is the NVIDIA driver installed?"
            ))
        })?;

        // SAFETY: every signature below matches the SDK headers. The copied
        // function pointers stay valid because `lib` moves into `Self`.
        unsafe {
            let loaded = Self {
                cuvidGetDecoderCaps: symbol(&lib, b"cuvidGetDecoderCaps\0")?,
                cuvidCreateDecoder: symbol(&lib, b"cuvidCreateDecoder\0")?,
                cuvidReconfigureDecoder: symbol(&lib, b"cuvidReconfigureDecoder\0")?,
                cuvidDestroyDecoder: symbol(&lib, b"cuvidDestroyDecoder\0")?,
                cuvidDecodePicture: symbol(&lib, b"cuvidDecodePicture\0")?,
                cuvidGetDecodeStatus: symbol(&lib, b"cuvidGetDecodeStatus\0")?,
                cuvidMapVideoFrame64: symbol(&lib, b"cuvidMapVideoFrame64\0")?,
                cuvidUnmapVideoFrame64: symbol(&lib, b"cuvidUnmapVideoFrame64\0")?,
                cuvidCreateVideoParser: symbol(&lib, b"cuvidCreateVideoParser\0")?,
                cuvidDestroyVideoParser: symbol(&lib, b"cuvidDestroyVideoParser\0")?,
                cuvidParseVideoData: symbol(&lib, b"cuvidParseVideoData\0")?,
                _lib: lib,
            };
            debug!("All NVDEC symbols loaded successfully");
            Ok(loaded)
        }
    }

    fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "nvcuvid.dll"
        } else if cfg!(target_os = "linux") {
            "libnvcuvid.so.1"
        } else {
            "libnvcuvid.so"
        }
    }
}

/// Errors that can occur when loading the nvcuvid library.
#[derive(Debug, thiserror::Error)]
pub enum NvcuvidLoadError {
    #[error("NVDEC library not found: {0}")]
    LibraryNotFound(String),

    #[error("Required symbol not found: {0}")]
    SymbolNotFound(String),
}

impl From<NvcuvidLoadError> for HwCallError {
    fn from(err: NvcuvidLoadError) -> Self {
        HwCallError::new("nvcuvid load", err.to_string())
    }
}

/// Map a CUresult to `Ok` or a [`HwCallError`] naming the call.
pub fn check_cuvid_result(result: CUresult, call: &'static str) -> Result<(), HwCallError> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(HwCallError::from_code(call, result))
    }
}
