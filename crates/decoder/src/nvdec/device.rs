//! NVDEC implementations of the engine traits.
//!
//! [`NvdecProvider`] enumerates CUDA devices, [`NvdecDevice`] binds one
//! device to the loaded nvcuvid library, and [`NvdecDecoder`] owns a
//! `CUvideodecoder` plus the stream used to read its surfaces back.
//!
//! Every nvcuvid call that needs a CUDA context runs with the device's
//! primary context pushed on the calling thread.

use std::ffi::c_void;
use std::os::raw::c_ulong;
use std::ptr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use nvb_common::{ChromaFormat, DecodeError, HwCallError, Resolution, VideoCodec};
use nvb_gpu_hal::cuda::{self, CopyStream, CudaDevice};
use nvb_gpu_hal::PitchedCopy;

use super::ffi::{
    check_cuvid_result, create_flags, decode_status, CudaVideoChromaFormat, CudaVideoCodec,
    CudaVideoDeinterlaceMode, CudaVideoSurfaceFormat, CuvidDecodeCaps, CuvidDecodeCreateInfo,
    CuvidGetDecodeStatus, CuvidProcParams, CuvidReconfigureDecoderInfo, CUvideodecoder,
    NvcuvidLibrary, ShortRect,
};
use super::parser::NvdecParser;
use crate::engine::{
    DecodeStatus, DecoderCaps, DecoderCreateParams, DeinterlaceMode, DeviceProvider, DisplayInfo,
    HwDevice, HwVideoDecoder, MappedSurface, ParserEvents, ParserParams, PictureParams,
    ReconfigureParams, SurfaceFormat, VideoParser,
};

// ---------------------------------------------------------------------------
// NvdecProvider
// ---------------------------------------------------------------------------

/// Device enumeration backed by the CUDA driver and nvcuvid.
#[derive(Debug, Clone)]
pub struct NvdecProvider {
    lib: Arc<NvcuvidLibrary>,
}

impl NvdecProvider {
    /// Load nvcuvid. Fails when the NVIDIA driver is not installed.
    pub fn load() -> Result<Self, DecodeError> {
        let lib = NvcuvidLibrary::load().map_err(HwCallError::from)?;
        Ok(Self { lib: Arc::new(lib) })
    }

    pub fn library(&self) -> &Arc<NvcuvidLibrary> {
        &self.lib
    }
}

impl DeviceProvider for NvdecProvider {
    fn device_count(&self) -> Result<usize, HwCallError> {
        Ok(cuda::device_count()?)
    }

    fn device_name(&self, ordinal: usize) -> Result<String, HwCallError> {
        let device = CudaDevice::open(ordinal)?;
        Ok(device.name().to_owned())
    }

    fn open(&self, ordinal: usize) -> Result<Arc<dyn HwDevice>, HwCallError> {
        let device = CudaDevice::open(ordinal)?;
        Ok(Arc::new(NvdecDevice {
            device: Arc::new(device),
            lib: self.lib.clone(),
        }))
    }

    fn supports_codec(&self, codec: VideoCodec) -> bool {
        // Motion JPEG goes through nvJPEG, not the video parser.
        codec != VideoCodec::Mjpeg
    }
}

// ---------------------------------------------------------------------------
// NvdecDevice
// ---------------------------------------------------------------------------

/// One CUDA device paired with the nvcuvid entry points.
pub struct NvdecDevice {
    device: Arc<CudaDevice>,
    lib: Arc<NvcuvidLibrary>,
}

impl std::fmt::Debug for NvdecDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvdecDevice")
            .field("ordinal", &self.device.ordinal())
            .field("name", &self.device.name())
            .finish()
    }
}

impl HwDevice for NvdecDevice {
    fn ordinal(&self) -> usize {
        self.device.ordinal()
    }

    fn name(&self) -> &str {
        self.device.name()
    }

    fn decoder_caps(
        &self,
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u8,
    ) -> Result<DecoderCaps, HwCallError> {
        let mut caps = CuvidDecodeCaps::query(codec, chroma, bit_depth);

        let guard = self.device.push()?;
        // SAFETY: `caps` is a fully initialised CUVIDDECODECAPS and the
        // device context is current.
        let result = unsafe { (self.lib.cuvidGetDecoderCaps)(&mut caps) };
        guard.pop()?;
        check_cuvid_result(result, "cuvidGetDecoderCaps")?;

        let caps = DecoderCaps {
            supported: caps.is_supported != 0,
            max: Resolution::new(caps.max_width, caps.max_height),
            max_macroblocks: u64::from(caps.max_mb_count),
            min: Resolution::new(u32::from(caps.min_width), u32::from(caps.min_height)),
        };
        debug!(
            codec = codec.display_name(),
            chroma = chroma.display_name(),
            bit_depth,
            supported = caps.supported,
            max = %caps.max,
            "Queried decoder caps"
        );
        Ok(caps)
    }

    fn create_decoder(
        &self,
        params: &DecoderCreateParams,
    ) -> Result<Arc<dyn HwVideoDecoder>, HwCallError> {
        let mut info = CuvidDecodeCreateInfo {
            coded_width: params.coded.width as c_ulong,
            coded_height: params.coded.height as c_ulong,
            num_decode_surfaces: params.decode_surfaces as c_ulong,
            codec_type: CudaVideoCodec::from_common(params.codec),
            chroma_format: CudaVideoChromaFormat::from_common(params.chroma),
            creation_flags: create_flags::PREFER_CUVID as c_ulong,
            bit_depth_minus8: c_ulong::from(params.bit_depth_luma.saturating_sub(8)),
            max_width: params.max.width as c_ulong,
            max_height: params.max.height as c_ulong,
            display_area: ShortRect::from_rect(params.display_area),
            output_format: match params.surface_format {
                SurfaceFormat::Nv12 => CudaVideoSurfaceFormat::Nv12,
                SurfaceFormat::P016 => CudaVideoSurfaceFormat::P016,
            },
            deinterlace_mode: match params.deinterlace {
                DeinterlaceMode::Weave => CudaVideoDeinterlaceMode::Weave,
                DeinterlaceMode::Bob => CudaVideoDeinterlaceMode::Bob,
                DeinterlaceMode::Adaptive => CudaVideoDeinterlaceMode::Adaptive,
            },
            target_width: params.target.width as c_ulong,
            target_height: params.target.height as c_ulong,
            num_output_surfaces: params.output_surfaces as c_ulong,
            ..Default::default()
        };

        let stream = CopyStream::new(&self.device)?;

        let mut handle: CUvideodecoder = ptr::null_mut();
        let guard = self.device.push()?;
        // SAFETY: `info` is fully initialised and the device context is
        // current, so the decoder binds to it.
        let result = unsafe { (self.lib.cuvidCreateDecoder)(&mut handle, &mut info) };
        guard.pop()?;
        check_cuvid_result(result, "cuvidCreateDecoder")?;

        info!(
            codec = params.codec.display_name(),
            coded = %params.coded,
            max = %params.max,
            target = %params.target,
            surfaces = params.decode_surfaces,
            "NVDEC decoder created"
        );

        Ok(Arc::new(NvdecDecoder {
            handle,
            lib: self.lib.clone(),
            device: self.device.clone(),
            stream,
        }))
    }

    fn create_parser(
        &self,
        params: &ParserParams,
        events: Arc<dyn ParserEvents>,
    ) -> Result<Box<dyn VideoParser>, HwCallError> {
        let parser = NvdecParser::new(self.lib.clone(), params, events)?;
        Ok(Box::new(parser))
    }
}

// ---------------------------------------------------------------------------
// NvdecDecoder
// ---------------------------------------------------------------------------

/// A live `CUvideodecoder` with its readback stream.
pub struct NvdecDecoder {
    handle: CUvideodecoder,
    lib: Arc<NvcuvidLibrary>,
    device: Arc<CudaDevice>,
    stream: CopyStream,
}

// SAFETY: nvcuvid decoder handles may be used from any thread while the
// owning context is current; the session serializes access.
unsafe impl Send for NvdecDecoder {}
unsafe impl Sync for NvdecDecoder {}

impl std::fmt::Debug for NvdecDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvdecDecoder")
            .field("handle", &self.handle)
            .field("device", &self.device.name())
            .finish()
    }
}

impl HwVideoDecoder for NvdecDecoder {
    fn decode_picture(&self, params: &mut PictureParams) -> Result<(), HwCallError> {
        let raw = params.as_raw();
        if raw.is_null() {
            return Err(HwCallError::new(
                "cuvidDecodePicture",
                "picture parameters did not come from the parser",
            ));
        }
        // SAFETY: `raw` is the CUVIDPICPARAMS the parser handed to the
        // decode callback that is still on the stack.
        let result = unsafe { (self.lib.cuvidDecodePicture)(self.handle, raw.cast()) };
        check_cuvid_result(result, "cuvidDecodePicture")
    }

    fn reconfigure(&self, params: &ReconfigureParams) -> Result<(), HwCallError> {
        let mut info = CuvidReconfigureDecoderInfo {
            coded_width: params.coded.width,
            coded_height: params.coded.height,
            target_width: params.target.width,
            target_height: params.target.height,
            num_decode_surfaces: params.decode_surfaces,
            display_area: ShortRect::from_rect(params.display_area),
            ..Default::default()
        };

        let guard = self.device.push()?;
        // SAFETY: `info` is fully initialised; the handle is live.
        let result = unsafe { (self.lib.cuvidReconfigureDecoder)(self.handle, &mut info) };
        guard.pop()?;
        check_cuvid_result(result, "cuvidReconfigureDecoder")
    }

    fn decode_status(&self, picture_index: i32) -> Result<DecodeStatus, HwCallError> {
        let mut status = CuvidGetDecodeStatus::default();
        // SAFETY: `status` is a zeroed CUVIDGETDECODESTATUS.
        let result =
            unsafe { (self.lib.cuvidGetDecodeStatus)(self.handle, picture_index, &mut status) };
        check_cuvid_result(result, "cuvidGetDecodeStatus")?;

        Ok(match status.decode_status {
            decode_status::IN_PROGRESS => DecodeStatus::InProgress,
            decode_status::SUCCESS => DecodeStatus::Success,
            decode_status::ERROR => DecodeStatus::Error,
            decode_status::ERROR_CONCEALED => DecodeStatus::Concealed,
            other => DecodeStatus::Unknown(other),
        })
    }

    fn map(&self, info: &DisplayInfo) -> Result<MappedSurface, HwCallError> {
        let mut proc_params = CuvidProcParams {
            progressive_frame: i32::from(info.progressive),
            second_field: info.repeat_first_field + 1,
            top_field_first: i32::from(info.top_field_first),
            unpaired_field: i32::from(info.repeat_first_field < 0),
            output_stream: self.stream.raw() as *mut c_void,
            ..Default::default()
        };

        let mut device_ptr = 0u64;
        let mut pitch = 0u32;
        // SAFETY: the out-pointers are valid locals and the picture index
        // came from the parser's display event.
        let result = unsafe {
            (self.lib.cuvidMapVideoFrame64)(
                self.handle,
                info.picture_index,
                &mut device_ptr,
                &mut pitch,
                &mut proc_params,
            )
        };
        check_cuvid_result(result, "cuvidMapVideoFrame64")?;

        Ok(MappedSurface {
            device_ptr,
            pitch: pitch as usize,
            picture_index: info.picture_index,
        })
    }

    fn unmap(&self, surface: MappedSurface) -> Result<(), HwCallError> {
        // SAFETY: `surface` was returned by `map` on this decoder.
        let result = unsafe { (self.lib.cuvidUnmapVideoFrame64)(self.handle, surface.device_ptr) };
        check_cuvid_result(result, "cuvidUnmapVideoFrame64")
    }

    fn push_context(&self) -> Result<(), HwCallError> {
        Ok(self.device.push_current()?)
    }

    fn pop_context(&self) -> Result<(), HwCallError> {
        Ok(cuda::pop_current()?)
    }

    fn copy_to_host(
        &self,
        surface: &MappedSurface,
        row_offset: usize,
        copy: PitchedCopy,
        dst: &mut [u8],
    ) -> Result<(), HwCallError> {
        let src = surface.device_ptr + (row_offset * surface.pitch) as u64;
        // SAFETY: the surface stays mapped until the session unmaps it,
        // which happens after `synchronize`. The session pushes the
        // context before copying.
        unsafe { self.stream.copy_to_host_async(src, copy, dst) }?;
        Ok(())
    }

    fn synchronize(&self) -> Result<(), HwCallError> {
        Ok(self.stream.synchronize()?)
    }
}

impl Drop for NvdecDecoder {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        let guard = match self.device.push() {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(error = %e, "Failed to push context for decoder teardown");
                None
            }
        };
        // SAFETY: the handle came from cuvidCreateDecoder and is destroyed
        // exactly once.
        let result = unsafe { (self.lib.cuvidDestroyDecoder)(self.handle) };
        if let Err(e) = check_cuvid_result(result, "cuvidDestroyDecoder") {
            warn!(error = %e, "Failed to destroy NVDEC decoder");
        }
        drop(guard);
        self.handle = ptr::null_mut();
        debug!("NVDEC decoder destroyed");
    }
}
