//! CUVID video parser bound to a [`ParserEvents`] receiver.
//!
//! The parser calls back into Rust through three `extern "C"` trampolines.
//! Each one recovers the receiver from `user_data`, translates the native
//! struct into the engine's types, and returns the receiver's answer.
//! All three run synchronously inside `cuvidParseVideoData`.

use std::ffi::c_void;
use std::os::raw::c_ulong;
use std::ptr;
use std::sync::Arc;

use tracing::{debug, warn};

use nvb_common::{HwCallError, ParserTicks, Rect, Resolution};

use super::ffi::{
    check_cuvid_result, packet_flags, CuVideoFormat, CudaVideoChromaFormat, CudaVideoCodec,
    CuvidParserDispInfo, CuvidParserParams, CuvidPicParams, CuvidSourceDataPacket, CUvideoparser,
    NvcuvidLibrary,
};
use crate::engine::{
    DisplayInfo, ParserEvents, ParserParams, PictureParams, SourcePacket, VideoFormat, VideoParser,
};

/// Live `cuvidCreateVideoParser` handle.
pub struct NvdecParser {
    lib: Arc<NvcuvidLibrary>,
    handle: CUvideoparser,
    /// Target of the driver's `user_data`; boxed so its address is stable.
    _events: Box<Arc<dyn ParserEvents>>,
}

// SAFETY: the parser handle is only used through `&mut self`, and the
// receiver it points at is `Send + Sync`.
unsafe impl Send for NvdecParser {}

impl NvdecParser {
    pub fn new(
        lib: Arc<NvcuvidLibrary>,
        params: &ParserParams,
        events: Arc<dyn ParserEvents>,
    ) -> Result<Self, HwCallError> {
        let events = Box::new(events);

        let mut raw = CuvidParserParams {
            codec_type: CudaVideoCodec::from_common(params.codec),
            // Raised later through the sequence callback's return value.
            max_num_decode_surfaces: 1,
            clock_rate: 0,
            error_threshold: 0,
            max_display_delay: params.max_display_delay,
            user_data: &*events as *const Arc<dyn ParserEvents> as *mut c_void,
            pfn_sequence_callback: Some(handle_sequence),
            pfn_decode_picture: Some(handle_decode),
            pfn_display_picture: Some(handle_display),
            ..Default::default()
        };

        let mut handle: CUvideoparser = ptr::null_mut();
        // SAFETY: `raw` is fully initialised and `user_data` points into
        // `events`, which moves into the returned value and outlives the
        // parser handle.
        let result = unsafe { (lib.cuvidCreateVideoParser)(&mut handle, &mut raw) };
        check_cuvid_result(result, "cuvidCreateVideoParser")?;

        debug!(codec = ?params.codec, delay = params.max_display_delay, "Video parser created");
        Ok(Self {
            lib,
            handle,
            _events: events,
        })
    }
}

impl VideoParser for NvdecParser {
    fn parse(&mut self, packet: &SourcePacket<'_>) -> Result<(), HwCallError> {
        let mut flags = 0;
        if packet.timestamp.is_some() {
            flags |= packet_flags::CUVID_PKT_TIMESTAMP;
        }
        if packet.end_of_stream {
            flags |= packet_flags::CUVID_PKT_ENDOFSTREAM;
        }

        let mut raw = CuvidSourceDataPacket {
            flags: flags as c_ulong,
            payload_size: packet.data.len() as c_ulong,
            payload: if packet.data.is_empty() {
                ptr::null()
            } else {
                packet.data.as_ptr()
            },
            timestamp: packet.timestamp.map_or(0, |t| t.0),
        };

        // SAFETY: `packet.data` outlives the call; the driver copies what it
        // keeps. Callbacks fired from inside reach `self._events`, which is
        // alive for the whole call.
        let result = unsafe { (self.lib.cuvidParseVideoData)(self.handle, &mut raw) };
        check_cuvid_result(result, "cuvidParseVideoData")
    }
}

impl Drop for NvdecParser {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        // SAFETY: the handle came from cuvidCreateVideoParser and is
        // destroyed exactly once.
        let result = unsafe { (self.lib.cuvidDestroyVideoParser)(self.handle) };
        if let Err(e) = check_cuvid_result(result, "cuvidDestroyVideoParser") {
            warn!(error = %e, "Failed to destroy video parser");
        }
        self.handle = ptr::null_mut();
        debug!("Video parser destroyed");
    }
}

impl std::fmt::Debug for NvdecParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvdecParser")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Translate the parser's sequence header, or `None` for a codec or chroma
/// layout this crate has no name for.
pub fn video_format_from_raw(raw: &CuVideoFormat) -> Option<VideoFormat> {
    let codec = CudaVideoCodec::common_from_raw(raw.codec)?;
    let chroma = CudaVideoChromaFormat::common_from_raw(raw.chroma_format)?;
    Some(VideoFormat {
        codec,
        chroma,
        bit_depth_luma: raw.bit_depth_luma_minus8.saturating_add(8),
        bit_depth_chroma: raw.bit_depth_chroma_minus8.saturating_add(8),
        coded: Resolution::new(raw.coded_width, raw.coded_height),
        display_area: Rect::new(
            raw.display_area_left,
            raw.display_area_top,
            raw.display_area_right,
            raw.display_area_bottom,
        ),
        progressive: raw.progressive_sequence != 0,
        min_decode_surfaces: u32::from(raw.min_num_decode_surfaces),
    })
}

fn display_info_from_raw(raw: &CuvidParserDispInfo) -> DisplayInfo {
    DisplayInfo {
        picture_index: raw.picture_index,
        timestamp: ParserTicks(raw.timestamp),
        progressive: raw.progressive_frame != 0,
        top_field_first: raw.top_field_first != 0,
        repeat_first_field: raw.repeat_first_field,
    }
}

// ---------------------------------------------------------------------------
// Trampolines
// ---------------------------------------------------------------------------

/// Recover the receiver from `user_data`.
///
/// # Safety
///
/// `user_data` must be null or the pointer [`NvdecParser::new`] registered.
unsafe fn receiver<'a>(user_data: *mut c_void) -> Option<&'a Arc<dyn ParserEvents>> {
    (user_data as *const Arc<dyn ParserEvents>).as_ref()
}

unsafe extern "C" fn handle_sequence(user_data: *mut c_void, format: *mut CuVideoFormat) -> i32 {
    // SAFETY: the driver passes back the `user_data` registered at
    // creation and a format valid for the duration of the call.
    let (Some(events), Some(raw)) = (unsafe { receiver(user_data) }, unsafe { format.as_ref() })
    else {
        return 0;
    };
    match video_format_from_raw(raw) {
        Some(format) => events.on_sequence(&format).code(),
        None => {
            warn!(
                codec = raw.codec,
                chroma = raw.chroma_format,
                "Sequence with unknown codec or chroma layout"
            );
            0
        }
    }
}

unsafe extern "C" fn handle_decode(user_data: *mut c_void, pic_params: *mut CuvidPicParams) -> i32 {
    // SAFETY: as for `handle_sequence`; `pic_params` stays valid until this
    // callback returns, which bounds every use of `params`.
    let Some(events) = (unsafe { receiver(user_data) }) else {
        return 0;
    };
    let Some(raw) = (unsafe { pic_params.as_ref() }) else {
        return 0;
    };
    let mut params = unsafe { PictureParams::from_raw(raw.curr_pic_idx, pic_params.cast()) };
    i32::from(events.on_decode(&mut params))
}

unsafe extern "C" fn handle_display(
    user_data: *mut c_void,
    disp_info: *mut CuvidParserDispInfo,
) -> i32 {
    // SAFETY: as for `handle_sequence`. A null `disp_info` marks end of
    // stream.
    let Some(events) = (unsafe { receiver(user_data) }) else {
        return 0;
    };
    let info = unsafe { disp_info.as_ref() }.map(display_info_from_raw);
    i32::from(events.on_display(info.as_ref()))
}
