//! Scripted decode engine for driving sessions without a GPU.
//!
//! Packets are tiny scripts rather than real bitstreams:
//!
//! - `[SEQ, w_hi, w_lo, h_hi, h_lo, bit_depth]` fires a sequence event.
//! - `[PIC]` decodes the next picture and displays it at the packet's
//!   timestamp.
//! - `[PIC, delay]` decodes a picture but holds its display until `delay`
//!   more pictures have been decoded (reordering).
//! - anything else is swallowed, like a parameter set.
//!
//! End of stream flushes every held picture, then fires the end-of-stream
//! display event.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use nvb_common::{ChromaFormat, HwCallError, ParserTicks, Resolution, VideoCodec};
use nvb_decoder::engine::{
    DecodeStatus, DecoderCaps, DecoderCreateParams, DeviceProvider, DisplayInfo, HwDevice,
    HwVideoDecoder, MappedSurface, ParserEvents, ParserParams, PictureParams, ReconfigureParams,
    SourcePacket, VideoFormat, VideoParser,
};
use nvb_gpu_hal::PitchedCopy;

pub const SEQ: u8 = 0xA0;
pub const PIC: u8 = 0xB0;

/// Chroma bytes written into every surface's interleaved plane.
pub const CB: u8 = 0x80;
pub const CR: u8 = 0x90;

pub fn sequence(width: u16, height: u16) -> Vec<u8> {
    sequence_with_depth(width, height, 8)
}

pub fn sequence_with_depth(width: u16, height: u16, bit_depth: u8) -> Vec<u8> {
    let [w_hi, w_lo] = width.to_be_bytes();
    let [h_hi, h_lo] = height.to_be_bytes();
    vec![SEQ, w_hi, w_lo, h_hi, h_lo, bit_depth]
}

pub fn picture() -> Vec<u8> {
    vec![PIC]
}

pub fn delayed_picture(delay: u8) -> Vec<u8> {
    vec![PIC, delay]
}

/// Luma byte the scripted decoder writes for `picture_index`.
pub fn luma_for(picture_index: i32) -> u8 {
    0x10 + picture_index as u8
}

/// Every hardware call the engine saw.
#[derive(Debug, Default)]
pub struct Calls {
    pub caps_queries: usize,
    pub created: Vec<DecoderCreateParams>,
    pub reconfigured: Vec<ReconfigureParams>,
    pub decoded: Vec<i32>,
    pub mapped: Vec<i32>,
    pub unmapped: usize,
    pub end_of_stream: usize,
}

impl Calls {
    /// Calls that reach the decoder hardware.
    pub fn hardware_calls(&self) -> usize {
        self.caps_queries
            + self.created.len()
            + self.reconfigured.len()
            + self.decoded.len()
            + self.mapped.len()
            + self.unmapped
    }
}

// ---------------------------------------------------------------------------
// Provider / device
// ---------------------------------------------------------------------------

pub struct ScriptedProvider {
    pub calls: Arc<Mutex<Calls>>,
    pub max: Resolution,
}

impl ScriptedProvider {
    pub fn new(max: Resolution) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Calls::default())),
            max,
        }
    }
}

impl DeviceProvider for ScriptedProvider {
    fn device_count(&self) -> Result<usize, HwCallError> {
        Ok(1)
    }

    fn device_name(&self, ordinal: usize) -> Result<String, HwCallError> {
        Ok(format!("Scripted GPU {ordinal}"))
    }

    fn open(&self, ordinal: usize) -> Result<Arc<dyn HwDevice>, HwCallError> {
        Ok(Arc::new(ScriptedDevice {
            ordinal,
            name: format!("Scripted GPU {ordinal}"),
            calls: self.calls.clone(),
            max: self.max,
        }))
    }
}

struct ScriptedDevice {
    ordinal: usize,
    name: String,
    calls: Arc<Mutex<Calls>>,
    max: Resolution,
}

impl HwDevice for ScriptedDevice {
    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn decoder_caps(
        &self,
        _codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u8,
    ) -> Result<DecoderCaps, HwCallError> {
        self.calls.lock().caps_queries += 1;
        Ok(DecoderCaps {
            supported: chroma == ChromaFormat::Yuv420 && bit_depth <= 12,
            max: self.max,
            max_macroblocks: self.max.macroblocks(),
            min: Resolution::new(16, 16),
        })
    }

    fn create_decoder(
        &self,
        params: &DecoderCreateParams,
    ) -> Result<Arc<dyn HwVideoDecoder>, HwCallError> {
        self.calls.lock().created.push(params.clone());
        let bps = if params.bit_depth_luma > 8 { 2 } else { 1 };
        Ok(Arc::new(ScriptedDecoder {
            calls: self.calls.clone(),
            pitch: params.max.width as usize * 2,
            bytes_per_sample: bps,
            target: Mutex::new(params.target),
            mapped: Mutex::new(Vec::new()),
        }))
    }

    fn create_parser(
        &self,
        params: &ParserParams,
        events: Arc<dyn ParserEvents>,
    ) -> Result<Box<dyn VideoParser>, HwCallError> {
        Ok(Box::new(ScriptedParser {
            codec: params.codec,
            events,
            calls: self.calls.clone(),
            next_index: 0,
            held: VecDeque::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

struct ScriptedDecoder {
    calls: Arc<Mutex<Calls>>,
    pitch: usize,
    bytes_per_sample: usize,
    target: Mutex<Resolution>,
    /// Host images of the currently mapped surfaces.
    mapped: Mutex<Vec<(i32, Vec<u8>)>>,
}

impl ScriptedDecoder {
    fn render(&self, picture_index: i32) -> Vec<u8> {
        let height = self.target.lock().height as usize;
        let chroma_rows = height.div_ceil(2);
        let mut surface = vec![luma_for(picture_index); self.pitch * (height + chroma_rows)];
        for row in surface[self.pitch * height..].chunks_mut(self.pitch) {
            for pair in row.chunks_exact_mut(2 * self.bytes_per_sample) {
                let (cb, cr) = pair.split_at_mut(self.bytes_per_sample);
                cb.fill(CB);
                cr.fill(CR);
            }
        }
        surface
    }
}

impl HwVideoDecoder for ScriptedDecoder {
    fn decode_picture(&self, params: &mut PictureParams) -> Result<(), HwCallError> {
        self.calls.lock().decoded.push(params.picture_index());
        Ok(())
    }

    fn reconfigure(&self, params: &ReconfigureParams) -> Result<(), HwCallError> {
        self.calls.lock().reconfigured.push(params.clone());
        *self.target.lock() = params.target;
        Ok(())
    }

    fn decode_status(&self, _picture_index: i32) -> Result<DecodeStatus, HwCallError> {
        Ok(DecodeStatus::Success)
    }

    fn map(&self, info: &DisplayInfo) -> Result<MappedSurface, HwCallError> {
        self.calls.lock().mapped.push(info.picture_index);
        self.mapped
            .lock()
            .push((info.picture_index, self.render(info.picture_index)));
        Ok(MappedSurface {
            device_ptr: 0x1000 + info.picture_index as u64,
            pitch: self.pitch,
            picture_index: info.picture_index,
        })
    }

    fn unmap(&self, surface: MappedSurface) -> Result<(), HwCallError> {
        self.calls.lock().unmapped += 1;
        self.mapped
            .lock()
            .retain(|(index, _)| *index != surface.picture_index);
        Ok(())
    }

    fn push_context(&self) -> Result<(), HwCallError> {
        Ok(())
    }

    fn pop_context(&self) -> Result<(), HwCallError> {
        Ok(())
    }

    fn copy_to_host(
        &self,
        surface: &MappedSurface,
        row_offset: usize,
        copy: PitchedCopy,
        dst: &mut [u8],
    ) -> Result<(), HwCallError> {
        let mapped = self.mapped.lock();
        let (_, image) = mapped
            .iter()
            .find(|(index, _)| *index == surface.picture_index)
            .ok_or_else(|| HwCallError::new("copy_to_host", "surface not mapped"))?;
        copy.copy_host(&image[row_offset * surface.pitch..], dst)
            .map_err(|e| HwCallError::new("copy_to_host", e.to_string()))
    }

    fn synchronize(&self) -> Result<(), HwCallError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct ScriptedParser {
    codec: VideoCodec,
    events: Arc<dyn ParserEvents>,
    calls: Arc<Mutex<Calls>>,
    next_index: i32,
    /// Pictures decoded but not yet displayed: `(remaining, info)`.
    held: VecDeque<(u8, DisplayInfo)>,
}

impl ScriptedParser {
    fn display(&self, info: &DisplayInfo) -> Result<(), HwCallError> {
        if self.events.on_display(Some(info)) {
            Ok(())
        } else {
            Err(HwCallError::new("display callback", "rejected"))
        }
    }

    fn release_due(&mut self) -> Result<(), HwCallError> {
        for (remaining, _) in &mut self.held {
            *remaining = remaining.saturating_sub(1);
        }
        while self.held.front().is_some_and(|(remaining, _)| *remaining == 0) {
            if let Some((_, info)) = self.held.pop_front() {
                self.display(&info)?;
            }
        }
        Ok(())
    }
}

impl VideoParser for ScriptedParser {
    fn parse(&mut self, packet: &SourcePacket<'_>) -> Result<(), HwCallError> {
        if packet.end_of_stream {
            while let Some((_, info)) = self.held.pop_front() {
                self.display(&info)?;
            }
            self.calls.lock().end_of_stream += 1;
            self.events.on_display(None);
            return Ok(());
        }

        let timestamp = packet.timestamp.unwrap_or(ParserTicks::ZERO);
        match packet.data {
            [SEQ, w_hi, w_lo, h_hi, h_lo, depth] => {
                let coded = Resolution::new(
                    u32::from(u16::from_be_bytes([*w_hi, *w_lo])),
                    u32::from(u16::from_be_bytes([*h_hi, *h_lo])),
                );
                let format = VideoFormat::new(self.codec, coded).with_bit_depth(*depth, *depth);
                if self.events.on_sequence(&format).code() == 0 {
                    return Err(HwCallError::new("sequence callback", "rejected"));
                }
            }
            [PIC, rest @ ..] => {
                let index = self.next_index;
                self.next_index = (self.next_index + 1) % 32;
                if !self.events.on_decode(&mut PictureParams::new(index)) {
                    return Err(HwCallError::new("decode callback", "rejected"));
                }
                let info = DisplayInfo::progressive(index, timestamp);
                let delay = rest.first().copied().unwrap_or(0);
                self.release_due()?;
                if delay == 0 && self.held.is_empty() {
                    self.display(&info)?;
                } else {
                    self.held.push_back((delay.max(1), info));
                }
            }
            _ => {}
        }
        Ok(())
    }
}
