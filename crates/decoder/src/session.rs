//! Decode session: parser callbacks on one side, pull-style consumer on the
//! other.
//!
//! # Architecture
//!
//! ```text
//!  submit() ──► VideoParser::parse ──► on_sequence ─► negotiate / reconfigure
//!                                  ├─► on_decode   ─► HwVideoDecoder::decode_picture
//!                                  └─► on_display  ─► map ─► copy planes ─► ring.write()
//!
//!  fetch()  ◄── ring.peek_latest_written()   (PictureLease, shared buffer)
//!  release() ─► ring.read()
//! ```
//!
//! [`SessionCore`] receives the parser events and owns everything the
//! callbacks touch behind one mutex. [`DecodeSession`] owns the parser
//! behind a second mutex; the lock order is always parser, then state.
//!
//! Neither lock outlives a call. A [`PictureLease`] holds a shared handle to
//! its pool buffer, and the display path writes into a held buffer only
//! after cloning it.
//!
//! The first hardware failure deactivates the session for good. Every later
//! call reports [`DecodeError::Inactive`] (or nothing) without touching the
//! hardware again.

use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, trace, warn, Dispatch, Span};

use nvb_common::{
    CompressedPacket, DecodeError, Rect, Resolution, SessionConfig, VideoCodec, WallClockMs,
};

use crate::convert::{copy_surface_to_picture, ChromaScratch, SurfaceLayout};
use crate::deferred::PendingTags;
use crate::engine::{
    with_context, DisplayInfo, HwDevice, HwVideoDecoder, MappedSurface, ParserEvents,
    ParserParams, PictureParams, SequenceReply, SourcePacket, VideoFormat, VideoParser,
};
use crate::format::{FormatUpdate, NegotiatedFormat, OutputGeometry};
use crate::picture::{PictureBuffer, PicturePool};
use crate::ring::HandoffRing;
use crate::surfaces::{decode_surface_count, DecodeOrderTable};

/// Running counters for one session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Pictures submitted to the hardware decoder.
    pub pictures_decoded: u64,
    /// Pictures copied into the handoff ring.
    pub pictures_displayed: u64,
    /// Pictures dropped because the ring was full.
    pub pictures_dropped: u64,
    pub reconfigurations: u64,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct SessionState {
    negotiated: Option<NegotiatedFormat>,
    decoder: Option<Arc<dyn HwVideoDecoder>>,
    ring: HandoffRing,
    pool: PicturePool,
    scratch: ChromaScratch,
    tags: PendingTags,
    /// Wall-clock time of the first submitted packet; the parser clock's zero.
    first_timestamp: Option<WallClockMs>,
    decode_order: DecodeOrderTable,
    /// Geometry requested through [`DecodeSession::set_output_geometry`],
    /// applied on the next sequence event.
    pending_geometry: Option<OutputGeometry>,
    stats: SessionStats,
}

/// Receiver of parser events for one session.
pub(crate) struct SessionCore {
    device: Arc<dyn HwDevice>,
    config: SessionConfig,
    span: Span,
    /// Set once, by the failure that deactivates the session.
    failure: OnceLock<DecodeError>,
    state: Mutex<SessionState>,
}

impl SessionCore {
    fn new(device: Arc<dyn HwDevice>, config: SessionConfig, span: Span) -> Self {
        let initial_surfaces = decode_surface_count(config.codec, Resolution::default());
        let state = SessionState {
            negotiated: None,
            decoder: None,
            ring: HandoffRing::new(config.buffer_depth),
            pool: PicturePool::new(config.buffer_depth),
            scratch: ChromaScratch::new(),
            tags: PendingTags::new(initial_surfaces),
            first_timestamp: None,
            decode_order: DecodeOrderTable::new(initial_surfaces),
            pending_geometry: None,
            stats: SessionStats::default(),
        };
        Self {
            device,
            config,
            span,
            failure: OnceLock::new(),
            state: Mutex::new(state),
        }
    }

    fn is_active(&self) -> bool {
        self.failure.get().is_none()
    }

    fn deactivate(&self, err: DecodeError) {
        let message = err.to_string();
        if self.failure.set(err).is_ok() {
            error!(error = %message, "Decode session deactivated");
        } else {
            debug!(error = %message, "Further failure on inactive session");
        }
    }

    fn negotiate(&self, format: &VideoFormat) -> Result<SequenceReply, DecodeError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(current) = &state.negotiated {
            current.check_compatible(format)?;
        }

        let caps = self
            .device
            .decoder_caps(format.codec, format.chroma, format.bit_depth_luma)?;
        if !caps.supported {
            return Err(DecodeError::UnsupportedFormat {
                codec: format.codec,
                chroma: format.chroma,
                bit_depth: format.bit_depth_luma,
            });
        }
        if !format.coded.fits_within(caps.max)
            || format.coded.macroblocks() > caps.max_macroblocks
        {
            return Err(DecodeError::ResolutionTooLarge {
                requested: format.coded,
                limit: caps.max,
            });
        }

        let surfaces =
            decode_surface_count(format.codec, format.coded).max(format.min_decode_surfaces);

        let Some(current) = state.negotiated.as_ref() else {
            let geometry = state
                .pending_geometry
                .take()
                .unwrap_or_else(|| OutputGeometry::from_config(&self.config));
            let max_hint = self
                .config
                .max_resolution
                .map(|hint| clamp_to(hint, caps.max));
            let negotiated = NegotiatedFormat::initial(format, geometry, max_hint, surfaces);
            let decoder = self.device.create_decoder(&negotiated.create_params())?;

            state.pool.reserve(negotiated.output, negotiated.bytes_per_sample());
            state.tags.set_capacity(surfaces);
            state.decode_order.resize(surfaces);
            info!(
                coded = %negotiated.coded,
                output = %negotiated.output,
                max = %negotiated.max,
                bit_depth = negotiated.bit_depth_luma,
                surfaces,
                "Hardware decoder created"
            );
            state.decoder = Some(decoder);
            state.negotiated = Some(negotiated);
            return Ok(SequenceReply::Surfaces(surfaces));
        };

        match current.plan_update(format, state.pending_geometry, surfaces)? {
            FormatUpdate::DriverAbsorbed => {
                debug!(coded = %format.coded, "Resolution growth left to the driver");
                Ok(SequenceReply::Accepted)
            }
            FormatUpdate::Local(next) => {
                if next.output != current.output {
                    debug!(output = %next.output, "Display area changed");
                }
                state.pool.reserve(next.output, next.bytes_per_sample());
                state.negotiated = Some(next);
                Ok(SequenceReply::Accepted)
            }
            FormatUpdate::Reconfigure { params, next } => {
                let decoder = state.decoder.clone().ok_or(DecodeError::DecoderNotReady)?;
                decoder
                    .reconfigure(&params)
                    .map_err(|e| DecodeError::ReconfigureFailed(e.to_string()))?;

                state.pool.reserve(next.output, next.bytes_per_sample());
                state.tags.set_capacity(surfaces);
                state.decode_order.resize(surfaces);
                state.pending_geometry = None;
                state.stats.reconfigurations += 1;
                info!(
                    coded = %next.coded,
                    target = %next.target,
                    output = %next.output,
                    surfaces,
                    "Hardware decoder reconfigured"
                );
                state.negotiated = Some(next);
                Ok(SequenceReply::Surfaces(surfaces))
            }
        }
    }

    fn display(&self, info: &DisplayInfo) -> Result<(), DecodeError> {
        let decoder = self
            .state
            .lock()
            .decoder
            .clone()
            .ok_or(DecodeError::DecoderNotReady)?;

        let surface = decoder.map(info)?;

        match decoder.decode_status(info.picture_index) {
            Ok(status) if status.is_damaged() => {
                let order = self.state.lock().decode_order.lookup(info.picture_index);
                warn!(
                    picture_index = info.picture_index,
                    decode_order = ?order,
                    status = ?status,
                    "Picture decoded with errors"
                );
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Decode status unavailable"),
        }

        let stored = self.store_picture(decoder.as_ref(), &surface, info);
        let unmapped = decoder.unmap(surface);
        stored?;
        unmapped?;
        Ok(())
    }

    /// Copy a mapped surface into the next ring slot. A full ring drops the
    /// picture and still succeeds.
    fn store_picture(
        &self,
        decoder: &dyn HwVideoDecoder,
        surface: &MappedSurface,
        info: &DisplayInfo,
    ) -> Result<(), DecodeError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let format = state.negotiated.as_ref().ok_or(DecodeError::DecoderNotReady)?;
        let layout = SurfaceLayout {
            output: format.output,
            surface_height: format.target.height,
            bytes_per_sample: format.bytes_per_sample(),
        };

        let slot = match state.ring.write() {
            Ok(slot) => slot,
            Err(e) => {
                state.stats.pictures_dropped += 1;
                warn!(
                    picture_index = info.picture_index,
                    dropped = state.stats.pictures_dropped,
                    "{e}"
                );
                return Ok(());
            }
        };

        let tag = state.tags.take(info.timestamp).unwrap_or_default();
        let timestamp = state
            .first_timestamp
            .unwrap_or_default()
            .advanced_by(info.timestamp);

        let picture = &mut state.pool[slot];
        let scratch = &mut state.scratch;
        with_context(decoder, || {
            copy_surface_to_picture(decoder, surface, layout, &mut *scratch, &mut *picture)?;
            Ok(())
        })?;
        picture.stamp(tag, timestamp);
        state.stats.pictures_displayed += 1;

        trace!(
            slot,
            picture_index = info.picture_index,
            timestamp = timestamp.0,
            "Picture ready"
        );
        Ok(())
    }
}

impl ParserEvents for SessionCore {
    fn on_sequence(&self, format: &VideoFormat) -> SequenceReply {
        if !self.is_active() {
            return SequenceReply::Failed;
        }
        info!(
            codec = format.codec.display_name(),
            coded = %format.coded,
            display_area = %format.display_area,
            chroma = format.chroma.display_name(),
            bit_depth = format.bit_depth_luma,
            "Sequence header"
        );
        match self.negotiate(format) {
            Ok(reply) => reply,
            Err(e) => {
                self.deactivate(e);
                SequenceReply::Failed
            }
        }
    }

    fn on_decode(&self, params: &mut PictureParams) -> bool {
        if !self.is_active() {
            return false;
        }
        let decoder = {
            let mut state = self.state.lock();
            let Some(decoder) = state.decoder.clone() else {
                drop(state);
                self.deactivate(DecodeError::DecoderNotReady);
                return false;
            };
            let order = state.decode_order.record(params.picture_index());
            state.stats.pictures_decoded += 1;
            trace!(picture_index = params.picture_index(), decode_order = ?order, "Decode picture");
            decoder
        };
        match decoder.decode_picture(params) {
            Ok(()) => true,
            Err(e) => {
                self.deactivate(e.into());
                false
            }
        }
    }

    fn on_display(&self, info: Option<&DisplayInfo>) -> bool {
        let Some(info) = info else {
            debug!("End of stream");
            return true;
        };
        if !self.is_active() {
            return false;
        }
        match self.display(info) {
            Ok(()) => true,
            Err(e) => {
                self.deactivate(e);
                false
            }
        }
    }
}

fn clamp_to(size: Resolution, bound: Resolution) -> Resolution {
    Resolution::new(size.width.min(bound.width), size.height.min(bound.height))
}

// ---------------------------------------------------------------------------
// DecodeSession
// ---------------------------------------------------------------------------

/// Push-to-pull decode session for one compressed stream.
///
/// All methods take `&self`; the session may be shared between a submitting
/// thread and a consuming thread.
pub struct DecodeSession {
    core: Arc<SessionCore>,
    parser: Mutex<Option<Box<dyn VideoParser>>>,
    dispatch: Option<Dispatch>,
}

impl std::fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("DecodeSession")
            .field("codec", &self.core.config.codec)
            .field("device", &self.core.device.name())
            .field("active", &self.core.is_active())
            .field("negotiated", &state.negotiated.is_some())
            .field("buffered", &state.ring.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl DecodeSession {
    /// Bind a session to an opened device. The hardware decoder itself is
    /// created on the first sequence event.
    pub(crate) fn open(
        device: Arc<dyn HwDevice>,
        config: SessionConfig,
        dispatch: Option<Dispatch>,
    ) -> Result<Self, DecodeError> {
        let make_span = || {
            info_span!(
                "decode_session",
                codec = config.codec.display_name(),
                device = %device.name(),
            )
        };
        let span = match &dispatch {
            Some(d) => tracing::dispatcher::with_default(d, make_span),
            None => make_span(),
        };

        let parser_params = ParserParams {
            codec: config.codec,
            max_display_delay: config.max_display_delay,
        };
        let core = Arc::new(SessionCore::new(device.clone(), config, span));
        let events: Arc<dyn ParserEvents> = core.clone();
        let session = Self {
            core,
            parser: Mutex::new(None),
            dispatch,
        };

        let parser = session.scoped(|| {
            let parser = device.create_parser(&parser_params, events)?;
            info!(
                depth = session.core.config.buffer_depth,
                delay = parser_params.max_display_delay,
                "Decode session opened"
            );
            Ok::<_, DecodeError>(parser)
        })?;
        *session.parser.lock() = Some(parser);
        Ok(session)
    }

    fn scoped<R>(&self, f: impl FnOnce() -> R) -> R {
        let span = &self.core.span;
        match &self.dispatch {
            Some(d) => tracing::dispatcher::with_default(d, || span.in_scope(f)),
            None => span.in_scope(f),
        }
    }

    /// Hand one compressed packet to the parser.
    ///
    /// Callbacks run synchronously inside this call. Returns whether a
    /// picture is waiting in the ring afterwards.
    pub fn submit(&self, packet: &CompressedPacket<'_>) -> Result<bool, DecodeError> {
        self.scoped(|| {
            if !self.core.is_active() {
                return Err(DecodeError::Inactive);
            }
            let mut parser = self.parser.lock();
            let parser = parser.as_mut().ok_or(DecodeError::Inactive)?;

            let ticks = {
                let mut state = self.core.state.lock();
                let origin = *state.first_timestamp.get_or_insert(packet.timestamp);
                let ticks = packet.timestamp.ticks_since(origin);
                state.tags.push(ticks, packet.tag);
                ticks
            };
            trace!(bytes = packet.data.len(), ticks = ticks.0, "Submit packet");

            if let Err(e) = parser.parse(&SourcePacket::new(packet.data, ticks)) {
                self.core.deactivate(e.into());
            }
            if let Some(e) = self.core.failure.get() {
                return Err(e.clone());
            }
            Ok(!self.core.state.lock().ring.is_empty())
        })
    }

    /// Borrow the most recently completed picture.
    ///
    /// The session lock is released before this returns, so the caller may
    /// keep the lease across [`DecodeSession::release`] and `submit`.
    pub fn fetch(&self) -> Option<PictureLease<'_>> {
        self.scoped(|| {
            if !self.core.is_active() {
                return None;
            }
            let state = self.core.state.lock();
            if state.ring.is_empty() {
                return None;
            }
            let slot = state.ring.peek_latest_written()?;
            let picture = state.pool.share(slot)?;
            Some(PictureLease {
                session: self,
                picture,
                slot,
            })
        })
    }

    /// Free the oldest outstanding picture for reuse.
    pub fn release(&self) -> Result<(), DecodeError> {
        self.scoped(|| {
            if !self.core.is_active() {
                return Err(DecodeError::Inactive);
            }
            let slot = self.core.state.lock().ring.read()?;
            trace!(slot, "Released picture");
            Ok(())
        })
    }

    /// Discard every buffered picture. The hardware decoder is untouched.
    pub fn flush(&self) -> Result<(), DecodeError> {
        self.scoped(|| {
            if !self.core.is_active() {
                return Err(DecodeError::Inactive);
            }
            let mut state = self.core.state.lock();
            let discarded = state.ring.len();
            state.ring.reset();
            debug!(discarded, "Flushed handoff ring");
            Ok(())
        })
    }

    /// Signal end of stream so the parser emits every picture it holds back.
    pub fn drain(&self) -> Result<(), DecodeError> {
        self.scoped(|| {
            if !self.core.is_active() {
                return Err(DecodeError::Inactive);
            }
            let mut parser = self.parser.lock();
            let parser = parser.as_mut().ok_or(DecodeError::Inactive)?;
            if let Err(e) = parser.parse(&SourcePacket::end_of_stream()) {
                self.core.deactivate(e.into());
            }
            match self.core.failure.get() {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        })
    }

    /// Request a new crop and output size. Takes effect on the next
    /// sequence event, which reconfigures the decoder.
    pub fn set_output_geometry(
        &self,
        crop: Option<Rect>,
        resize: Option<Resolution>,
    ) -> Result<(), DecodeError> {
        if crop.is_some_and(Rect::is_empty) {
            return Err(DecodeError::InvalidConfig("crop rectangle is empty".into()));
        }
        if resize.is_some_and(Resolution::is_empty) {
            return Err(DecodeError::InvalidConfig("resize target is empty".into()));
        }
        self.scoped(|| {
            self.core.state.lock().pending_geometry = Some(OutputGeometry { crop, resize });
            debug!(?crop, ?resize, "Output geometry change pending");
        });
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// The failure that deactivated the session, if any.
    pub fn failure(&self) -> Option<DecodeError> {
        self.core.failure.get().cloned()
    }

    pub fn stats(&self) -> SessionStats {
        self.core.state.lock().stats
    }

    pub fn negotiated_format(&self) -> Option<NegotiatedFormat> {
        self.core.state.lock().negotiated.clone()
    }

    /// Pictures written but not yet released.
    pub fn buffered(&self) -> usize {
        self.core.state.lock().ring.len()
    }

    pub fn codec(&self) -> VideoCodec {
        self.core.config.codec
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    pub fn device_name(&self) -> &str {
        self.core.device.name()
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        // The parser goes first: destroying it may still fire callbacks.
        let parser = self.parser.get_mut().take();
        self.scoped(|| {
            drop(parser);
            let mut state = self.core.state.lock();
            state.ring.reset();
            let decoder = state.decoder.take();
            drop(decoder);
            info!(
                decoded = state.stats.pictures_decoded,
                displayed = state.stats.pictures_displayed,
                dropped = state.stats.pictures_dropped,
                reconfigurations = state.stats.reconfigurations,
                "Decode session closed"
            );
        });
    }
}

// ---------------------------------------------------------------------------
// PictureLease
// ---------------------------------------------------------------------------

/// A borrowed picture from [`DecodeSession::fetch`].
///
/// The planes stay valid for as long as the lease lives, even after the slot
/// is released and rewritten.
pub struct PictureLease<'a> {
    session: &'a DecodeSession,
    picture: Arc<PictureBuffer>,
    slot: usize,
}

impl PictureLease<'_> {
    /// Pool slot the picture lives in.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Free the oldest outstanding picture and drop the lease.
    pub fn release(self) -> Result<(), DecodeError> {
        self.session.release()
    }

    /// Detach the picture from the session.
    pub fn into_shared(self) -> Arc<PictureBuffer> {
        self.picture
    }
}

impl Deref for PictureLease<'_> {
    type Target = PictureBuffer;

    fn deref(&self) -> &PictureBuffer {
        &self.picture
    }
}

impl std::fmt::Debug for PictureLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PictureLease")
            .field("slot", &self.slot)
            .field("picture", &**self)
            .finish()
    }
}
