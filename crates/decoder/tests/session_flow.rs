//! End-to-end session tests against the scripted engine in `support`.
//!
//! Every test goes through the public surface only: a [`SessionFactory`]
//! over a scripted provider, then submit / fetch / release / flush / drain.

mod support;

use std::io;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use nvb_common::{
    CompressedPacket, DecodeError, PacketTag, Rect, Resolution, SessionConfig, VideoCodec,
    WallClockMs,
};
use nvb_decoder::{DecodeSession, SessionFactory};

use support::{
    delayed_picture, luma_for, picture, sequence, sequence_with_depth, ScriptedProvider, CB, CR,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open(config: SessionConfig, max: Resolution) -> (DecodeSession, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::new(max));
    let factory = SessionFactory::new(provider.clone());
    let session = factory
        .create_session(&config)
        .expect("scripted session should open");
    (session, provider)
}

fn h264(depth: usize) -> SessionConfig {
    SessionConfig::new(VideoCodec::H264).with_buffer_depth(depth)
}

fn uhd() -> Resolution {
    Resolution::new(4096, 4096)
}

fn submit(session: &DecodeSession, data: &[u8], ms: i64) -> Result<bool, DecodeError> {
    session.submit(&CompressedPacket::new(data, WallClockMs(ms)))
}

/// Shared in-memory log sink for a JSON `fmt` subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn lines(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line is JSON"))
            .collect()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ── Timestamps and tags ──

#[test]
fn timestamps_rebase_to_first_packet() {
    let (session, _) = open(h264(4), uhd());
    assert!(!submit(&session, &sequence(64, 48), 10_000).unwrap());
    assert!(submit(&session, &picture(), 10_500).unwrap());

    let picture = session.fetch().expect("picture ready");
    assert_eq!(picture.timestamp(), WallClockMs(10_500));
}

#[test]
fn first_picture_lands_on_the_first_timestamp() {
    let (session, _) = open(h264(4), uhd());
    submit(&session, &sequence(64, 48), 2_000).unwrap();
    submit(&session, &picture(), 2_000).unwrap();
    assert_eq!(session.fetch().unwrap().timestamp(), WallClockMs(2_000));
}

#[test]
fn tags_follow_their_packets() {
    let (session, _) = open(h264(4), uhd());
    submit(&session, &sequence(64, 48), 0).unwrap();

    let packet = picture();
    session
        .submit(&CompressedPacket::new(&packet, WallClockMs(40)).with_tag(PacketTag::new(3, 1)))
        .unwrap();

    let lease = session.fetch().unwrap();
    assert_eq!(lease.tag(), PacketTag::new(3, 1));
    assert_eq!(lease.timestamp(), WallClockMs(40));
}

#[test]
fn delayed_display_keeps_its_own_tag() {
    let (session, _) = open(h264(4), uhd());
    submit(&session, &sequence(64, 48), 0).unwrap();

    let held = delayed_picture(1);
    let next = picture();
    assert!(!session
        .submit(&CompressedPacket::new(&held, WallClockMs(40)).with_tag(PacketTag::new(1, 0)))
        .unwrap());
    assert!(session
        .submit(&CompressedPacket::new(&next, WallClockMs(80)).with_tag(PacketTag::new(2, 0)))
        .unwrap());
    assert_eq!(session.buffered(), 2);

    // Fetch shows the latest picture; release frees the oldest.
    {
        let latest = session.fetch().unwrap();
        assert_eq!(latest.tag(), PacketTag::new(2, 0));
        assert_eq!(latest.timestamp(), WallClockMs(80));
        latest.release().unwrap();
    }
    assert_eq!(session.buffered(), 1);
}

// ── Planes ──

#[test]
fn pictures_are_planar() {
    let (session, _) = open(h264(2), uhd());
    submit(&session, &sequence(33, 17), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();

    let lease = session.fetch().unwrap();
    assert_eq!(lease.size(), Resolution::new(33, 17));
    assert_eq!(lease.chroma_size(), Resolution::new(17, 9));
    assert!(lease.y().iter().all(|&b| b == luma_for(0)));
    assert!(lease.u().iter().all(|&b| b == CB));
    assert!(lease.v().iter().all(|&b| b == CR));
}

#[test]
fn high_bit_depth_uses_two_byte_samples() {
    let (session, provider) = open(SessionConfig::new(VideoCodec::H265), uhd());
    submit(&session, &sequence_with_depth(32, 16, 10), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();

    let created = provider.calls.lock().created[0].clone();
    assert_eq!(created.bit_depth_luma, 10);

    let lease = session.fetch().unwrap();
    assert_eq!(lease.bytes_per_sample(), 2);
    assert_eq!(lease.y_stride(), 64);
    assert_eq!(lease.u().len(), 32 * 8);
}

#[test]
fn configured_crop_sets_output_size() {
    let config = h264(2).with_crop(Rect::new(0, 0, 32, 16));
    let (session, provider) = open(config, uhd());
    submit(&session, &sequence(64, 48), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();

    let created = provider.calls.lock().created[0].clone();
    assert_eq!(created.display_area, Rect::new(0, 0, 32, 16));
    assert_eq!(created.target, Resolution::new(32, 16));
    assert_eq!(session.fetch().unwrap().size(), Resolution::new(32, 16));
}

// ── Reconfiguration ──

#[test]
fn resolution_change_within_max_reconfigures() {
    let config = h264(4).with_max_resolution(Resolution::new(1920, 1080));
    let (session, provider) = open(config, uhd());
    submit(&session, &sequence(640, 480), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();
    submit(&session, &sequence(1280, 720), 80).unwrap();
    assert!(submit(&session, &picture(), 120).unwrap());

    assert!(session.is_active());
    let calls = provider.calls.lock();
    assert_eq!(calls.created.len(), 1);
    assert_eq!(calls.created[0].max, Resolution::new(1920, 1080));
    assert_eq!(calls.reconfigured.len(), 1);
    assert_eq!(calls.reconfigured[0].coded, Resolution::new(1280, 720));
    drop(calls);

    assert_eq!(session.stats().reconfigurations, 1);
    assert_eq!(
        session.negotiated_format().map(|f| f.coded),
        Some(Resolution::new(1280, 720))
    );
}

#[test]
fn geometry_change_applies_on_next_sequence() {
    let (session, provider) = open(h264(4), uhd());
    submit(&session, &sequence(64, 48), 0).unwrap();
    session
        .set_output_geometry(None, Some(Resolution::new(32, 24)))
        .unwrap();
    submit(&session, &sequence(64, 48), 40).unwrap();
    submit(&session, &picture(), 80).unwrap();

    let reconfigured = provider.calls.lock().reconfigured.clone();
    assert_eq!(reconfigured.len(), 1);
    assert_eq!(reconfigured[0].target, Resolution::new(32, 24));
    assert_eq!(session.fetch().unwrap().size(), Resolution::new(32, 24));
}

#[test]
fn empty_geometry_rejected() {
    let (session, _) = open(h264(4), uhd());
    assert!(matches!(
        session.set_output_geometry(Some(Rect::new(4, 4, 4, 4)), None),
        Err(DecodeError::InvalidConfig(_))
    ));
}

#[test]
fn bit_depth_change_deactivates_for_good() {
    let (session, provider) = open(SessionConfig::new(VideoCodec::H265), uhd());
    submit(&session, &sequence(64, 48), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();

    let err = submit(&session, &sequence_with_depth(64, 48, 10), 80).unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedReconfiguration(_)));
    assert!(!session.is_active());
    assert_eq!(session.failure(), Some(err));

    let before = provider.calls.lock().hardware_calls();
    assert_eq!(submit(&session, &picture(), 120), Err(DecodeError::Inactive));
    assert!(session.fetch().is_none());
    assert_eq!(session.release(), Err(DecodeError::Inactive));
    assert_eq!(session.drain(), Err(DecodeError::Inactive));
    assert_eq!(session.flush(), Err(DecodeError::Inactive));
    assert_eq!(provider.calls.lock().hardware_calls(), before);
}

#[test]
fn oversized_first_sequence_deactivates() {
    let (session, provider) = open(h264(4), Resolution::new(1920, 1080));
    let err = submit(&session, &sequence(3840, 2160), 0).unwrap_err();
    assert!(matches!(err, DecodeError::ResolutionTooLarge { .. }));
    assert!(provider.calls.lock().created.is_empty());
}

// ── Ring behaviour ──

#[test]
fn full_ring_drops_without_deactivating() {
    let (session, provider) = open(h264(2), uhd());
    submit(&session, &sequence(16, 16), 0).unwrap();
    for ms in [40, 80, 120] {
        assert!(submit(&session, &picture(), ms).unwrap());
    }

    assert!(session.is_active());
    assert_eq!(session.buffered(), 2);
    let stats = session.stats();
    assert_eq!(stats.pictures_dropped, 1);
    assert_eq!(stats.pictures_displayed, 2);
    assert_eq!(stats.pictures_decoded, 3);
    assert_eq!(provider.calls.lock().unmapped, 3);
}

#[test]
fn released_slots_are_reused_oldest_first() {
    let (session, _) = open(h264(3), uhd());
    submit(&session, &sequence(16, 16), 0).unwrap();
    for ms in [40, 80, 120] {
        submit(&session, &picture(), ms).unwrap();
    }
    {
        let latest = session.fetch().unwrap();
        assert_eq!(latest.slot(), 2);
        assert!(latest.y().iter().all(|&b| b == luma_for(2)));
    }

    // Freeing one slot frees slot 0, so the next picture lands there.
    session.release().unwrap();
    submit(&session, &picture(), 160).unwrap();
    let latest = session.fetch().unwrap();
    assert_eq!(latest.slot(), 0);
    assert!(latest.y().iter().all(|&b| b == luma_for(3)));
}

#[test]
fn release_while_holding_a_picture() {
    let (session, _) = open(h264(1), uhd());
    submit(&session, &sequence(16, 16), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();

    let Some(held) = session.fetch() else {
        panic!("picture ready");
    };
    session.release().unwrap();
    assert_eq!(session.buffered(), 0);

    // The freed slot is rewritten while the old picture is still held.
    assert!(submit(&session, &picture(), 80).unwrap());
    assert!(held.y().iter().all(|&b| b == luma_for(0)));
    assert_eq!(held.timestamp(), WallClockMs(40));

    let latest = session.fetch().unwrap();
    assert_eq!(latest.slot(), 0);
    assert!(latest.y().iter().all(|&b| b == luma_for(1)));
}

#[test]
fn held_picture_does_not_block_submit() {
    let (session, _) = open(h264(4), uhd());
    let session = Arc::new(session);
    submit(&session, &sequence(16, 16), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();

    let held = session.fetch().unwrap();
    let (tx, rx) = mpsc::channel();
    let worker = {
        let session = session.clone();
        std::thread::spawn(move || {
            let submitted = submit(&session, &picture(), 80);
            let released = session.release();
            let _ = tx.send((submitted, released));
        })
    };

    let (submitted, released) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("submit and release finish while a picture is held");
    assert_eq!(submitted, Ok(true));
    assert_eq!(released, Ok(()));
    worker.join().unwrap();

    assert_eq!(held.slot(), 0);
    assert!(held.y().iter().all(|&b| b == luma_for(0)));
    assert_eq!(session.buffered(), 1);
}

#[test]
fn release_without_pictures_underflows() {
    let (session, _) = open(h264(2), uhd());
    assert!(session.fetch().is_none());
    assert_eq!(session.release(), Err(DecodeError::Underflow));
    assert!(session.is_active());
}

#[test]
fn flush_is_idempotent() {
    let (session, provider) = open(h264(3), uhd());
    submit(&session, &sequence(16, 16), 0).unwrap();
    submit(&session, &picture(), 40).unwrap();
    submit(&session, &picture(), 80).unwrap();

    let before = provider.calls.lock().hardware_calls();
    session.flush().unwrap();
    session.flush().unwrap();
    assert_eq!(session.buffered(), 0);
    assert!(session.fetch().is_none());
    assert_eq!(session.release(), Err(DecodeError::Underflow));
    assert_eq!(provider.calls.lock().hardware_calls(), before);

    // Decoding carries on after a flush.
    assert!(submit(&session, &picture(), 120).unwrap());
    assert_eq!(session.fetch().unwrap().slot(), 0);
}

#[test]
fn drain_emits_held_pictures() {
    let (session, provider) = open(h264(3), uhd());
    submit(&session, &sequence(16, 16), 0).unwrap();
    assert!(!submit(&session, &delayed_picture(2), 40).unwrap());

    session.drain().unwrap();
    assert_eq!(session.buffered(), 1);
    assert_eq!(provider.calls.lock().end_of_stream, 1);
}

#[test]
fn consumer_thread_sees_every_surviving_picture() {
    let (session, _) = open(h264(4), uhd());
    submit(&session, &sequence(16, 16), 0).unwrap();

    let released = std::thread::scope(|scope| {
        let consumer = scope.spawn(|| {
            let mut released = 0u64;
            for _ in 0..10_000 {
                if session.release().is_ok() {
                    released += 1;
                }
                std::thread::yield_now();
            }
            released
        });
        for i in 1..=50 {
            submit(&session, &picture(), i * 40).unwrap();
        }
        consumer.join().unwrap()
    });

    let stats = session.stats();
    assert_eq!(stats.pictures_decoded, 50);
    assert_eq!(stats.pictures_displayed + stats.pictures_dropped, 50);
    assert_eq!(released + session.buffered() as u64, stats.pictures_displayed);
}

// ── Factory and logging ──

#[test]
fn factory_rejects_missing_device() {
    let factory = SessionFactory::new(Arc::new(ScriptedProvider::new(uhd())));
    assert_eq!(factory.devices(), Ok(vec!["Scripted GPU 0".to_string()]));
    assert!(matches!(
        factory.create_session(&h264(2).with_device(3)),
        Err(DecodeError::DeviceUnavailable { ordinal: 3, count: 1 })
    ));
}

#[test]
fn session_logs_go_to_injected_dispatch() {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    let factory =
        SessionFactory::new(Arc::new(ScriptedProvider::new(uhd()))).with_dispatch(dispatch);
    let session = factory.create_session(&h264(2)).unwrap();
    // 14-bit streams are outside the scripted device's caps.
    assert!(submit(&session, &sequence_with_depth(64, 48, 14), 0).is_err());
    drop(session);

    let lines = buffer.lines();
    let deactivated = lines
        .iter()
        .find(|line| line["fields"]["message"] == "Decode session deactivated")
        .expect("deactivation logged");
    assert_eq!(deactivated["level"], "ERROR");
    assert_eq!(deactivated["span"]["name"], "decode_session");
    assert_eq!(deactivated["span"]["device"], "Scripted GPU 0");

    assert!(lines
        .iter()
        .any(|line| line["fields"]["message"] == "Decode session closed"));
}
