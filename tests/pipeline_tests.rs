// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the video and audio pipelines and the session

mod support;

use camrec::clock;
use camrec::constants::{MAX_PENDING_FRAMES, SAMPLES_PER_FRAME, frames_to_micros};
use camrec::errors::{CaptureError, EncoderError, RecorderError};
use camrec::gpu::raster::ExternalTextures;
use camrec::gpu::{GraphicsBackend, IDENTITY_TRANSFORM};
use camrec::media::encoders::EncoderFactory;
use camrec::media::sample::StreamKind;
use camrec::pipelines::audio::jitter::JitterCorrector;
use camrec::pipelines::{AudioPipeline, MuxerFinished, RecordingSession};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use support::{
    CountingGraphics, LoopbackFactory, RecordingWriter, ScriptedCapture, WriterEvent,
    session_config, wait_until,
};

const CHUNK: u64 = SAMPLES_PER_FRAME as u64;
const TEXTURE: u32 = 1;
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    _dir: tempfile::TempDir,
    writer: RecordingWriter,
    factory: Arc<LoopbackFactory>,
    graphics: Arc<CountingGraphics>,
    textures: ExternalTextures,
    finished: Receiver<MuxerFinished>,
    session: RecordingSession,
}

fn harness(factory: LoopbackFactory) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::new();
    let config = session_config(dir.path(), &writer);
    let finished = config.muxer().finished_channel();

    let factory = Arc::new(factory);
    let graphics = Arc::new(CountingGraphics::default());
    let (capture, _) = ScriptedCapture::new();
    let session = RecordingSession::new(
        config,
        Arc::clone(&factory) as Arc<dyn EncoderFactory>,
        Arc::clone(&graphics) as Arc<dyn GraphicsBackend>,
        Box::new(capture),
    )
    .unwrap();

    let textures = ExternalTextures::new();
    textures.update(TEXTURE, 16, 12, vec![200; 16 * 12 * 4]);
    session.set_texture(TEXTURE);

    Harness {
        _dir: dir,
        writer,
        factory,
        graphics,
        textures,
        finished,
        session,
    }
}

impl Harness {
    /// Offer `count` frames, paced so the video thread keeps up
    fn feed_frames(&self, count: usize) {
        for _ in 0..count {
            self.session
                .frame_available(IDENTITY_TRANSFORM, clock::monotonic_ns());
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn track_of(&self, kind: StreamKind) -> Option<usize> {
        self.writer.events().into_iter().find_map(|e| match e {
            WriterEvent::AddTrack(index, k) if k == kind => Some(index),
            _ => None,
        })
    }
}

// ===== Jitter correction =====

#[test]
fn test_zero_jitter_timeline_is_arithmetic() {
    let mut corrector = JitterCorrector::new(44_100);
    let step = frames_to_micros(CHUNK, 44_100);
    assert_eq!(step, 23_219);

    // Each chunk arrives exactly one chunk duration after the previous one started
    let raw = [23_219, 46_439, 69_659, 92_879];
    let corrected: Vec<i64> = raw.iter().map(|&r| corrector.correct(r, CHUNK)).collect();

    assert_eq!(corrected, vec![0, 23_219, 46_439, 69_659]);
    assert_eq!(corrector.total_frames(), 4 * CHUNK);
}

#[test]
fn test_drift_of_two_chunks_resynchronizes() {
    let mut corrector = JitterCorrector::new(44_100);
    assert_eq!(corrector.correct(23_219, CHUNK), 0);

    // Just under two chunk durations ahead: stay on the arithmetic timeline
    assert_eq!(corrector.correct(92_875, CHUNK), 23_219);
    assert_eq!(corrector.total_frames(), 2 * CHUNK);

    let mut corrector = JitterCorrector::new(44_100);
    corrector.correct(23_219, CHUNK);
    // Exactly two chunk durations ahead: re-anchor on the capture clock
    assert_eq!(corrector.correct(92_876, CHUNK), 69_657);
    assert_eq!(corrector.total_frames(), CHUNK);
    assert_eq!(corrector.start_pts(), 69_657);

    // The new timeline continues from the new anchor
    assert_eq!(corrector.correct(92_876 + 23_219, CHUNK), 69_657 + 23_219);
}

// ===== Audio pipeline =====

#[test]
fn test_audio_timestamps_follow_frame_count() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::new();
    let config = Arc::new(session_config(dir.path(), &writer));
    let factory = Arc::new(LoopbackFactory::default());
    let (capture, stats) = ScriptedCapture::new();

    let mut audio = AudioPipeline::new(
        Arc::clone(&config),
        Arc::clone(&factory) as Arc<dyn EncoderFactory>,
        Box::new(capture),
    )
    .unwrap();
    assert!(stats.started.load(Ordering::SeqCst));

    audio.start_recording();
    let log = factory.audio_log(0);
    assert!(wait_until(WAIT, || log.inputs().len() >= 6));
    audio.stop_recording();
    audio.wait_for_completion();

    assert!(audio.take_error().is_none());
    assert!(!audio.is_recording());
    assert!(stats.stopped.load(Ordering::SeqCst));
    assert_eq!(log.released(), 1);
    assert_eq!(log.end_of_input(), 1);

    // Reads come far faster than real time, so the capture clock never gets
    // ahead and the timeline stays arithmetic
    let inputs = log.inputs();
    // The first buffer is back-dated from a clock reading that never starts at zero
    assert!(inputs[0] > 0);
    for pair in inputs.windows(2) {
        let step = pair[1] - pair[0];
        assert!(step == 23_219 || step == 23_220, "step {}", step);
    }
}

#[test]
fn test_audio_cancelled_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::new();
    let config = Arc::new(session_config(dir.path(), &writer));
    let factory = Arc::new(LoopbackFactory::default());
    let (capture, stats) = ScriptedCapture::new();

    let mut audio = AudioPipeline::new(
        config,
        Arc::clone(&factory) as Arc<dyn EncoderFactory>,
        Box::new(capture),
    )
    .unwrap();
    audio.stop_recording();
    audio.wait_for_completion();

    assert!(stats.stopped.load(Ordering::SeqCst));
    assert_eq!(stats.reads.load(Ordering::SeqCst), 0);
    assert!(factory.audio_log(0).inputs().is_empty());
    assert_eq!(factory.audio_log(0).released(), 1);
    assert!(audio.take_error().is_none());
}

#[test]
fn test_audio_device_failure_surfaces_from_new() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::new();
    let config = Arc::new(session_config(dir.path(), &writer));
    let factory = Arc::new(LoopbackFactory::default());

    let result = AudioPipeline::new(
        config,
        Arc::clone(&factory) as Arc<dyn EncoderFactory>,
        Box::new(ScriptedCapture::failing()),
    );

    assert!(matches!(
        result,
        Err(RecorderError::Capture(CaptureError::OpenFailed(_)))
    ));
    assert_eq!(factory.audio_log(0).released(), 1);
}

// ===== Session =====

#[test]
fn test_session_records_both_tracks() {
    let mut h = harness(LoopbackFactory::default());
    h.session.start(h.textures.shared_context(7)).unwrap();

    let muxer = h.session.config().muxer().clone();
    h.feed_frames(3);
    assert!(wait_until(WAIT, || muxer.is_started()));
    h.feed_frames(5);

    let path = h.session.stop().unwrap();
    assert_eq!(path, h.session.config().output_path());
    assert!(!h.session.is_recording());

    let event = h.finished.recv_timeout(WAIT).unwrap();
    assert!(event.finalized);
    assert!(!event.forced);

    assert_eq!(h.writer.count(&WriterEvent::Start), 1);
    assert_eq!(h.writer.count(&WriterEvent::Stop), 1);
    assert_eq!(h.writer.count(&WriterEvent::Release), 0);

    let video = h.track_of(StreamKind::Video).unwrap();
    let audio = h.track_of(StreamKind::Audio).unwrap();
    for track in [video, audio] {
        let stamps = h.writer.timestamps(track);
        assert!(!stamps.is_empty());
        assert!(stamps.windows(2).all(|w| w[1] > w[0]));
    }

    assert_eq!(h.factory.video_log(0).released(), 1);
    assert_eq!(h.factory.audio_log(0).released(), 1);
    assert_eq!(h.graphics.log().last().map(String::as_str), Some("release 7"));
}

#[test]
fn test_zero_timestamp_frame_is_dropped() {
    let mut h = harness(LoopbackFactory::default());
    h.session.start(h.textures.shared_context(7)).unwrap();
    assert!(wait_until(WAIT, || h.factory.video_encoders_created() == 1));
    let log = h.factory.video_log(0);

    h.session.frame_available(IDENTITY_TRANSFORM, 0);
    std::thread::sleep(Duration::from_millis(20));
    h.session.frame_available(IDENTITY_TRANSFORM, 0);
    std::thread::sleep(Duration::from_millis(20));
    h.session.frame_available(IDENTITY_TRANSFORM, 5_000_000);
    assert!(wait_until(WAIT, || !log.inputs().is_empty()));

    // Only the stamped frame reached the encoder
    assert_eq!(log.inputs(), vec![5_000]);
    let draws = h.graphics.log().iter().filter(|l| l.starts_with("draw")).count();
    assert_eq!(draws, 1);

    h.session.stop().unwrap();
}

#[test]
fn test_busy_video_thread_drops_frames_without_blocking() {
    let mut h = harness(LoopbackFactory::default());
    h.session.start(h.textures.shared_context(7)).unwrap();
    assert!(wait_until(WAIT, || h.factory.video_encoders_created() == 1));
    let log = h.factory.video_log(0);

    // Hold the video thread inside its first draw
    h.graphics.gate.close();
    h.session
        .frame_available(IDENTITY_TRANSFORM, clock::monotonic_ns());
    assert!(wait_until(WAIT, || {
        h.graphics.log().iter().any(|l| l.starts_with("draw"))
    }));

    let offered = Instant::now();
    for _ in 0..10 {
        h.session
            .frame_available(IDENTITY_TRANSFORM, clock::monotonic_ns());
    }
    assert!(offered.elapsed() < Duration::from_millis(500));
    assert!(log.inputs().is_empty());

    h.graphics.gate.open();
    assert!(wait_until(WAIT, || log.inputs().len() == MAX_PENDING_FRAMES + 1));
    std::thread::sleep(Duration::from_millis(50));
    h.session.stop().unwrap();

    // One frame in the draw plus the queued ones, the rest were dropped
    assert_eq!(log.inputs().len(), MAX_PENDING_FRAMES + 1);
    let draws = h.graphics.log().iter().filter(|l| l.starts_with("draw")).count();
    assert_eq!(draws, MAX_PENDING_FRAMES + 1);
}

#[test]
fn test_stuck_video_encoder_forces_stop() {
    let mut h = harness(LoopbackFactory {
        video_never_ends: true,
        ..Default::default()
    });
    h.session.start(h.textures.shared_context(7)).unwrap();

    let muxer = h.session.config().muxer().clone();
    h.feed_frames(3);
    assert!(wait_until(WAIT, || muxer.is_started()));

    h.session.stop().unwrap();

    let event = h.finished.recv_timeout(WAIT).unwrap();
    assert!(event.forced);
    assert!(event.finalized);
    assert!(muxer.is_released());
    assert_eq!(h.writer.count(&WriterEvent::Stop), 1);

    let video = h.factory.video_log(0);
    assert_eq!(video.end_of_input(), 1);
    assert_eq!(video.released(), 1);
    assert_eq!(h.factory.audio_log(0).released(), 1);
}

#[test]
fn test_video_encoder_failure_reported_on_stop() {
    let mut h = harness(LoopbackFactory {
        fail_video: true,
        ..Default::default()
    });
    h.session.start(h.textures.shared_context(7)).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let result = h.session.stop();
    assert!(matches!(
        result,
        Err(RecorderError::Encoder(EncoderError::CreationFailed(_)))
    ));

    // Only audio registered, so the container never started
    let event = h.finished.recv_timeout(WAIT).unwrap();
    assert!(!event.started);
    assert_eq!(h.writer.count(&WriterEvent::Release), 1);
    assert_eq!(h.writer.count(&WriterEvent::Stop), 0);
}

#[test]
fn test_rebind_releases_old_context_first() {
    let mut h = harness(LoopbackFactory::default());
    h.session.start(h.textures.shared_context(7)).unwrap();
    h.feed_frames(2);
    assert!(wait_until(WAIT, || {
        h.graphics.log().iter().any(|l| l == "draw 7")
    }));

    h.session.rebind_context(h.textures.shared_context(8));
    h.feed_frames(2);
    assert!(wait_until(WAIT, || {
        h.graphics.log().iter().any(|l| l == "draw 8")
    }));
    h.session.stop().unwrap();

    let log = h.graphics.log();
    let position = |entry: &str| log.iter().position(|l| l == entry).unwrap();
    assert!(position("release 7") < position("create 8"));
    assert!(position("create 8") < position("draw 8"));
    assert_eq!(log.iter().filter(|l| l.starts_with("create")).count(), 2);
    assert_eq!(log.last().map(String::as_str), Some("release 8"));
    // The encoder survives the rebind
    assert_eq!(h.factory.video_encoders_created(), 1);
}

#[test]
fn test_session_reset_switches_muxer() {
    let mut h = harness(LoopbackFactory::default());
    let first = h.session.config().muxer().clone();

    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::new();
    let (capture, _) = ScriptedCapture::new();
    h.session
        .reset(session_config(dir.path(), &writer), Box::new(capture))
        .unwrap();

    assert!(first.is_released());
    assert!(!h.session.config().muxer().same_muxer(&first));
    assert!(!h.session.config().muxer().is_released());
    assert_eq!(h.factory.audio_logs.lock().unwrap().len(), 2);
}
