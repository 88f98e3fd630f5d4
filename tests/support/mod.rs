// SPDX-License-Identifier: MPL-2.0

//! Test doubles shared by the integration tests
//!
//! - [`RecordingWriter`]: container writer that logs every call
//! - [`LoopbackFactory`]: encoders that turn each input into one output sample
//! - [`ScriptedCapture`]: capture device delivering silent chunks
//! - [`CountingGraphics`]: raster backend that logs context lifecycles
//! - [`DrawGate`]: holds draws until opened

#![allow(dead_code)]

use camrec::config::{AudioParams, SessionConfig, VideoParams};
use camrec::errors::{CaptureError, EncoderError, MuxerError, RenderError};
use camrec::gpu::raster::RasterGraphics;
use camrec::gpu::{GraphicsBackend, GraphicsContext, SharedContext, TextureId, Transform};
use camrec::media::encoders::{
    AudioEncoder, EncoderFactory, InputSurface, MediaEncoder, OutputStatus, SurfaceEncoder,
    SurfaceTarget,
};
use camrec::media::sample::{
    AudioFormat, BufferInfo, EncodedSample, SampleFlags, StreamKind, TrackFormat, TrackIndex,
    VideoFormat,
};
use camrec::pipelines::audio::CaptureDevice;
use camrec::pipelines::muxer::ContainerWriter;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

// ===== Container writer =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterEvent {
    AddTrack(TrackIndex, StreamKind),
    Start,
    Sample {
        track: TrackIndex,
        pts_us: i64,
        size: usize,
    },
    Stop,
    Release,
}

/// Writer whose calls can be inspected after the muxer owns it
#[derive(Clone, Default)]
pub struct RecordingWriter {
    events: Arc<Mutex<Vec<WriterEvent>>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn ContainerWriter> {
        Box::new(self.clone())
    }

    pub fn events(&self) -> Vec<WriterEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &WriterEvent) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Timestamps written to `track`, in write order
    pub fn timestamps(&self, track: TrackIndex) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                WriterEvent::Sample { track: t, pts_us, .. } if t == track => Some(pts_us),
                _ => None,
            })
            .collect()
    }

    pub fn sample_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, WriterEvent::Sample { .. }))
            .count()
    }

    fn push(&self, event: WriterEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ContainerWriter for RecordingWriter {
    fn add_track(&mut self, index: TrackIndex, format: &TrackFormat) -> Result<(), MuxerError> {
        self.push(WriterEvent::AddTrack(index, format.kind()));
        Ok(())
    }

    fn start(&mut self) -> Result<(), MuxerError> {
        self.push(WriterEvent::Start);
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackIndex,
        sample: &EncodedSample<'_>,
        presentation_time_us: i64,
    ) -> Result<(), MuxerError> {
        self.push(WriterEvent::Sample {
            track,
            pts_us: presentation_time_us,
            size: sample.data.len(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MuxerError> {
        self.push(WriterEvent::Stop);
        Ok(())
    }

    fn release(&mut self) {
        self.push(WriterEvent::Release);
    }
}

// ===== Formats and samples =====

pub fn video_format() -> TrackFormat {
    TrackFormat::Video(VideoFormat {
        width: 64,
        height: 48,
        frame_rate: 30,
        codec_data: vec![0x01, 0x64, 0x00, 0x1f],
    })
}

pub fn audio_format() -> TrackFormat {
    TrackFormat::Audio(AudioFormat {
        sample_rate: 44_100,
        channels: 1,
        codec_data: vec![0x12, 0x08],
    })
}

pub fn sample(data: &[u8], pts_us: i64) -> EncodedSample<'_> {
    EncodedSample {
        data,
        flags: SampleFlags::KEY_FRAME,
        presentation_time_us: pts_us,
    }
}

pub fn eos_sample(pts_us: i64) -> EncodedSample<'static> {
    EncodedSample {
        data: &[],
        flags: SampleFlags::END_OF_STREAM,
        presentation_time_us: pts_us,
    }
}

/// A small session config writing through `writer` under `dir`
pub fn session_config(dir: &Path, writer: &RecordingWriter) -> SessionConfig {
    SessionConfig::builder(dir.join("clip.mp4"))
        .with_video_resolution(64, 48)
        .with_video_frame_rate(30)
        .build(|_, _| Ok(writer.boxed()))
        .expect("config builds")
}

// ===== Encoders =====

/// What a loopback encoder saw, readable after the pipeline owns the encoder
#[derive(Default)]
pub struct EncoderLog {
    pub inputs: Mutex<Vec<i64>>,
    pub end_of_input: AtomicUsize,
    pub released: AtomicUsize,
}

impl EncoderLog {
    pub fn inputs(&self) -> Vec<i64> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn end_of_input(&self) -> usize {
        self.end_of_input.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Queue {
    format: Option<TrackFormat>,
    format_sent: bool,
    ready: VecDeque<(Vec<u8>, BufferInfo)>,
    eos_queued: bool,
}

/// Output queue shared between a loopback encoder and its input surface
#[derive(Clone)]
struct Loopback {
    queue: Arc<Mutex<Queue>>,
    log: Arc<EncoderLog>,
    emits_end_of_stream: bool,
}

impl Loopback {
    fn new(format: TrackFormat, log: Arc<EncoderLog>, emits_end_of_stream: bool) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue {
                format: Some(format),
                ..Default::default()
            })),
            log,
            emits_end_of_stream,
        }
    }

    /// One input becomes one key-frame output
    fn accept(&self, pts_us: i64, size: usize) {
        self.log.inputs.lock().unwrap().push(pts_us);
        let info = BufferInfo {
            offset: 0,
            size,
            presentation_time_us: pts_us,
            flags: SampleFlags::KEY_FRAME,
        };
        self.queue.lock().unwrap().ready.push_back((vec![0xAB; size], info));
    }

    fn end_input(&self) {
        self.log.end_of_input.fetch_add(1, Ordering::SeqCst);
        if !self.emits_end_of_stream {
            return;
        }
        let mut queue = self.queue.lock().unwrap();
        if !queue.eos_queued {
            queue.eos_queued = true;
            let info = BufferInfo {
                flags: SampleFlags::END_OF_STREAM,
                ..Default::default()
            };
            queue.ready.push_back((Vec::new(), info));
        }
    }
}

/// Encoder side of a [`Loopback`]
struct LoopbackEncoder {
    loopback: Loopback,
    slots: Vec<Option<Vec<u8>>>,
    surface: Option<InputSurface>,
}

impl LoopbackEncoder {
    fn new(loopback: Loopback, surface: Option<InputSurface>) -> Self {
        Self {
            loopback,
            slots: Vec::new(),
            surface,
        }
    }
}

impl MediaEncoder for LoopbackEncoder {
    fn dequeue_output(&mut self, _timeout: Duration) -> OutputStatus {
        let mut queue = self.loopback.queue.lock().unwrap();
        if queue.ready.is_empty() {
            return OutputStatus::TryAgainLater;
        }
        if !queue.format_sent {
            queue.format_sent = true;
            if let Some(format) = queue.format.clone() {
                return OutputStatus::FormatChanged(format);
            }
        }
        let Some((bytes, info)) = queue.ready.pop_front() else {
            return OutputStatus::TryAgainLater;
        };
        self.slots.push(Some(bytes));
        OutputStatus::Ready {
            index: self.slots.len() - 1,
            info,
        }
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(index)?.as_deref()
    }

    fn release_output(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    fn signal_end_of_input(&mut self) {
        self.loopback.end_input();
    }

    fn release(&mut self) {
        self.loopback.log.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl SurfaceEncoder for LoopbackEncoder {
    fn input_surface(&self) -> InputSurface {
        self.surface.clone().expect("video encoder has a surface")
    }
}

impl AudioEncoder for LoopbackEncoder {
    fn queue_input(
        &mut self,
        pcm: &[i16],
        presentation_time_us: i64,
        end_of_stream: bool,
    ) -> Result<(), EncoderError> {
        if !pcm.is_empty() {
            self.loopback.accept(presentation_time_us, pcm.len() / 4 + 1);
        }
        if end_of_stream {
            self.loopback.end_input();
        }
        Ok(())
    }
}

/// Surface that feeds presented frames back into the loopback queue
struct LoopbackSurface {
    loopback: Loopback,
    width: u32,
    height: u32,
}

impl SurfaceTarget for LoopbackSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn queue_frame(&self, rgba: &[u8], timestamp_ns: i64) -> Result<(), EncoderError> {
        self.loopback.accept(timestamp_ns / 1_000, rgba.len() / 16 + 1);
        Ok(())
    }
}

/// Builds loopback encoders and keeps their logs
#[derive(Default)]
pub struct LoopbackFactory {
    /// Video encoders ignore end of input, as a stuck hardware codec would
    pub video_never_ends: bool,
    /// Video encoder construction fails
    pub fail_video: bool,
    pub video_logs: Mutex<Vec<Arc<EncoderLog>>>,
    pub audio_logs: Mutex<Vec<Arc<EncoderLog>>>,
}

impl LoopbackFactory {
    pub fn video_log(&self, n: usize) -> Arc<EncoderLog> {
        Arc::clone(&self.video_logs.lock().unwrap()[n])
    }

    pub fn audio_log(&self, n: usize) -> Arc<EncoderLog> {
        Arc::clone(&self.audio_logs.lock().unwrap()[n])
    }

    pub fn video_encoders_created(&self) -> usize {
        self.video_logs.lock().unwrap().len()
    }
}

impl EncoderFactory for LoopbackFactory {
    fn create_video_encoder(
        &self,
        params: &VideoParams,
    ) -> Result<Box<dyn SurfaceEncoder>, EncoderError> {
        if self.fail_video {
            return Err(EncoderError::CreationFailed("no video encoder".to_string()));
        }
        let log = Arc::new(EncoderLog::default());
        self.video_logs.lock().unwrap().push(Arc::clone(&log));

        let format = TrackFormat::Video(VideoFormat {
            width: params.width,
            height: params.height,
            frame_rate: params.frame_rate,
            codec_data: vec![0x01, 0x42],
        });
        let loopback = Loopback::new(format, log, !self.video_never_ends);
        let surface = InputSurface::new(Arc::new(LoopbackSurface {
            loopback: loopback.clone(),
            width: params.width,
            height: params.height,
        }));
        Ok(Box::new(LoopbackEncoder::new(loopback, Some(surface))))
    }

    fn create_audio_encoder(
        &self,
        params: &AudioParams,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
        let log = Arc::new(EncoderLog::default());
        self.audio_logs.lock().unwrap().push(Arc::clone(&log));

        let format = TrackFormat::Audio(AudioFormat {
            sample_rate: params.sample_rate,
            channels: params.channels,
            codec_data: vec![0x12, 0x08],
        });
        Ok(Box::new(LoopbackEncoder::new(
            Loopback::new(format, log, true),
            None,
        )))
    }
}

// ===== Capture =====

#[derive(Default)]
pub struct CaptureStats {
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    pub reads: AtomicUsize,
}

/// Capture device delivering silence, one chunk per millisecond
pub struct ScriptedCapture {
    stats: Arc<CaptureStats>,
    fail_start: bool,
}

impl ScriptedCapture {
    pub fn new() -> (Self, Arc<CaptureStats>) {
        let stats = Arc::new(CaptureStats::default());
        (
            Self {
                stats: Arc::clone(&stats),
                fail_start: false,
            },
            stats,
        )
    }

    pub fn failing() -> Self {
        Self {
            stats: Arc::new(CaptureStats::default()),
            fail_start: true,
        }
    }
}

impl CaptureDevice for ScriptedCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.fail_start {
            return Err(CaptureError::OpenFailed("no microphone".to_string()));
        }
        self.stats.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize, CaptureError> {
        std::thread::sleep(Duration::from_millis(1));
        buffer.fill(0);
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(buffer.len())
    }

    fn stop(&mut self) {
        self.stats.stopped.store(true, Ordering::SeqCst);
    }
}

// ===== Graphics =====

/// Blocks draws while closed
#[derive(Clone, Default)]
pub struct DrawGate(Arc<(Mutex<bool>, Condvar)>);

impl DrawGate {
    pub fn close(&self) {
        *self.0.0.lock().unwrap() = true;
    }

    pub fn open(&self) {
        *self.0.0.lock().unwrap() = false;
        self.0.1.notify_all();
    }

    fn pass(&self) {
        let (closed, cvar) = &*self.0;
        let _open = cvar
            .wait_while(closed.lock().unwrap(), |closed| *closed)
            .unwrap();
    }
}

/// Raster backend that logs every context creation and release
#[derive(Default)]
pub struct CountingGraphics {
    inner: RasterGraphics,
    pub log: Arc<Mutex<Vec<String>>>,
    pub gate: DrawGate,
}

impl CountingGraphics {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl GraphicsBackend for CountingGraphics {
    fn create_context(
        &self,
        shared: &SharedContext,
    ) -> Result<Box<dyn GraphicsContext>, RenderError> {
        let inner = self.inner.create_context(shared)?;
        self.log.lock().unwrap().push(format!("create {}", shared.id()));
        Ok(Box::new(CountingContext {
            inner,
            id: shared.id(),
            log: Arc::clone(&self.log),
            gate: self.gate.clone(),
        }))
    }
}

struct CountingContext {
    inner: Box<dyn GraphicsContext>,
    id: u64,
    log: Arc<Mutex<Vec<String>>>,
    gate: DrawGate,
}

impl GraphicsContext for CountingContext {
    fn bind_surface(&mut self, surface: InputSurface) -> Result<(), RenderError> {
        self.inner.bind_surface(surface)
    }

    fn prepare_blit(&mut self) -> Result<(), RenderError> {
        self.inner.prepare_blit()
    }

    fn draw_frame(&mut self, texture: TextureId, transform: &Transform) -> Result<(), RenderError> {
        self.log.lock().unwrap().push(format!("draw {}", self.id));
        self.gate.pass();
        self.inner.draw_frame(texture, transform)
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        self.inner.set_presentation_time(timestamp_ns);
    }

    fn swap_buffers(&mut self) -> Result<(), RenderError> {
        self.inner.swap_buffers()
    }

    fn release_surface(&mut self) {
        self.inner.release_surface();
    }

    fn release(&mut self) {
        self.log.lock().unwrap().push(format!("release {}", self.id));
        self.inner.release();
    }
}

// ===== Waiting =====

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
