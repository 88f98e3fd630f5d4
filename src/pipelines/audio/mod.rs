// SPDX-License-Identifier: MPL-2.0

//! Microphone capture pipeline
//!
//! A dedicated `audio-encoder` thread owns the capture device and the AAC
//! encoder:
//!
//! ```text
//! new() ──▶ device.start() ──▶ ready ──▶ wait for start_recording()
//!                                              │
//!              ┌───────────────────────────────┘
//!              ▼
//!        ┌─▶ drain(false) ──▶ read chunk ──▶ jitter-correct PTS ──▶ queue_input
//!        └──────────────── while recording is requested ────────────┘
//!              │ stop_recording()
//!              ▼
//!        last chunk ──▶ device.stop() ──▶ finish (EOS + drain) ──▶ release ──▶ done
//! ```
//!
//! Construction blocks until the device is open (or failed to open); every
//! other call only flips a flag and returns.

pub mod jitter;

use crate::clock;
use crate::config::SessionConfig;
use crate::constants::SAMPLES_PER_FRAME;
use crate::errors::{CaptureError, PipelineError, RecorderError, RecorderResult};
use crate::media::encoders::{AudioEncoder, EncoderDrain, EncoderFactory};
use crate::media::sample::StreamKind;
use jitter::JitterCorrector;
use std::sync::mpsc::{SyncSender, sync_channel};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// A source of interleaved signed 16-bit PCM
pub trait CaptureDevice: Send {
    /// Open the device and begin capturing
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Fill `buffer` with interleaved samples, returning how many values were written
    fn read(&mut self, buffer: &mut [i16]) -> Result<usize, CaptureError>;

    /// Stop capturing and close the device
    fn stop(&mut self);
}

#[derive(Debug, Default)]
struct Gate {
    requested: bool,
    stop_requested: bool,
    recording: bool,
    finished: bool,
}

#[derive(Default)]
struct Shared {
    gate: Mutex<Gate>,
    changed: Condvar,
    error: Mutex<Option<RecorderError>>,
}

impl Shared {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut Gate)) {
        f(&mut self.gate());
        self.changed.notify_all();
    }

    /// Block until `ready` holds for the gate
    fn wait_until(&self, ready: impl Fn(&Gate) -> bool) -> MutexGuard<'_, Gate> {
        let mut gate = self.gate();
        while !ready(&gate) {
            gate = self
                .changed
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
        gate
    }

    fn record_error(&self, err: RecorderError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

/// Audio capture and encode pipeline
pub struct AudioPipeline {
    factory: Arc<dyn EncoderFactory>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    /// Create the encoder, open `device` on the audio thread and wait until it is ready
    pub fn new(
        config: Arc<SessionConfig>,
        factory: Arc<dyn EncoderFactory>,
        device: Box<dyn CaptureDevice>,
    ) -> RecorderResult<Self> {
        let mut pipeline = Self {
            factory,
            shared: Arc::new(Shared::default()),
            thread: None,
        };
        pipeline.spawn(config, device)?;
        Ok(pipeline)
    }

    fn spawn(
        &mut self,
        config: Arc<SessionConfig>,
        device: Box<dyn CaptureDevice>,
    ) -> RecorderResult<()> {
        let encoder = self.factory.create_audio_encoder(config.audio())?;
        let shared = Arc::new(Shared::default());
        let (ready_tx, ready_rx) = sync_channel::<RecorderResult<()>>(1);

        let worker = AudioWorker {
            drain: EncoderDrain::new(StreamKind::Audio, config.muxer().clone()),
            encoder,
            device,
            corrector: JitterCorrector::new(config.audio().sample_rate),
            channels: usize::from(config.audio().channels),
            buffer: vec![0; SAMPLES_PER_FRAME * usize::from(config.audio().channels)],
            shared: Arc::clone(&shared),
        };

        let thread = std::thread::Builder::new()
            .name("audio-encoder".to_string())
            .spawn(move || worker.run(ready_tx))
            .map_err(|e| PipelineError::SpawnFailed(e.to_string()))?;

        self.shared = shared;
        self.thread = Some(thread);

        ready_rx
            .recv()
            .map_err(|_| PipelineError::ThreadDied("audio-encoder".to_string()))??;

        info!(
            sample_rate = config.audio().sample_rate,
            channels = config.audio().channels,
            "Audio pipeline ready"
        );
        Ok(())
    }

    /// Open the recording gate
    pub fn start_recording(&self) {
        debug!("Audio recording requested");
        self.shared.update(|gate| gate.requested = true);
    }

    /// Ask the thread to finish the stream and release everything
    pub fn stop_recording(&self) {
        debug!("Audio stop requested");
        self.shared.update(|gate| gate.stop_requested = true);
    }

    /// Whether the capture loop is running
    pub fn is_recording(&self) -> bool {
        self.shared.gate().recording
    }

    /// Block until the thread has released its device and encoder
    pub fn wait_for_completion(&mut self) {
        if self.thread.is_none() {
            return;
        }
        drop(self.shared.wait_until(|gate| gate.finished));
        self.join();
    }

    /// Replace the session: stop the current one and start over with a new device
    pub fn reset(
        &mut self,
        config: Arc<SessionConfig>,
        device: Box<dyn CaptureDevice>,
    ) -> RecorderResult<()> {
        self.stop_recording();
        self.wait_for_completion();
        if let Some(err) = self.take_error() {
            warn!(error = %err, "Discarding error from previous audio session");
        }
        self.spawn(config, device)
    }

    /// First fatal error the thread hit, if any
    pub fn take_error(&self) -> Option<RecorderError> {
        self.shared
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Audio thread panicked");
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop_recording();
        self.join();
    }
}

/// State owned by the audio thread
struct AudioWorker {
    drain: EncoderDrain,
    encoder: Box<dyn AudioEncoder>,
    device: Box<dyn CaptureDevice>,
    corrector: JitterCorrector,
    channels: usize,
    buffer: Vec<i16>,
    shared: Arc<Shared>,
}

impl AudioWorker {
    fn run(mut self, ready: SyncSender<RecorderResult<()>>) {
        if let Err(e) = self.device.start() {
            error!(error = %e, "Failed to start audio capture");
            self.drain.release(self.encoder.as_mut());
            self.shared.update(|gate| gate.finished = true);
            let _ = ready.send(Err(e.into()));
            return;
        }
        let _ = ready.send(Ok(()));

        let start = {
            let mut gate = self.shared.wait_until(|g| g.requested || g.stop_requested);
            gate.recording = gate.requested;
            gate.recording
        };
        self.shared.changed.notify_all();

        if start {
            info!("Audio recording started");
            if let Err(e) = self.record() {
                error!(error = %e, "Audio pipeline failed");
                self.shared.record_error(e);
            }
        } else {
            debug!("Audio pipeline cancelled before recording");
            self.device.stop();
        }

        self.drain.release(self.encoder.as_mut());
        self.shared.update(|gate| {
            gate.recording = false;
            gate.finished = true;
        });
        info!("Audio pipeline finished");
    }

    fn stop_requested(&self) -> bool {
        self.shared.gate().stop_requested
    }

    fn record(&mut self) -> RecorderResult<()> {
        let looped = self.capture_loop();

        let tail = match looped {
            // Last chunk, then close the stream
            Ok(()) => self.send_chunk(),
            Err(e) => Err(e),
        };
        self.device.stop();
        tail?;

        let outcome = self.drain.finish(self.encoder.as_mut())?;
        debug!(?outcome, "Audio stream finished");
        Ok(())
    }

    fn capture_loop(&mut self) -> RecorderResult<()> {
        while !self.stop_requested() {
            self.drain.drain(self.encoder.as_mut(), false)?;
            self.send_chunk()?;
        }
        Ok(())
    }

    /// Read one chunk from the device and queue it with a corrected timestamp
    fn send_chunk(&mut self) -> RecorderResult<()> {
        let values = self.device.read(&mut self.buffer)?;
        if values == 0 {
            trace!("Empty audio read");
            return Ok(());
        }
        let values = values.min(self.buffer.len());
        let frames = (values / self.channels) as u64;
        let raw_us = clock::monotonic_us();
        let pts = self.corrector.correct(raw_us, frames);

        self.encoder
            .queue_input(&self.buffer[..values], pts, false)
            .map_err(RecorderError::from)
    }
}
