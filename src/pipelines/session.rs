// SPDX-License-Identifier: MPL-2.0

//! Recording session context
//!
//! Owns one [`SessionConfig`] and the two pipelines writing into its muxer.
//! The control side holds a `RecordingSession` and talks to both pipelines
//! through it; nothing about the session lives in global state.

use super::audio::{AudioPipeline, CaptureDevice};
use super::video::VideoPipeline;
use crate::clock;
use crate::config::SessionConfig;
use crate::errors::RecorderResult;
use crate::gpu::{GraphicsBackend, SharedContext, TextureId, Transform};
use crate::media::encoders::EncoderFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RecordingSession {
    config: Arc<SessionConfig>,
    video: VideoPipeline,
    audio: AudioPipeline,
}

impl RecordingSession {
    /// Build both pipelines; the audio device is opened before this returns
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn EncoderFactory>,
        graphics: Arc<dyn GraphicsBackend>,
        device: Box<dyn CaptureDevice>,
    ) -> RecorderResult<Self> {
        clock::init();
        let config = Arc::new(config);
        let audio = AudioPipeline::new(Arc::clone(&config), Arc::clone(&factory), device)?;
        let video = VideoPipeline::new(factory, graphics);
        Ok(Self {
            config,
            video,
            audio,
        })
    }

    pub fn config(&self) -> &Arc<SessionConfig> {
        &self.config
    }

    /// Start both streams, drawing video from `shared_context`
    pub fn start(&mut self, shared_context: SharedContext) -> RecorderResult<()> {
        self.video.start(Arc::clone(&self.config), shared_context)?;
        self.audio.start_recording();
        info!(output = %self.config.output_path().display(), "Recording started");
        Ok(())
    }

    pub fn frame_available(&self, transform: Transform, timestamp_ns: i64) {
        self.video.frame_available(transform, timestamp_ns);
    }

    pub fn set_texture(&self, texture: TextureId) {
        self.video.set_texture(texture);
    }

    pub fn rebind_context(&self, shared_context: SharedContext) {
        self.video.rebind_context(shared_context);
    }

    pub fn is_recording(&self) -> bool {
        self.video.is_recording() || self.audio.is_recording()
    }

    /// Stop both streams, wait for them and release the muxer
    ///
    /// Returns the container path, or the first error either pipeline hit.
    pub fn stop(&mut self) -> RecorderResult<PathBuf> {
        self.shutdown();

        let video_error = self.video.take_error();
        let audio_error = self.audio.take_error();
        if let Some(e) = &audio_error
            && video_error.is_some()
        {
            warn!(error = %e, "Audio pipeline also failed");
        }
        match video_error.or(audio_error) {
            Some(e) => Err(e),
            None => {
                info!(output = %self.config.output_path().display(), "Recording stopped");
                Ok(self.config.output_path().to_path_buf())
            }
        }
    }

    /// Finish the current session and switch to `config`
    ///
    /// The old muxer is released on its own; the new one is untouched until
    /// the next [`start`](Self::start).
    pub fn reset(
        &mut self,
        config: SessionConfig,
        device: Box<dyn CaptureDevice>,
    ) -> RecorderResult<()> {
        self.shutdown();
        if let Some(e) = self.video.take_error() {
            warn!(error = %e, "Discarding error from previous video session");
        }

        let config = Arc::new(config);
        self.audio.reset(Arc::clone(&config), device)?;
        self.config = config;
        info!(output = %self.config.output_path().display(), "Session reset");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.video.stop();
        self.audio.stop_recording();
        self.video.wait_for_completion();
        self.audio.wait_for_completion();
        // Finalizes a container that never saw both end-of-stream samples
        self.config.muxer().release();
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
