// SPDX-License-Identifier: MPL-2.0

//! Encoder abstractions and the shared drain
//!
//! The recorder talks to encoders through a small output-queue contract
//! modelled on hardware codecs:
//!
//! ```text
//! input (surface or PCM) ──▶ encoder ──▶ dequeue_output() ──▶ EncoderDrain ──▶ Muxer
//!                                          ▲                       │
//!                                          └──── release_output ◀──┘
//! ```
//!
//! - [`MediaEncoder`]: the output side shared by both stream kinds
//! - [`SurfaceEncoder`]: video encoders fed through an [`InputSurface`]
//! - [`AudioEncoder`]: audio encoders fed interleaved PCM
//! - [`EncoderFactory`]: constructs encoders for a session
//!
//! With the `gstreamer` feature, [`video`] and [`audio`] provide real H.264
//! and AAC encoders and [`detection`] reports which elements are installed.

pub mod drain;

#[cfg(feature = "gstreamer")]
pub mod audio;
#[cfg(feature = "gstreamer")]
pub mod detection;
#[cfg(feature = "gstreamer")]
mod output;
#[cfg(feature = "gstreamer")]
pub mod video;

use crate::config::{AudioParams, VideoParams};
use crate::errors::EncoderError;
use crate::media::sample::{BufferInfo, TrackFormat};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use drain::{DrainOutcome, EncoderDrain};

#[cfg(feature = "gstreamer")]
pub use audio::GstAudioEncoder;
#[cfg(feature = "gstreamer")]
pub use video::GstVideoEncoder;

/// Result of one poll of an encoder's output queue
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStatus {
    /// Nothing ready within the timeout
    TryAgainLater,
    /// Output buffers were reallocated; buffers must be re-fetched by index
    BuffersChanged,
    /// The output format is now known (fires at most once per stream)
    FormatChanged(TrackFormat),
    /// Negative status the recorder does not understand
    Unexpected(i32),
    /// Output buffer `index` holds a sample described by `info`
    Ready { index: usize, info: BufferInfo },
}

/// Output side of an encoder
pub trait MediaEncoder: Send {
    /// Poll the output queue, blocking at most `timeout`
    fn dequeue_output(&mut self, timeout: Duration) -> OutputStatus;

    /// Bytes of a buffer previously reported [`OutputStatus::Ready`]
    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    /// Hand a buffer back to the encoder once the muxer is done with it
    fn release_output(&mut self, index: usize);

    /// Tell the encoder no more input will arrive so it can flush.
    ///
    /// Encoders that cannot signal this converge through the drain's spin budget.
    fn signal_end_of_input(&mut self) {}

    /// Stop the encoder and free its resources
    fn release(&mut self);
}

/// Video encoder fed through a surface
pub trait SurfaceEncoder: MediaEncoder {
    /// Surface the graphics context renders into
    fn input_surface(&self) -> InputSurface;
}

/// Audio encoder fed interleaved signed 16-bit PCM
pub trait AudioEncoder: MediaEncoder {
    /// Queue one chunk of PCM with its presentation timestamp
    fn queue_input(
        &mut self,
        pcm: &[i16],
        presentation_time_us: i64,
        end_of_stream: bool,
    ) -> Result<(), EncoderError>;
}

/// Constructs the encoders of a session
pub trait EncoderFactory: Send + Sync {
    /// Build a configured video encoder
    fn create_video_encoder(
        &self,
        params: &VideoParams,
    ) -> Result<Box<dyn SurfaceEncoder>, EncoderError>;

    /// Build a configured audio encoder
    fn create_audio_encoder(
        &self,
        params: &AudioParams,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError>;
}

/// Something a rendered frame can be presented to
pub trait SurfaceTarget: Send + Sync {
    /// Width and height the surface expects
    fn dimensions(&self) -> (u32, u32);

    /// Submit one tightly packed RGBA frame stamped with `timestamp_ns`
    fn queue_frame(&self, rgba: &[u8], timestamp_ns: i64) -> Result<(), EncoderError>;
}

/// Encoder-owned input surface, shareable with the graphics context
#[derive(Clone)]
pub struct InputSurface(Arc<dyn SurfaceTarget>);

impl InputSurface {
    pub fn new(target: Arc<dyn SurfaceTarget>) -> Self {
        Self(target)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn queue_frame(&self, rgba: &[u8], timestamp_ns: i64) -> Result<(), EncoderError> {
        self.0.queue_frame(rgba, timestamp_ns)
    }
}

impl fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        write!(f, "InputSurface({}x{})", width, height)
    }
}

/// Factory for the GStreamer H.264 and AAC encoders
#[cfg(feature = "gstreamer")]
#[derive(Debug, Clone, Default)]
pub struct GstEncoderFactory {
    /// Video encoder element tried before the priority list
    pub preferred_video_encoder: Option<String>,
}

#[cfg(feature = "gstreamer")]
impl EncoderFactory for GstEncoderFactory {
    fn create_video_encoder(
        &self,
        params: &VideoParams,
    ) -> Result<Box<dyn SurfaceEncoder>, EncoderError> {
        let encoder = GstVideoEncoder::new(params, self.preferred_video_encoder.as_deref())?;
        Ok(Box::new(encoder))
    }

    fn create_audio_encoder(
        &self,
        params: &AudioParams,
    ) -> Result<Box<dyn AudioEncoder>, EncoderError> {
        Ok(Box::new(GstAudioEncoder::new(params)?))
    }
}
