// SPDX-License-Identifier: MPL-2.0

//! camrec - camera recording core
//!
//! Records a surface-fed H.264 video stream and a microphone AAC stream into
//! one MP4 container with synchronized timestamps.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Session configuration, presets and the validating builder
//! - [`media`]: Encoded sample model, encoder contracts and the shared drain
//! - [`pipelines`]: Muxer, video and audio pipelines, and the session context
//! - [`gpu`]: Graphics context abstraction and the software raster backend
//! - [`backends`]: Audio capture devices and synthetic sources
//! - [`constants`]: Tuning constants and defaults
//! - [`errors`]: Error types
//!
//! # Example
//!
//! ```ignore
//! let config = SessionConfig::builder("clip.mp4")
//!     .with_video_resolution(1280, 720)
//!     .build(|path, format| Ok(Box::new(GstMp4Writer::new(path, format)?)))?;
//! let mut session = RecordingSession::new(config, factory, graphics, device)?;
//! session.start(shared_context)?;
//! // feed frame_available() from the camera's texture callback
//! let output = session.stop()?;
//! ```

pub mod backends;
pub mod clock;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use config::{AudioParams, ContainerFormat, SessionConfig, SessionConfigBuilder, VideoParams};
pub use errors::{RecorderError, RecorderResult};
pub use pipelines::{AudioPipeline, Muxer, MuxerHandle, RecordingSession, VideoPipeline};
