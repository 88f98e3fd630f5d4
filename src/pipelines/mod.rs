// SPDX-License-Identifier: MPL-2.0

//! Capture-to-container pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐
//! │ Frame source │ ──▶ │  VideoPipeline    │ ──┐
//! │ (textures)   │     │  - blit to surface│   │     ┌─────────┐     ┌──────────┐
//! └──────────────┘     │  - H.264 drain    │   ├──▶  │  Muxer  │ ──▶ │ MP4 file │
//!                      └───────────────────┘   │     └─────────┘     └──────────┘
//! ┌──────────────┐     ┌───────────────────┐   │
//! │ Microphone   │ ──▶ │  AudioPipeline    │ ──┘
//! │ (PCM chunks) │     │  - jitter-free PTS│
//! └──────────────┘     │  - AAC drain      │
//!                      └───────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`muxer`]: track-synchronizing muxer shared by both pipelines
//! - [`video`]: command-driven video encode thread
//! - [`audio`]: capture loop and jitter correction
//! - [`session`]: the session context tying both pipelines to one config
//! - `container`: GStreamer MP4 writer (feature `gstreamer`)

#[cfg(feature = "gstreamer")]
pub mod container;
pub mod audio;
pub mod muxer;
pub mod session;
pub mod video;

pub use audio::{AudioPipeline, CaptureDevice};
pub use muxer::{ContainerWriter, Muxer, MuxerFinished, MuxerHandle, TrackSink};
pub use session::RecordingSession;
pub use video::{PipelineState, VideoPipeline};
