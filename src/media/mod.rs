// SPDX-License-Identifier: MPL-2.0

//! Media types and encoders
//!
//! - [`sample`]: encoded samples, buffer descriptions and track formats
//! - [`encoders`]: encoder contracts, the shared drain and GStreamer encoders

pub mod encoders;
pub mod sample;

pub use sample::{BufferInfo, EncodedSample, SampleFlags, StreamKind, TrackFormat, TrackIndex};
