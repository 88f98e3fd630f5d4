// SPDX-License-Identifier: MPL-2.0

//! AAC-LC audio encoder
//!
//! ```text
//! appsrc (S16LE) ─▶ audioconvert ─▶ <aac encoder> ─▶ aacparse ─▶ appsink (raw AAC)
//! ```
//!
//! Encoder selection tries `avenc_aac`, then `faac`, then `voaacenc`.

use super::output::{AppSinkOutput, FormatProbe, codec_data};
use super::{AudioEncoder, MediaEncoder, OutputStatus};
use crate::config::AudioParams;
use crate::constants::frames_to_micros;
use crate::errors::EncoderError;
use crate::media::sample::{AudioFormat, StreamKind, TrackFormat};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::time::Duration;
use tracing::{debug, info, warn};

/// AAC encoders in priority order
pub const AAC_ENCODERS: [&str; 3] = ["avenc_aac", "faac", "voaacenc"];

/// Configure the AAC encoder's bitrate
///
/// All three elements take bits per second, but not the same integer width,
/// so the value goes through the property's string parser.
fn configure_aac_encoder(encoder: &gst::Element, encoder_name: &str, bitrate: u32) {
    if encoder.has_property("bitrate") {
        encoder.set_property_from_str("bitrate", &bitrate.to_string());
        debug!("Configured {}: bitrate={} bps", encoder_name, bitrate);
    } else {
        debug!("Unknown AAC encoder type, using default configuration");
    }
}

fn select_encoder(bitrate: u32) -> Result<(gst::Element, &'static str), EncoderError> {
    for name in AAC_ENCODERS {
        if let Ok(encoder) = gst::ElementFactory::make(name).build() {
            configure_aac_encoder(&encoder, name, bitrate);
            return Ok((encoder, name));
        }
    }
    Err(EncoderError::NotAvailable(
        "No AAC encoder available. Please install gstreamer1-plugins-bad (avenc_aac) or gstreamer1-libav".to_string(),
    ))
}

fn make(name: &str) -> Result<gst::Element, EncoderError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| EncoderError::CreationFailed(format!("Failed to create {}: {}", name, e)))
}

fn probe_audio_format() -> FormatProbe {
    Box::new(|caps| {
        let structure = caps.structure(0)?;
        Some(TrackFormat::Audio(AudioFormat {
            sample_rate: structure.get::<i32>("rate").ok()? as u32,
            channels: structure.get::<i32>("channels").ok()? as u16,
            codec_data: codec_data(caps)?,
        }))
    })
}

/// GStreamer-backed AAC encoder fed interleaved PCM
pub struct GstAudioEncoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    output: AppSinkOutput,
    sample_rate: u32,
    channels: u16,
    input_closed: bool,
    released: bool,
}

impl GstAudioEncoder {
    /// Build and start the encoder branch for `params`
    pub fn new(params: &AudioParams) -> Result<Self, EncoderError> {
        gst::init().map_err(|e| {
            EncoderError::CreationFailed(format!("Failed to initialize GStreamer: {}", e))
        })?;

        let (encoder, encoder_name) = select_encoder(params.bitrate)?;
        info!(
            encoder = encoder_name,
            sample_rate = params.sample_rate,
            channels = params.channels,
            bitrate = params.bitrate,
            "Selected audio encoder"
        );

        let input_caps = gst::Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("layout", "interleaved")
            .field("rate", params.sample_rate as i32)
            .field("channels", i32::from(params.channels))
            .build();
        let appsrc = gst_app::AppSrc::builder()
            .name("audio-input")
            .caps(&input_caps)
            .format(gst::Format::Time)
            .build();

        let convert = make("audioconvert")?;
        let parser = make("aacparse")?;
        let output_caps = gst::Caps::builder("audio/mpeg")
            .field("mpegversion", 4i32)
            .field("stream-format", "raw")
            .build();
        let appsink = gst_app::AppSink::builder()
            .name("audio-output")
            .caps(&output_caps)
            .build();
        appsink.set_property("sync", false);

        let pipeline = gst::Pipeline::with_name("camrec-audio-encoder");
        let elements = [
            appsrc.upcast_ref(),
            &convert,
            &encoder,
            &parser,
            appsink.upcast_ref(),
        ];
        pipeline
            .add_many(elements)
            .map_err(|e| EncoderError::CreationFailed(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(elements).map_err(|e| {
            EncoderError::CreationFailed(format!("Failed to link encoder branch: {}", e))
        })?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            EncoderError::CreationFailed(format!("Failed to start audio encoder: {:?}", e))
        })?;

        Ok(Self {
            pipeline,
            appsrc,
            output: AppSinkOutput::new(StreamKind::Audio, appsink, probe_audio_format()),
            sample_rate: params.sample_rate,
            channels: params.channels,
            input_closed: false,
            released: false,
        })
    }

    fn close_input(&mut self) {
        if self.input_closed {
            return;
        }
        self.input_closed = true;
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("Failed to signal end of audio input: {:?}", e);
        }
    }
}

impl MediaEncoder for GstAudioEncoder {
    fn dequeue_output(&mut self, timeout: Duration) -> OutputStatus {
        self.output.dequeue(timeout)
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.output.buffer(index)
    }

    fn release_output(&mut self, index: usize) {
        self.output.release(index);
    }

    fn signal_end_of_input(&mut self) {
        self.close_input();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.output.clear();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop audio encoder: {:?}", e);
        }
        debug!("Audio encoder released");
    }
}

impl AudioEncoder for GstAudioEncoder {
    fn queue_input(
        &mut self,
        pcm: &[i16],
        presentation_time_us: i64,
        end_of_stream: bool,
    ) -> Result<(), EncoderError> {
        if self.released || self.input_closed {
            return Err(EncoderError::Released);
        }

        if !pcm.is_empty() {
            let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
            let frames = (pcm.len() / usize::from(self.channels.max(1))) as u64;
            let mut buffer = gst::Buffer::from_slice(bytes);
            if let Some(buffer) = buffer.get_mut() {
                let pts_ns = presentation_time_us.max(0) as u64 * 1_000;
                buffer.set_pts(gst::ClockTime::from_nseconds(pts_ns));
                let duration_us = frames_to_micros(frames, self.sample_rate);
                buffer.set_duration(gst::ClockTime::from_useconds(duration_us as u64));
            }
            self.appsrc.push_buffer(buffer).map_err(|e| {
                EncoderError::InputRejected(format!("Failed to push audio: {:?}", e))
            })?;
        }

        if end_of_stream {
            self.close_input();
        }
        Ok(())
    }
}

impl Drop for GstAudioEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aac_priority() {
        assert_eq!(AAC_ENCODERS[0], "avenc_aac");
        assert!(AAC_ENCODERS.contains(&"voaacenc"));
    }
}
