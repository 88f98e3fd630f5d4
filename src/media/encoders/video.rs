// SPDX-License-Identifier: MPL-2.0

//! H.264 video encoder with hardware acceleration priority
//!
//! The encoder branch is a small GStreamer pipeline:
//!
//! ```text
//! appsrc (RGBA) ─▶ videoconvert ─▶ <h264 encoder> ─▶ h264parse ─▶ appsink (avc, au)
//! ```
//!
//! The appsrc is exposed to the graphics context as the encoder's
//! [`InputSurface`]; the appsink feeds the output queue the drain polls.

use super::output::{AppSinkOutput, FormatProbe, codec_data};
use super::{InputSurface, MediaEncoder, OutputStatus, SurfaceEncoder, SurfaceTarget};
use crate::config::VideoParams;
use crate::constants::defaults;
use crate::errors::EncoderError;
use crate::media::sample::{StreamKind, TrackFormat, VideoFormat};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// H.264 encoders in priority order: hardware first, then software
pub const H264_ENCODERS: [(&str, &str, bool); 7] = [
    ("vah264enc", "VA-API H.264 (HW)", true),
    ("vaapih264enc", "VA-API H.264 (HW)", true),
    ("nvh264enc", "NVIDIA H.264 (HW)", true),
    ("qsvh264enc", "Intel QSV H.264 (HW)", true),
    ("v4l2h264enc", "V4L2 H.264 (HW)", true),
    ("x264enc", "x264 H.264 (SW)", false),
    ("openh264enc", "OpenH264 H.264 (SW)", false),
];

/// Information about an available encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// GStreamer element name
    pub element_name: String,
    /// Display name
    pub display_name: String,
    /// Whether this is hardware accelerated
    pub is_hardware: bool,
    /// Priority (lower = higher priority)
    pub priority: u32,
}

/// Enumerate installed H.264 encoders sorted by priority
pub fn enumerate_video_encoders() -> Vec<EncoderInfo> {
    let _ = gst::init();

    H264_ENCODERS
        .iter()
        .enumerate()
        .filter(|(_, (name, _, _))| gst::ElementFactory::find(name).is_some())
        .map(|(priority, (name, display, hw))| EncoderInfo {
            element_name: name.to_string(),
            display_name: display.to_string(),
            is_hardware: *hw,
            priority: priority as u32,
        })
        .collect()
}

/// Create the first H.264 encoder that can be instantiated
///
/// `preferred` is tried before the priority list when given.
fn select_encoder(preferred: Option<&str>) -> Result<(gst::Element, String), EncoderError> {
    let candidates = preferred
        .into_iter()
        .chain(H264_ENCODERS.iter().map(|(name, _, _)| *name));

    for name in candidates {
        match gst::ElementFactory::make(name).build() {
            Ok(encoder) => return Ok((encoder, name.to_string())),
            Err(_) => debug!(encoder = name, "Video encoder not available"),
        }
    }

    Err(EncoderError::NotAvailable(
        "No H.264 encoder available. Please install gstreamer1-plugins-ugly (x264enc) or gstreamer1-plugin-openh264".to_string(),
    ))
}

/// Configure bitrate and key-frame interval for the selected element
fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, params: &VideoParams) {
    let bitrate_kbps = (params.bitrate / 1000).max(1);
    let key_interval = params.frame_rate * defaults::IFRAME_INTERVAL_SECS;

    let set_if_present = |name: &str, value: u32| {
        if encoder.has_property(name) {
            encoder.set_property(name, value);
        }
    };

    match encoder_name {
        "x264enc" => {
            encoder.set_property_from_str("speed-preset", "veryfast");
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property("bitrate", bitrate_kbps);
            encoder.set_property("key-int-max", key_interval);
            encoder.set_property("bframes", 0u32);
        }

        "openh264enc" => {
            encoder.set_property_from_str("rate-control", "bitrate");
            encoder.set_property("bitrate", params.bitrate);
            encoder.set_property_from_str("usage-type", "camera");
            set_if_present("gop-size", key_interval);
        }

        "vaapih264enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
            set_if_present("keyframe-period", key_interval);
        }

        "vah264enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
            set_if_present("key-int-max", key_interval);
            set_if_present("b-frames", 0);
        }

        "nvh264enc" => {
            encoder.set_property("bitrate", bitrate_kbps);
            encoder.set_property_from_str("rc-mode", "cbr");
            set_if_present("bframes", 0);
        }

        "qsvh264enc" => {
            encoder.set_property("bitrate", bitrate_kbps);
            set_if_present("gop-size", key_interval);
            set_if_present("b-frames", 0);
        }

        _ => debug!(encoder = encoder_name, "Using encoder default configuration"),
    }

    debug!(
        encoder = encoder_name,
        bitrate_kbps, key_interval, "Configured video encoder"
    );
}

fn make(name: &str) -> Result<gst::Element, EncoderError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| EncoderError::CreationFailed(format!("Failed to create {}: {}", name, e)))
}

fn probe_video_format(frame_rate: u32) -> FormatProbe {
    Box::new(move |caps| {
        let structure = caps.structure(0)?;
        Some(TrackFormat::Video(VideoFormat {
            width: structure.get::<i32>("width").ok()? as u32,
            height: structure.get::<i32>("height").ok()? as u32,
            frame_rate,
            codec_data: codec_data(caps)?,
        }))
    })
}

/// Appsrc side of the encoder, handed out as the input surface
struct AppSrcSurface {
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    frame_duration: gst::ClockTime,
}

impl SurfaceTarget for AppSrcSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn queue_frame(&self, rgba: &[u8], timestamp_ns: i64) -> Result<(), EncoderError> {
        let expected = self.width as usize * self.height as usize * 4;
        if rgba.len() != expected {
            return Err(EncoderError::InputRejected(format!(
                "frame is {} bytes, surface expects {}",
                rgba.len(),
                expected
            )));
        }

        let mut buffer = gst::Buffer::from_slice(rgba.to_vec());
        if let Some(buffer) = buffer.get_mut() {
            let pts = gst::ClockTime::from_nseconds(timestamp_ns.max(0) as u64);
            buffer.set_pts(pts);
            buffer.set_duration(self.frame_duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| EncoderError::InputRejected(format!("Failed to push frame: {:?}", e)))
    }
}

/// GStreamer-backed H.264 surface encoder
pub struct GstVideoEncoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    surface: InputSurface,
    output: AppSinkOutput,
    released: bool,
}

impl GstVideoEncoder {
    /// Build and start the encoder branch for `params`
    pub fn new(params: &VideoParams, preferred: Option<&str>) -> Result<Self, EncoderError> {
        gst::init().map_err(|e| {
            EncoderError::CreationFailed(format!("Failed to initialize GStreamer: {}", e))
        })?;

        let (encoder, encoder_name) = select_encoder(preferred)?;
        configure_video_encoder(&encoder, &encoder_name, params);
        info!(
            encoder = %encoder_name,
            width = params.width,
            height = params.height,
            bitrate = params.bitrate,
            "Selected video encoder"
        );

        let input_caps = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Rgba,
            params.width,
            params.height,
        )
        .fps(gst::Fraction::new(params.frame_rate as i32, 1))
        .build()
        .map_err(|e| EncoderError::CreationFailed(format!("Invalid video info: {}", e)))?
        .to_caps()
        .map_err(|e| EncoderError::CreationFailed(format!("Invalid video caps: {}", e)))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("video-input")
            .caps(&input_caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();

        let convert = make("videoconvert")?;
        let parser = make("h264parse")?;
        let output_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au")
            .build();
        let appsink = gst_app::AppSink::builder()
            .name("video-output")
            .caps(&output_caps)
            .build();
        appsink.set_property("sync", false);

        let pipeline = gst::Pipeline::with_name("camrec-video-encoder");
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
            EncoderError::CreationFailed(format!("Failed to start video encoder: {:?}", e))
        })?;

        let frame_duration =
            gst::ClockTime::from_nseconds(1_000_000_000 / u64::from(params.frame_rate.max(1)));
        let surface = InputSurface::new(Arc::new(AppSrcSurface {
            appsrc: appsrc.clone(),
            width: params.width,
            height: params.height,
            frame_duration,
        }));

        Ok(Self {
            pipeline,
            appsrc,
            surface,
            output: AppSinkOutput::new(
                StreamKind::Video,
                appsink,
                probe_video_format(params.frame_rate),
            ),
            released: false,
        })
    }
}

impl MediaEncoder for GstVideoEncoder {
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
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("Failed to signal end of video input: {:?}", e);
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.output.clear();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop video encoder: {:?}", e);
        }
        debug!("Video encoder released");
    }
}

impl SurfaceEncoder for GstVideoEncoder {
    fn input_surface(&self) -> InputSurface {
        self.surface.clone()
    }
}

impl Drop for GstVideoEncoder {
    fn drop(&mut self) {
        self.release();
    }
}
