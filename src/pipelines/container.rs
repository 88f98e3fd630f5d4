// SPDX-License-Identifier: MPL-2.0

//! MP4 container writer
//!
//! ```text
//! appsrc (video/x-h264, avc) ──┐
//!                              ├──▶ mp4mux ──▶ filesink
//! appsrc (audio/mpeg, raw)  ───┘
//! ```
//!
//! One appsrc is created per declared track. Samples arrive already
//! normalized to container time, so buffers are pushed with those
//! timestamps unchanged.

use super::muxer::ContainerWriter;
use crate::config::ContainerFormat;
use crate::errors::MuxerError;
use crate::media::sample::{EncodedSample, TrackFormat, TrackIndex};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// How long `stop` waits for the muxer to write the index
const FINALIZE_TIMEOUT_SECS: u64 = 5;

fn writer_error(context: &str, e: impl std::fmt::Display) -> MuxerError {
    MuxerError::Writer(format!("{}: {}", context, e))
}

fn track_caps(format: &TrackFormat) -> gst::Caps {
    let codec_data = gst::Buffer::from_slice(format.codec_data().to_vec());
    match format {
        TrackFormat::Video(video) => gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au")
            .field("width", video.width as i32)
            .field("height", video.height as i32)
            .field("framerate", gst::Fraction::new(video.frame_rate as i32, 1))
            .field("codec_data", codec_data)
            .build(),
        TrackFormat::Audio(audio) => gst::Caps::builder("audio/mpeg")
            .field("mpegversion", 4i32)
            .field("stream-format", "raw")
            .field("rate", audio.sample_rate as i32)
            .field("channels", i32::from(audio.channels))
            .field("codec_data", codec_data)
            .build(),
    }
}

/// GStreamer MP4 writer behind the [`Muxer`](super::Muxer)
pub struct GstMp4Writer {
    pipeline: gst::Pipeline,
    muxer: gst::Element,
    sources: Vec<Option<gst_app::AppSrc>>,
    output_path: PathBuf,
    started: bool,
}

impl GstMp4Writer {
    /// Open a writer producing `path`
    pub fn new(path: &Path, format: ContainerFormat) -> Result<Self, MuxerError> {
        gst::init().map_err(|e| writer_error("Failed to initialize GStreamer", e))?;
        info!(path = %path.display(), format = ?format, "Creating container writer");

        let location = path
            .to_str()
            .ok_or_else(|| MuxerError::Writer(format!("Non UTF-8 path: {}", path.display())))?;

        let muxer = gst::ElementFactory::make("mp4mux")
            .name("container-mux")
            .build()
            .map_err(|e| writer_error("Failed to create mp4mux", e))?;
        // Seekable output: duration and index go in the header
        if muxer.has_property("streamable") {
            muxer.set_property("streamable", false);
        }
        if muxer.has_property("faststart") {
            muxer.set_property("faststart", true);
        }

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(|e| writer_error("Failed to create filesink", e))?;

        let pipeline = gst::Pipeline::with_name("camrec-container");
        pipeline
            .add_many([&muxer, &filesink])
            .map_err(|e| writer_error("Failed to add muxer elements", e))?;
        muxer
            .link(&filesink)
            .map_err(|e| writer_error("Failed to link muxer to filesink", e))?;

        Ok(Self {
            pipeline,
            muxer,
            sources: Vec::new(),
            output_path: path.to_path_buf(),
            started: false,
        })
    }

    fn source(&self, track: TrackIndex) -> Result<&gst_app::AppSrc, MuxerError> {
        self.sources
            .get(track)
            .and_then(Option::as_ref)
            .ok_or(MuxerError::UnknownTrack(track))
    }

    /// Wait for EOS to reach the sink, logging any pipeline error
    fn wait_for_eos(&self) -> Result<(), MuxerError> {
        let Some(bus) = self.pipeline.bus() else {
            return Err(MuxerError::Writer("No bus available".to_string()));
        };
        match bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => Ok(()),
                gst::MessageView::Error(err) => {
                    error!(
                        error = %err.error(),
                        debug = ?err.debug(),
                        source = ?err.src().map(|s| s.name()),
                        "GStreamer error while finalizing"
                    );
                    Err(writer_error("Container finalize failed", err.error()))
                }
                _ => Ok(()),
            },
            None => {
                warn!("Timed out waiting for container to finalize");
                Err(MuxerError::Writer("finalize timed out".to_string()))
            }
        }
    }
}

impl ContainerWriter for GstMp4Writer {
    fn add_track(&mut self, index: TrackIndex, format: &TrackFormat) -> Result<(), MuxerError> {
        let caps = track_caps(format);
        let appsrc = gst_app::AppSrc::builder()
            .name(format!("{}-track-{}", format.kind(), index))
            .caps(&caps)
            .format(gst::Format::Time)
            .build();

        self.pipeline
            .add(&appsrc)
            .map_err(|e| writer_error("Failed to add track source", e))?;
        appsrc
            .link(&self.muxer)
            .map_err(|e| writer_error("Failed to link track to muxer", e))?;

        if self.sources.len() <= index {
            self.sources.resize(index + 1, None);
        }
        self.sources[index] = Some(appsrc);
        debug!(track = index, mime = format.mime(), "Container track added");
        Ok(())
    }

    fn start(&mut self) -> Result<(), MuxerError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| writer_error("Failed to start container", e))?;
        self.started = true;
        info!(path = %self.output_path.display(), "Container started");
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackIndex,
        sample: &EncodedSample<'_>,
        presentation_time_us: i64,
    ) -> Result<(), MuxerError> {
        let appsrc = self.source(track)?;
        let mut buffer = gst::Buffer::from_slice(sample.data.to_vec());
        if let Some(buffer) = buffer.get_mut() {
            let pts = gst::ClockTime::from_useconds(presentation_time_us.max(0) as u64);
            buffer.set_pts(pts);
            buffer.set_dts(pts);
            if !sample.flags.key_frame {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }
        appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| MuxerError::Writer(format!("Failed to push sample: {:?}", e)))
    }

    fn stop(&mut self) -> Result<(), MuxerError> {
        if !self.started {
            self.release();
            return Ok(());
        }
        for appsrc in self.sources.iter().flatten() {
            if let Err(e) = appsrc.end_of_stream() {
                warn!("Failed to end track: {:?}", e);
            }
        }
        let finalized = self.wait_for_eos();
        self.release();
        finalized?;
        info!(path = %self.output_path.display(), "Container finalized");
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop container pipeline: {:?}", e);
        }
    }
}

impl Drop for GstMp4Writer {
    fn drop(&mut self) {
        // Ensure pipeline is properly stopped to avoid GStreamer warnings
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
