// SPDX-License-Identifier: GPL-3.0-only

//! Recording session configuration
//!
//! A [`SessionConfig`] is the immutable aggregate both pipelines read from:
//! encoder parameters for each stream and the shared [`MuxerHandle`] they
//! write into. It is created once per recording session by
//! [`SessionConfigBuilder`] and replaced wholesale on reset.
//!
//! Given a requested output like `/videos/clip.mp4`, the builder writes the
//! session to `/videos/session_temp/<uuid>/clip.mp4`. Moving the finished file
//! to its final destination is left to whoever observes the muxer's
//! completion event.

use crate::constants::{defaults, derived_video_bitrate};
use crate::errors::{ConfigError, MuxerError, RecorderResult};
use crate::pipelines::muxer::{ContainerWriter, Muxer, MuxerHandle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Container formats the recorder can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerFormat {
    /// MPEG-4 Part 14
    Mpeg4,
}

impl ContainerFormat {
    /// File extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mpeg4 => "mp4",
        }
    }

    /// Resolve the container from an output path's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy();
        if ext.eq_ignore_ascii_case("mp4") {
            Some(ContainerFormat::Mpeg4)
        } else {
            None
        }
    }
}

/// Video encoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Nominal frame rate
    pub frame_rate: u32,
}

impl VideoParams {
    /// Longer side of the frame
    pub fn resolution_width(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Shorter side of the frame
    pub fn resolution_height(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Audio encoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Channel count, 1 or 2
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
}

/// Recording parameters that can be stored as JSON and applied to a builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingPreset {
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame rate
    pub frame_rate: u32,
    /// Explicit video bitrate; derived from geometry when absent
    pub video_bitrate: Option<u32>,
    /// Audio sample rate
    pub sample_rate: u32,
    /// Audio bitrate
    pub audio_bitrate: u32,
    /// Audio channel count
    pub channels: u16,
}

impl Default for RecordingPreset {
    fn default() -> Self {
        Self {
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            frame_rate: defaults::FRAME_RATE,
            video_bitrate: None,
            sample_rate: defaults::SAMPLE_RATE,
            audio_bitrate: defaults::AUDIO_BITRATE,
            channels: defaults::CHANNELS,
        }
    }
}

impl RecordingPreset {
    /// Parse a preset from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Preset(e.to_string()))
    }

    /// Load a preset from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Preset(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
}

/// Immutable configuration of one recording session
pub struct SessionConfig {
    video: VideoParams,
    audio: AudioParams,
    container: ContainerFormat,
    muxer: MuxerHandle,
    output_directory: PathBuf,
    output_path: PathBuf,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("video", &self.video)
            .field("audio", &self.audio)
            .field("container", &self.container)
            .field("output_path", &self.output_path)
            .finish()
    }
}

impl SessionConfig {
    /// Start building a session that records to `output_location`
    pub fn builder(output_location: impl AsRef<Path>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(output_location)
    }

    /// Video encoder parameters
    pub fn video(&self) -> &VideoParams {
        &self.video
    }

    /// Audio encoder parameters
    pub fn audio(&self) -> &AudioParams {
        &self.audio
    }

    /// Container format of the output
    pub fn container(&self) -> ContainerFormat {
        self.container
    }

    /// Shared muxer both pipelines write into
    pub fn muxer(&self) -> &MuxerHandle {
        &self.muxer
    }

    /// Temporary per-session directory holding the output file
    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Path the container is written to
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Combined video and audio bitrate
    pub fn total_bitrate(&self) -> u64 {
        self.video.bitrate as u64 + self.audio.bitrate as u64
    }
}

/// Validating builder for [`SessionConfig`]
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    requested_output: PathBuf,
    width: u32,
    height: u32,
    frame_rate: u32,
    video_bitrate: Option<u32>,
    sample_rate: u32,
    audio_bitrate: u32,
    channels: u16,
}

impl SessionConfigBuilder {
    /// Builder with the recorder defaults for `output_location`
    pub fn new(output_location: impl AsRef<Path>) -> Self {
        let preset = RecordingPreset::default();
        Self {
            requested_output: output_location.as_ref().to_path_buf(),
            width: preset.width,
            height: preset.height,
            frame_rate: preset.frame_rate,
            video_bitrate: preset.video_bitrate,
            sample_rate: preset.sample_rate,
            audio_bitrate: preset.audio_bitrate,
            channels: preset.channels,
        }
    }

    /// Apply every field of a preset
    pub fn with_preset(mut self, preset: &RecordingPreset) -> Self {
        self.width = preset.width;
        self.height = preset.height;
        self.frame_rate = preset.frame_rate;
        self.video_bitrate = preset.video_bitrate;
        self.sample_rate = preset.sample_rate;
        self.audio_bitrate = preset.audio_bitrate;
        self.channels = preset.channels;
        self
    }

    pub fn with_video_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Override the derived video bitrate
    pub fn with_video_bitrate(mut self, bitrate: u32) -> Self {
        self.video_bitrate = Some(bitrate);
        self
    }

    pub fn with_video_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_audio_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_audio_bitrate(mut self, bitrate: u32) -> Self {
        self.audio_bitrate = bitrate;
        self
    }

    pub fn with_audio_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Video parameters as they would be built
    pub fn video_params(&self) -> VideoParams {
        VideoParams {
            width: self.width,
            height: self.height,
            bitrate: self
                .video_bitrate
                .unwrap_or_else(|| derived_video_bitrate(self.width, self.height, self.frame_rate)),
            frame_rate: self.frame_rate,
        }
    }

    /// Audio parameters as they would be built
    pub fn audio_params(&self) -> AudioParams {
        AudioParams {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bitrate: self.audio_bitrate,
        }
    }

    /// Check every parameter without touching the filesystem
    pub fn validate(&self) -> Result<ContainerFormat, ConfigError> {
        if !matches!(self.channels, 1 | 2) {
            return Err(ConfigError::InvalidChannelCount(self.channels));
        }
        for (name, value) in [
            ("width", self.width),
            ("height", self.height),
            ("frame rate", self.frame_rate),
            ("sample rate", self.sample_rate),
            ("audio bitrate", self.audio_bitrate),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroParameter(name));
            }
        }
        if self.video_bitrate == Some(0) {
            return Err(ConfigError::ZeroParameter("video bitrate"));
        }
        if self.requested_output.file_name().is_none() {
            return Err(ConfigError::InvalidOutputPath(
                self.requested_output.display().to_string(),
            ));
        }
        ContainerFormat::from_path(&self.requested_output).ok_or_else(|| {
            ConfigError::UnsupportedContainer(self.requested_output.display().to_string())
        })
    }

    /// Validate, create the session directory and open the container writer
    ///
    /// `open_writer` receives the resolved output path and container format.
    /// Any failure is fatal to the session.
    pub fn build<F>(self, open_writer: F) -> RecorderResult<SessionConfig>
    where
        F: FnOnce(&Path, ContainerFormat) -> Result<Box<dyn ContainerWriter>, MuxerError>,
    {
        let container = self.validate()?;
        let (output_directory, output_path) = self.create_recording_path()?;

        let writer = open_writer(&output_path, container)?;
        let muxer = MuxerHandle::new(Muxer::new(output_path.clone(), writer));

        let video = self.video_params();
        let audio = self.audio_params();

        info!(
            output = %output_path.display(),
            width = video.width,
            height = video.height,
            video_bitrate = video.bitrate,
            frame_rate = video.frame_rate,
            sample_rate = audio.sample_rate,
            channels = audio.channels,
            audio_bitrate = audio.bitrate,
            "Built session config"
        );

        Ok(SessionConfig {
            video,
            audio,
            container,
            muxer,
            output_directory,
            output_path,
        })
    }

    /// `<parent>/session_temp/<uuid>/<file name>`, creating the directories
    fn create_recording_path(&self) -> Result<(PathBuf, PathBuf), ConfigError> {
        let file_name = self.requested_output.file_name().ok_or_else(|| {
            ConfigError::InvalidOutputPath(self.requested_output.display().to_string())
        })?;
        let parent = match self.requested_output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let session_dir = parent
            .join(defaults::SESSION_TEMP_FOLDER)
            .join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&session_dir)?;
        debug!(dir = %session_dir.display(), "Created session directory");

        let output_path = session_dir.join(file_name);
        Ok((session_dir, output_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_video_bitrate_is_derived() {
        let builder = SessionConfigBuilder::new("/tmp/clip.mp4");
        assert_eq!(builder.video_params().bitrate, 2_332_800);

        let builder = builder.with_video_resolution(1280, 720);
        assert_eq!(
            builder.video_params().bitrate,
            derived_video_bitrate(1280, 720, defaults::FRAME_RATE)
        );
    }

    #[test]
    fn test_explicit_bitrate_wins() {
        let builder = SessionConfigBuilder::new("/tmp/clip.mp4")
            .with_video_bitrate(4_000_000)
            .with_video_resolution(1920, 1080);
        assert_eq!(builder.video_params().bitrate, 4_000_000);
    }

    #[test]
    fn test_channel_validation() {
        for channels in [0u16, 3, 6] {
            let err = SessionConfigBuilder::new("/tmp/clip.mp4")
                .with_audio_channels(channels)
                .validate()
                .unwrap_err();
            assert_eq!(err, ConfigError::InvalidChannelCount(channels));
        }
        assert!(
            SessionConfigBuilder::new("/tmp/clip.mp4")
                .with_audio_channels(2)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_container_extension() {
        assert_eq!(
            ContainerFormat::from_path(Path::new("a/b/CLIP.MP4")),
            Some(ContainerFormat::Mpeg4)
        );
        assert_eq!(ContainerFormat::from_path(Path::new("a/b/clip.m3u8")), None);
        assert!(matches!(
            SessionConfigBuilder::new("/tmp/clip.webm").validate(),
            Err(ConfigError::UnsupportedContainer(_))
        ));
    }

    #[test]
    fn test_zero_parameters_rejected() {
        let err = SessionConfigBuilder::new("/tmp/clip.mp4")
            .with_video_frame_rate(0)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroParameter("frame rate"));
    }

    #[test]
    fn test_preset_defaults_fill_missing_fields() {
        let preset = RecordingPreset::from_json_str(r#"{ "width": 1920, "height": 1080 }"#).unwrap();
        assert_eq!(preset.width, 1920);
        assert_eq!(preset.frame_rate, defaults::FRAME_RATE);
        assert_eq!(preset.channels, defaults::CHANNELS);
        assert!(preset.video_bitrate.is_none());
    }

    #[test]
    fn test_resolution_orientation() {
        let params = VideoParams {
            width: 720,
            height: 1080,
            bitrate: 1,
            frame_rate: 30,
        };
        assert_eq!(params.resolution_width(), 1080);
        assert_eq!(params.resolution_height(), 720);
    }
}
