// SPDX-License-Identifier: MPL-2.0

//! Error types for the recorder
//!
//! Every fatal condition of a session is one of these values. Pipelines log
//! and record them; nothing in the library panics on a recoverable path.

use std::fmt;

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Top-level recorder error
#[derive(Debug, Clone)]
pub enum RecorderError {
    /// Session configuration rejected at build time
    Config(ConfigError),
    /// Encoder construction or output-queue contract violation
    Encoder(EncoderError),
    /// Container/muxer protocol violation
    Muxer(MuxerError),
    /// Capture device failure
    Capture(CaptureError),
    /// Graphics context or surface failure
    Render(RenderError),
    /// Pipeline thread or command-queue failure
    Pipeline(PipelineError),
}

/// Session configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Channel count other than 1 or 2
    InvalidChannelCount(u16),
    /// Output path does not name a supported container
    UnsupportedContainer(String),
    /// Output path has no file name component
    InvalidOutputPath(String),
    /// A numeric parameter that must be positive was zero
    ZeroParameter(&'static str),
    /// Creating the session directory failed
    Io(String),
    /// Preset file could not be read or parsed
    Preset(String),
}

/// Encoder errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    /// Encoder could not be created or configured
    CreationFailed(String),
    /// No encoder implementation is available for the stream
    NotAvailable(String),
    /// Output buffer reported ready but not present (driver contract violation)
    MissingOutputBuffer(usize),
    /// Input could not be queued
    InputRejected(String),
    /// Encoder already released
    Released,
}

/// Muxer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxerError {
    /// `add_track` after the container started
    FormatChangedTwice,
    /// More tracks registered than the container expects
    TooManyTracks(usize),
    /// Track index was never registered
    UnknownTrack(usize),
    /// Muxer already released
    Released,
    /// Underlying container writer failed
    Writer(String),
}

/// Capture device errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Device could not be opened or started
    OpenFailed(String),
    /// Read returned an error
    ReadFailed(String),
    /// Device stopped delivering samples
    Disconnected,
}

/// Graphics errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Context creation against the shared context failed
    ContextCreation(String),
    /// Encode-target surface could not be bound
    SurfaceBinding(String),
    /// Drawing or presenting failed
    DrawFailed(String),
    /// Operation needs a bound surface
    NoSurface,
}

/// Pipeline errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Worker thread could not be spawned
    SpawnFailed(String),
    /// Worker thread exited before signalling readiness
    ThreadDied(String),
    /// Command queue is closed
    NotRunning,
    /// Operation requires the pipeline to be stopped first
    StillRunning,
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Config(e) => write!(f, "Configuration error: {}", e),
            RecorderError::Encoder(e) => write!(f, "Encoder error: {}", e),
            RecorderError::Muxer(e) => write!(f, "Muxer error: {}", e),
            RecorderError::Capture(e) => write!(f, "Capture error: {}", e),
            RecorderError::Render(e) => write!(f, "Render error: {}", e),
            RecorderError::Pipeline(e) => write!(f, "Pipeline error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidChannelCount(n) => {
                write!(f, "Invalid channel count {}. Must be 1 or 2", n)
            }
            ConfigError::UnsupportedContainer(path) => {
                write!(f, "Unsupported container output. Expected a .mp4, got: {}", path)
            }
            ConfigError::InvalidOutputPath(path) => write!(f, "Invalid output path: {}", path),
            ConfigError::ZeroParameter(name) => write!(f, "{} must be greater than zero", name),
            ConfigError::Io(msg) => write!(f, "I/O error: {}", msg),
            ConfigError::Preset(msg) => write!(f, "Invalid preset: {}", msg),
        }
    }
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::CreationFailed(msg) => write!(f, "Encoder creation failed: {}", msg),
            EncoderError::NotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            EncoderError::MissingOutputBuffer(index) => {
                write!(f, "Encoder output buffer {} was reported ready but is missing", index)
            }
            EncoderError::InputRejected(msg) => write!(f, "Encoder rejected input: {}", msg),
            EncoderError::Released => write!(f, "Encoder already released"),
        }
    }
}

impl fmt::Display for MuxerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxerError::FormatChangedTwice => {
                write!(f, "Track format changed after the container started")
            }
            MuxerError::TooManyTracks(expected) => {
                write!(f, "Container expects exactly {} tracks", expected)
            }
            MuxerError::UnknownTrack(index) => write!(f, "Unknown track index {}", index),
            MuxerError::Released => write!(f, "Muxer already released"),
            MuxerError::Writer(msg) => write!(f, "Container writer error: {}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::OpenFailed(msg) => write!(f, "Failed to open capture device: {}", msg),
            CaptureError::ReadFailed(msg) => write!(f, "Capture read failed: {}", msg),
            CaptureError::Disconnected => write!(f, "Capture device disconnected"),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::ContextCreation(msg) => write!(f, "Context creation failed: {}", msg),
            RenderError::SurfaceBinding(msg) => write!(f, "Surface binding failed: {}", msg),
            RenderError::DrawFailed(msg) => write!(f, "Draw failed: {}", msg),
            RenderError::NoSurface => write!(f, "No encode surface bound"),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::SpawnFailed(msg) => write!(f, "Failed to spawn worker thread: {}", msg),
            PipelineError::ThreadDied(name) => {
                write!(f, "{} thread exited during initialization", name)
            }
            PipelineError::NotRunning => write!(f, "Pipeline is not running"),
            PipelineError::StillRunning => write!(f, "Pipeline is still running"),
        }
    }
}

impl std::error::Error for RecorderError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for EncoderError {}
impl std::error::Error for MuxerError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for RenderError {}
impl std::error::Error for PipelineError {}

// Conversions from sub-errors to RecorderError
impl From<ConfigError> for RecorderError {
    fn from(err: ConfigError) -> Self {
        RecorderError::Config(err)
    }
}

impl From<EncoderError> for RecorderError {
    fn from(err: EncoderError) -> Self {
        RecorderError::Encoder(err)
    }
}

impl From<MuxerError> for RecorderError {
    fn from(err: MuxerError) -> Self {
        RecorderError::Muxer(err)
    }
}

impl From<CaptureError> for RecorderError {
    fn from(err: CaptureError) -> Self {
        RecorderError::Capture(err)
    }
}

impl From<RenderError> for RecorderError {
    fn from(err: RenderError) -> Self {
        RecorderError::Render(err)
    }
}

impl From<PipelineError> for RecorderError {
    fn from(err: PipelineError) -> Self {
        RecorderError::Pipeline(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl RecorderError {
    /// Whether this error came from a muxer protocol violation
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RecorderError::Muxer(MuxerError::FormatChangedTwice | MuxerError::TooManyTracks(_))
        )
    }
}
