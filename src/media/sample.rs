// SPDX-License-Identifier: MPL-2.0

//! Encoded sample model shared by encoders, the drain and the muxer

use std::fmt;

/// Index of a track inside the output container, assigned in registration order
pub type TrackIndex = usize;

/// MIME type of the H.264/AVC video track
pub const VIDEO_MIME: &str = "video/avc";

/// MIME type of the AAC-LC audio track
pub const AUDIO_MIME: &str = "audio/mp4a-latm";

/// Which kind of stream an encoder produces
///
/// The drain matches on this instead of dispatching through a type hierarchy:
/// video encoders are fed through a surface and told about end of input,
/// audio encoders are fed PCM and converge through the forced end-of-stream flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Surface-fed H.264 video
    Video,
    /// PCM-fed AAC audio
    Audio,
}

impl StreamKind {
    /// Lowercase label used in log fields
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Flags carried by an encoded sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// Payload is codec configuration (SPS/PPS, AudioSpecificConfig) only
    pub codec_config: bool,
    /// Last sample of the track
    pub end_of_stream: bool,
    /// Sample is a sync (key) frame
    pub key_frame: bool,
}

impl SampleFlags {
    /// Flags for a regular key frame
    pub const KEY_FRAME: SampleFlags = SampleFlags {
        codec_config: false,
        end_of_stream: false,
        key_frame: true,
    };

    /// Flags for a codec configuration buffer
    pub const CODEC_CONFIG: SampleFlags = SampleFlags {
        codec_config: true,
        end_of_stream: false,
        key_frame: false,
    };

    /// Flags marking the end of the stream
    pub const END_OF_STREAM: SampleFlags = SampleFlags {
        codec_config: false,
        end_of_stream: true,
        key_frame: false,
    };
}

/// Description of a dequeued output buffer: a byte window plus timing and flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Start of the payload inside the output buffer
    pub offset: usize,
    /// Payload length in bytes
    pub size: usize,
    /// Absolute presentation timestamp in microseconds
    pub presentation_time_us: i64,
    /// Sample flags
    pub flags: SampleFlags,
}

/// An encoded sample borrowed from an encoder's output buffer
///
/// The encoder keeps ownership of the bytes; the drain hands the sample to the
/// muxer and releases the buffer back to the encoder once the muxer returns.
#[derive(Debug, Clone, Copy)]
pub struct EncodedSample<'a> {
    /// Payload bytes (already windowed to offset/size)
    pub data: &'a [u8],
    /// Sample flags
    pub flags: SampleFlags,
    /// Presentation timestamp in microseconds
    pub presentation_time_us: i64,
}

impl<'a> EncodedSample<'a> {
    /// Window `buffer` according to `info`
    ///
    /// Returns `None` when the window falls outside the buffer.
    pub fn from_buffer(buffer: &'a [u8], info: &BufferInfo) -> Option<Self> {
        let end = info.offset.checked_add(info.size)?;
        let data = buffer.get(info.offset..end)?;
        Some(Self {
            data,
            flags: info.flags,
            presentation_time_us: info.presentation_time_us,
        })
    }

    /// Whether the muxer should write this sample's payload
    pub fn has_payload(&self) -> bool {
        !self.flags.codec_config && !self.data.is_empty()
    }
}

/// Video track format reported by the encoder once its output is configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Nominal frame rate
    pub frame_rate: u32,
    /// avcC decoder configuration record
    pub codec_data: Vec<u8>,
}

/// Audio track format reported by the encoder once its output is configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// AudioSpecificConfig bytes
    pub codec_data: Vec<u8>,
}

/// Output format of one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFormat {
    /// H.264 video
    Video(VideoFormat),
    /// AAC-LC audio
    Audio(AudioFormat),
}

impl TrackFormat {
    /// Stream kind of this format
    pub fn kind(&self) -> StreamKind {
        match self {
            TrackFormat::Video(_) => StreamKind::Video,
            TrackFormat::Audio(_) => StreamKind::Audio,
        }
    }

    /// MIME type of this format
    pub fn mime(&self) -> &'static str {
        match self {
            TrackFormat::Video(_) => VIDEO_MIME,
            TrackFormat::Audio(_) => AUDIO_MIME,
        }
    }

    /// Codec-specific configuration bytes
    pub fn codec_data(&self) -> &[u8] {
        match self {
            TrackFormat::Video(v) => &v.codec_data,
            TrackFormat::Audio(a) => &a.codec_data,
        }
    }
}
