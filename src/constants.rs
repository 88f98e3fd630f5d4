// SPDX-License-Identifier: GPL-3.0-only

//! Recorder-wide constants
//!
//! Timing budgets, session defaults and the timestamp tuning values shared by
//! the encoder drain, the muxer and both capture pipelines.

use std::time::Duration;

/// Number of tracks a session container carries (one video, one audio)
pub const EXPECTED_TRACKS: usize = 2;

/// How long a single output-queue poll may block
pub const DRAIN_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Empty polls tolerated while waiting for end-of-stream before forcing the
/// container to stop
pub const MAX_EOS_SPINS: u32 = 10;

/// Increment applied when a track's relative timestamp does not advance.
///
/// Empirical value; only the strict increase it produces matters.
pub const PTS_BUMP_US: i64 = 9_643;

/// Audio frames (samples per channel) pulled from the capture device per
/// iteration. AAC consumes input in multiples of this.
pub const SAMPLES_PER_FRAME: usize = 1024;

/// Frame commands allowed in the video queue before new frames are dropped
pub const MAX_PENDING_FRAMES: usize = 2;

/// Microseconds per second, used for all sample/duration conversions
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Session defaults
pub mod defaults {
    /// Default frame width
    pub const WIDTH: u32 = 720;
    /// Default frame height
    pub const HEIGHT: u32 = 1080;
    /// Default frame rate
    pub const FRAME_RATE: u32 = 30;
    /// Bits per pixel used to derive the default video bitrate
    pub const BITS_PER_PIXEL: f32 = 0.10;
    /// Default audio sample rate in Hz
    pub const SAMPLE_RATE: u32 = 44_100;
    /// Default audio bitrate in bits per second
    pub const AUDIO_BITRATE: u32 = 96_000;
    /// Default channel count (mono)
    pub const CHANNELS: u16 = 1;
    /// Seconds between key frames
    pub const IFRAME_INTERVAL_SECS: u32 = 5;
    /// Folder created beside the requested output to hold in-progress sessions
    pub const SESSION_TEMP_FOLDER: &str = "session_temp";
    /// Folder used under the user's video directory by the CLI
    pub const SAVE_FOLDER: &str = "Camera";
}

/// Derive a video bitrate (bits per second) from the frame geometry
pub fn derived_video_bitrate(width: u32, height: u32, frame_rate: u32) -> u32 {
    let bits = defaults::BITS_PER_PIXEL as f64 * frame_rate as f64 * width as f64 * height as f64;
    bits.min(u32::MAX as f64) as u32
}

/// Duration in microseconds of `frames` audio frames at `sample_rate`
pub fn frames_to_micros(frames: u64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    (MICROS_PER_SECOND as i128 * frames as i128 / sample_rate as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bitrate() {
        // 0.10 * 30 * 720 * 1080
        assert_eq!(
            derived_video_bitrate(defaults::WIDTH, defaults::HEIGHT, defaults::FRAME_RATE),
            2_332_800
        );
    }

    #[test]
    fn test_frames_to_micros() {
        assert_eq!(frames_to_micros(1024, 44_100), 23_219);
        assert_eq!(frames_to_micros(2048, 44_100), 46_439);
        assert_eq!(frames_to_micros(48_000, 48_000), 1_000_000);
        assert_eq!(frames_to_micros(10, 0), 0);
    }
}
