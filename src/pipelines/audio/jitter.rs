// SPDX-License-Identifier: MPL-2.0

//! Jitter-free audio timestamps
//!
//! Capture timestamps wobble from chunk to chunk. The corrector replaces them
//! with an arithmetic timeline derived from the number of frames delivered,
//! and only re-anchors that timeline when the capture clock has genuinely
//! drifted ahead by two chunk durations or more.

use crate::constants::frames_to_micros;
use tracing::debug;

/// Arithmetic timestamp generator for one capture session
#[derive(Debug, Clone)]
pub struct JitterCorrector {
    sample_rate: u32,
    start_pts: i64,
    total_frames: u64,
}

impl JitterCorrector {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            start_pts: 0,
            total_frames: 0,
        }
    }

    /// Timestamp for a chunk of `frames` frames captured at `raw_pts_us`
    pub fn correct(&mut self, raw_pts_us: i64, frames: u64) -> i64 {
        let buffer_duration = frames_to_micros(frames, self.sample_rate);
        // The chunk finished arriving at raw_pts_us; it started one duration earlier
        let raw = raw_pts_us - buffer_duration;

        if self.total_frames == 0 {
            self.start_pts = raw;
        }
        let mut expected = self.start_pts + frames_to_micros(self.total_frames, self.sample_rate);

        if raw - expected >= 2 * buffer_duration {
            debug!(
                raw_us = raw,
                expected_us = expected,
                drift_us = raw - expected,
                "Audio clock drifted, resynchronizing"
            );
            self.start_pts = raw;
            self.total_frames = 0;
            expected = self.start_pts;
        }

        self.total_frames += frames;
        expected
    }

    /// Frames accounted for since the last (re)synchronization
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Epoch of the current timeline
    pub fn start_pts(&self) -> i64 {
        self.start_pts
    }

    /// Forget the timeline; the next chunk starts a new one
    pub fn reset(&mut self) {
        self.start_pts = 0;
        self.total_frames = 0;
    }
}
