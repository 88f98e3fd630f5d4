// SPDX-License-Identifier: MPL-2.0

//! Track-synchronizing muxer
//!
//! The muxer is the one piece of state both pipeline threads share. It owns
//! no thread; every operation runs under the lock of a [`MuxerHandle`].
//!
//! ```text
//! add_track(video) ─┐
//!                   ├─▶ 2 tracks registered ─▶ writer.start()
//! add_track(audio) ─┘
//!
//! write_sample(track, sample) ─▶ relative, strictly increasing PTS ─▶ writer
//!
//! EOS on both tracks ─┐
//!                     ├─▶ writer.stop() ─▶ release() ─▶ completion event
//! force_stop() ───────┘        (first one wins, later calls are no-ops)
//! ```

use crate::constants::{EXPECTED_TRACKS, PTS_BUMP_US};
use crate::errors::MuxerError;
use crate::media::sample::{EncodedSample, TrackFormat, TrackIndex};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, trace, warn};

/// Underlying container file writer
///
/// The muxer serializes all calls and guarantees `start` happens once, before
/// any `write_sample`, and that at most one of `stop`/`release` ends the writer.
pub trait ContainerWriter: Send {
    /// Declare a track before the container starts
    fn add_track(&mut self, index: TrackIndex, format: &TrackFormat) -> Result<(), MuxerError>;

    /// Begin writing the container
    fn start(&mut self) -> Result<(), MuxerError>;

    /// Write one sample with its container-relative timestamp
    fn write_sample(
        &mut self,
        track: TrackIndex,
        sample: &EncodedSample<'_>,
        presentation_time_us: i64,
    ) -> Result<(), MuxerError>;

    /// Finalize the container
    fn stop(&mut self) -> Result<(), MuxerError>;

    /// Drop the writer without finalizing; used when the container never started
    fn release(&mut self) {}
}

/// The view of the muxer an encoder drain is given
pub trait TrackSink {
    /// Register a track format and receive its index
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackIndex, MuxerError>;

    /// Write a sample to a registered track
    fn write_sample(
        &mut self,
        track: TrackIndex,
        sample: &EncodedSample<'_>,
    ) -> Result<(), MuxerError>;

    /// The encoder feeding `track` has been released
    fn on_encoder_released(&mut self, track: TrackIndex);

    /// Stop the container now, whatever the tracks' state
    fn force_stop(&mut self);
}

/// Completion event emitted once per muxer release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxerFinished {
    /// File the container was written to
    pub output_path: PathBuf,
    /// Whether the container was ever started
    pub started: bool,
    /// Whether the stop was forced by an exhausted end-of-stream wait
    pub forced: bool,
    /// Whether the writer finalized the file successfully
    pub finalized: bool,
}

type FinishedCallback = Box<dyn FnOnce(MuxerFinished) + Send>;

#[derive(Debug)]
struct TrackState {
    index: TrackIndex,
    last_written_pts: Option<i64>,
    finished: bool,
    encoder_released: bool,
}

/// Muxer state. Shared through [`MuxerHandle`].
pub struct Muxer {
    writer: Option<Box<dyn ContainerWriter>>,
    output_path: PathBuf,
    tracks: Vec<TrackState>,
    finished_tracks: usize,
    started: bool,
    stopped: bool,
    forced: bool,
    finalized: bool,
    released: bool,
    first_pts: Option<i64>,
    on_finished: Option<FinishedCallback>,
    finished_event: Option<MuxerFinished>,
}

impl fmt::Debug for Muxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Muxer")
            .field("output_path", &self.output_path)
            .field("tracks", &self.tracks)
            .field("finished_tracks", &self.finished_tracks)
            .field("started", &self.started)
            .field("stopped", &self.stopped)
            .field("released", &self.released)
            .field("first_pts", &self.first_pts)
            .finish()
    }
}

impl Muxer {
    /// Create a muxer writing to `output_path` through `writer`
    pub fn new(output_path: PathBuf, writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            writer: Some(writer),
            output_path,
            tracks: Vec::with_capacity(EXPECTED_TRACKS),
            finished_tracks: 0,
            started: false,
            stopped: false,
            forced: false,
            finalized: false,
            released: false,
            first_pts: None,
            on_finished: None,
            finished_event: None,
        }
    }

    /// Register the completion callback.
    ///
    /// Runs with the muxer locked, so it must not lock the muxer again. If the
    /// muxer was already released the callback runs immediately.
    pub fn on_finished<F>(&mut self, callback: F)
    where
        F: FnOnce(MuxerFinished) + Send + 'static,
    {
        if let Some(event) = self.finished_event.clone() {
            callback(event);
            return;
        }
        if self.on_finished.replace(Box::new(callback)).is_some() {
            warn!("Replacing previously registered muxer completion callback");
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn registered_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn finished_tracks(&self) -> usize {
        self.finished_tracks
    }

    /// Last container-relative timestamp written to `track`
    pub fn last_written_pts(&self, track: TrackIndex) -> Option<i64> {
        self.track(track).and_then(|t| t.last_written_pts)
    }

    fn track(&self, index: TrackIndex) -> Option<&TrackState> {
        self.tracks.iter().find(|t| t.index == index)
    }

    /// Register a track; the container starts when the last expected track arrives
    pub fn add_track(&mut self, format: &TrackFormat) -> Result<TrackIndex, MuxerError> {
        if self.stopped {
            debug!(kind = %format.kind(), "Track registered after the container stopped");
            return Err(MuxerError::Released);
        }
        if self.started {
            error!(kind = %format.kind(), "Track format changed after the container started");
            return Err(MuxerError::FormatChangedTwice);
        }
        if self.tracks.len() >= EXPECTED_TRACKS {
            return Err(MuxerError::TooManyTracks(EXPECTED_TRACKS));
        }

        let index = self.tracks.len();
        let writer = self.writer.as_mut().ok_or(MuxerError::Released)?;
        writer.add_track(index, format)?;
        self.tracks.push(TrackState {
            index,
            last_written_pts: None,
            finished: false,
            encoder_released: false,
        });
        info!(
            track = index,
            kind = %format.kind(),
            mime = format.mime(),
            "Registered track"
        );

        if self.tracks.len() == EXPECTED_TRACKS {
            writer.start()?;
            self.started = true;
            info!(output = %self.output_path.display(), "Container started");
        }

        Ok(index)
    }

    /// Write a sample, normalizing its timestamp
    ///
    /// Config-only and empty payloads are dropped, as are samples that arrive
    /// before the container started or after it stopped. An end-of-stream flag
    /// counts the track as finished whether or not a payload is written.
    pub fn write_sample(
        &mut self,
        track: TrackIndex,
        sample: &EncodedSample<'_>,
    ) -> Result<(), MuxerError> {
        let slot = self
            .tracks
            .iter()
            .position(|t| t.index == track)
            .ok_or(MuxerError::UnknownTrack(track))?;

        if self.stopped {
            trace!(track, "Dropping sample written after the container stopped");
            return Ok(());
        }

        if !sample.has_payload() {
            debug!(
                track,
                size = sample.data.len(),
                codec_config = sample.flags.codec_config,
                "Dropping config or empty sample"
            );
        } else if !self.started {
            warn!(
                track,
                pts_us = sample.presentation_time_us,
                "Dropping sample written before the container started"
            );
        } else {
            let pts = self.next_relative_pts(slot, sample.presentation_time_us);
            let writer = self.writer.as_mut().ok_or(MuxerError::Released)?;
            writer.write_sample(track, sample, pts)?;
            self.tracks[slot].last_written_pts = Some(pts);
            trace!(track, pts_us = pts, size = sample.data.len(), "Wrote sample");
        }

        if sample.flags.end_of_stream && !self.tracks[slot].finished {
            self.tracks[slot].finished = true;
            self.finished_tracks += 1;
            info!(
                track,
                finished = self.finished_tracks,
                expected = EXPECTED_TRACKS,
                "Track reached end of stream"
            );
            if self.finished_tracks == EXPECTED_TRACKS {
                self.stop();
            }
        }

        Ok(())
    }

    /// Container-relative timestamp for the sample in `slot`
    ///
    /// The first sample across all tracks sets the epoch. A timestamp that does
    /// not advance past the track's last one is bumped just beyond it.
    fn next_relative_pts(&mut self, slot: usize, absolute_us: i64) -> i64 {
        let first = *self.first_pts.get_or_insert(absolute_us);
        let relative = absolute_us - first;

        match self.tracks[slot].last_written_pts {
            None => relative.max(0),
            Some(last) if relative <= last => {
                trace!(
                    track = self.tracks[slot].index,
                    relative, last, "Bumping non-increasing timestamp"
                );
                last + PTS_BUMP_US
            }
            Some(_) => relative,
        }
    }

    /// Record that the encoder feeding `track` was released
    pub fn on_encoder_released(&mut self, track: TrackIndex) {
        match self.tracks.iter_mut().find(|t| t.index == track) {
            Some(state) => {
                state.encoder_released = true;
                debug!(track, finished = state.finished, "Encoder released");
            }
            None => warn!(track, "Release reported for unknown track"),
        }
    }

    /// Stop the container regardless of how many tracks finished
    pub fn force_stop(&mut self) {
        if self.stopped {
            debug!("Force stop ignored, container already stopped");
            return;
        }
        warn!(
            finished = self.finished_tracks,
            expected = EXPECTED_TRACKS,
            "Forcing container stop"
        );
        self.forced = true;
        self.stop();
    }

    /// Finalize (or discard, if never started) the container, then release
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(writer) = self.writer.as_mut() {
            if self.started {
                match writer.stop() {
                    Ok(()) => {
                        self.finalized = true;
                        info!(output = %self.output_path.display(), "Container stopped");
                    }
                    Err(e) => error!(error = %e, "Failed to finalize container"),
                }
            } else {
                warn!("Container never started, releasing without finalizing");
                writer.release();
            }
        }

        self.release();
    }

    /// Idempotent teardown; stops the container if needed and fires the
    /// completion event exactly once
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        if !self.stopped {
            // stop() comes back here once the writer is done
            self.stop();
            return;
        }
        self.released = true;
        self.writer = None;

        let event = MuxerFinished {
            output_path: self.output_path.clone(),
            started: self.started,
            forced: self.forced,
            finalized: self.finalized,
        };
        info!(
            output = %event.output_path.display(),
            forced = event.forced,
            finalized = event.finalized,
            "Muxer released"
        );
        self.finished_event = Some(event.clone());
        if let Some(callback) = self.on_finished.take() {
            callback(event);
        }
    }
}

impl TrackSink for Muxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackIndex, MuxerError> {
        Muxer::add_track(self, format)
    }

    fn write_sample(
        &mut self,
        track: TrackIndex,
        sample: &EncodedSample<'_>,
    ) -> Result<(), MuxerError> {
        Muxer::write_sample(self, track, sample)
    }

    fn on_encoder_released(&mut self, track: TrackIndex) {
        Muxer::on_encoder_released(self, track)
    }

    fn force_stop(&mut self) {
        Muxer::force_stop(self)
    }
}

/// Shared, lockable handle to a [`Muxer`]
#[derive(Clone)]
pub struct MuxerHandle(Arc<Mutex<Muxer>>);

impl MuxerHandle {
    pub fn new(muxer: Muxer) -> Self {
        Self(Arc::new(Mutex::new(muxer)))
    }

    /// Exclusive access to the muxer.
    ///
    /// A pipeline thread that panicked while holding the lock leaves the
    /// muxer usable; its state transitions are all single assignments.
    pub fn lock(&self) -> MutexGuard<'_, Muxer> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_started(&self) -> bool {
        self.lock().is_started()
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_released()
    }

    pub fn output_path(&self) -> PathBuf {
        self.lock().output_path().to_path_buf()
    }

    pub fn on_finished<F>(&self, callback: F)
    where
        F: FnOnce(MuxerFinished) + Send + 'static,
    {
        self.lock().on_finished(callback);
    }

    /// One-shot receiver for the completion event
    pub fn finished_channel(&self) -> mpsc::Receiver<MuxerFinished> {
        let (tx, rx) = mpsc::channel();
        self.on_finished(move |event| {
            let _ = tx.send(event);
        });
        rx
    }

    pub fn force_stop(&self) {
        self.lock().force_stop();
    }

    pub fn release(&self) {
        self.lock().release();
    }

    /// Whether two handles refer to the same muxer
    pub fn same_muxer(&self, other: &MuxerHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for MuxerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Ok(muxer) => write!(f, "MuxerHandle({})", muxer.output_path.display()),
            Err(_) => f.write_str("MuxerHandle(<locked>)"),
        }
    }
}
