// SPDX-License-Identifier: MPL-2.0

//! Encoder output drain shared by the video and audio pipelines
//!
//! One drain pass polls the encoder until it has nothing more to give:
//!
//! - **Nothing ready, no end of stream requested**: return, the caller retries
//!   on its next tick
//! - **Nothing ready, end of stream requested**: spin; after
//!   [`MAX_EOS_SPINS`] empty polls the container is force-stopped
//! - **Format known**: register the track with the muxer
//! - **Sample ready**: forward it (unless it is config-only or empty), release
//!   the buffer, stop once the end-of-stream sample went through
//!
//! The whole pass runs with the muxer locked so track registration and
//! timestamp state stay serialized across both pipeline threads.

use super::MediaEncoder;
use crate::constants::{DRAIN_POLL_TIMEOUT, MAX_EOS_SPINS};
use crate::errors::{EncoderError, RecorderResult};
use crate::media::encoders::OutputStatus;
use crate::media::sample::{EncodedSample, StreamKind, TrackIndex};
use crate::pipelines::muxer::{MuxerHandle, TrackSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// How a drain pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Output queue empty; more may come later
    Pending,
    /// The end-of-stream sample reached the muxer
    EndOfStream,
    /// End of stream never arrived and the container was force-stopped
    ForcedStop,
}

/// Per-encoder drain state
pub struct EncoderDrain {
    kind: StreamKind,
    muxer: MuxerHandle,
    track: Option<TrackIndex>,
    force_eos: Arc<AtomicBool>,
}

impl EncoderDrain {
    pub fn new(kind: StreamKind, muxer: MuxerHandle) -> Self {
        Self::with_end_of_stream_flag(kind, muxer, Arc::new(AtomicBool::new(false)))
    }

    /// Drain whose forced end-of-stream flag is owned by someone else
    pub fn with_end_of_stream_flag(
        kind: StreamKind,
        muxer: MuxerHandle,
        force_eos: Arc<AtomicBool>,
    ) -> Self {
        Self {
            kind,
            muxer,
            track: None,
            force_eos,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Track index assigned by the muxer, once the format is known
    pub fn track(&self) -> Option<TrackIndex> {
        self.track
    }

    pub fn muxer(&self) -> &MuxerHandle {
        &self.muxer
    }

    /// Mark the next forwarded sample as the last one
    pub fn signal_end_of_stream(&self) {
        self.force_eos.store(true, Ordering::SeqCst);
    }

    /// Flag another thread can set to request early termination
    pub fn end_of_stream_flag(&self) -> Arc<AtomicBool> {
        self.force_eos.clone()
    }

    /// Pull every available sample out of `encoder` into the muxer
    pub fn drain<E: MediaEncoder + ?Sized>(
        &mut self,
        encoder: &mut E,
        end_of_stream: bool,
    ) -> RecorderResult<DrainOutcome> {
        let mut muxer = self.muxer.lock();
        let sink: &mut dyn TrackSink = &mut *muxer;
        let mut eos_spins = 0u32;

        loop {
            match encoder.dequeue_output(DRAIN_POLL_TIMEOUT) {
                OutputStatus::TryAgainLater => {
                    if !end_of_stream {
                        return Ok(DrainOutcome::Pending);
                    }
                    eos_spins += 1;
                    if eos_spins > MAX_EOS_SPINS {
                        warn!(
                            stream = %self.kind,
                            spins = eos_spins,
                            "End of stream not observed, forcing container stop"
                        );
                        sink.force_stop();
                        return Ok(DrainOutcome::ForcedStop);
                    }
                    trace!(stream = %self.kind, spins = eos_spins, "Waiting for end of stream");
                }
                OutputStatus::BuffersChanged => {
                    debug!(stream = %self.kind, "Encoder output buffers changed");
                }
                OutputStatus::FormatChanged(format) => {
                    let track = sink.add_track(&format)?;
                    debug!(stream = %self.kind, track, "Encoder output format set");
                    self.track = Some(track);
                }
                OutputStatus::Unexpected(status) => {
                    warn!(stream = %self.kind, status, "Unexpected encoder output status");
                }
                OutputStatus::Ready { index, mut info } => {
                    if self.force_eos.load(Ordering::SeqCst) {
                        info.flags.end_of_stream = true;
                        debug!(stream = %self.kind, "Forcing end of stream on sample");
                    }

                    let reached_end = {
                        let buffer = encoder
                            .output_buffer(index)
                            .ok_or(EncoderError::MissingOutputBuffer(index))?;
                        let sample = EncodedSample::from_buffer(buffer, &info)
                            .ok_or(EncoderError::MissingOutputBuffer(index))?;

                        if sample.flags.end_of_stream || sample.has_payload() {
                            match self.track {
                                Some(track) => sink.write_sample(track, &sample)?,
                                None => warn!(
                                    stream = %self.kind,
                                    "Sample produced before the output format, dropping"
                                ),
                            }
                        } else {
                            trace!(stream = %self.kind, size = info.size, "Skipping config sample");
                        }
                        sample.flags.end_of_stream
                    };
                    encoder.release_output(index);

                    if reached_end {
                        if end_of_stream {
                            debug!(stream = %self.kind, "End of stream reached");
                        } else {
                            warn!(stream = %self.kind, "Reached end of stream unexpectedly");
                        }
                        return Ok(DrainOutcome::EndOfStream);
                    }
                }
            }
        }
    }

    /// Final drain once no more input will be queued
    ///
    /// Video converges on the encoder's own end-of-stream sample. Audio also
    /// marks the next forwarded sample as the last one.
    pub fn finish<E: MediaEncoder + ?Sized>(
        &mut self,
        encoder: &mut E,
    ) -> RecorderResult<DrainOutcome> {
        match self.kind {
            StreamKind::Video => encoder.signal_end_of_input(),
            StreamKind::Audio => {
                self.signal_end_of_stream();
                encoder.signal_end_of_input();
            }
        }
        self.drain(encoder, true)
    }

    /// Tell the muxer the encoder is gone, then release it
    pub fn release<E: MediaEncoder + ?Sized>(&mut self, encoder: &mut E) {
        if let Some(track) = self.track {
            self.muxer.lock().on_encoder_released(track);
        }
        encoder.release();
        debug!(stream = %self.kind, "Released encoder");
    }
}
