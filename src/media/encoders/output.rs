// SPDX-License-Identifier: MPL-2.0

//! Appsink-backed output queue shared by the GStreamer encoders
//!
//! Turns samples pulled from an encoder branch's appsink into the
//! [`OutputStatus`] sequence the drain expects: one `FormatChanged` built
//! from the first sample's caps, then `Ready` buffers, then a single
//! zero-length end-of-stream buffer once the appsink reports EOS.

use super::OutputStatus;
use crate::media::sample::{BufferInfo, SampleFlags, StreamKind, TrackFormat};
use gstreamer as gst;
use gstreamer_app as gst_app;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Builds the track format from the caps of the first encoded sample
pub(super) type FormatProbe = Box<dyn Fn(&gst::CapsRef) -> Option<TrackFormat> + Send>;

/// Read `codec_data` from the first structure of `caps`
pub(super) fn codec_data(caps: &gst::CapsRef) -> Option<Vec<u8>> {
    let buffer = caps
        .structure(0)?
        .get::<gst::Buffer>("codec_data")
        .ok()?;
    let map = buffer.map_readable().ok()?;
    Some(map.as_slice().to_vec())
}

pub(super) struct AppSinkOutput {
    kind: StreamKind,
    appsink: gst_app::AppSink,
    probe: FormatProbe,
    format_reported: bool,
    eos_reported: bool,
    /// Sample pulled while the format was still unreported
    held: Option<gst::Sample>,
    /// Output buffers by index; `None` slots are free
    slots: Vec<Option<Vec<u8>>>,
}

impl AppSinkOutput {
    pub fn new(kind: StreamKind, appsink: gst_app::AppSink, probe: FormatProbe) -> Self {
        Self {
            kind,
            appsink,
            probe,
            format_reported: false,
            eos_reported: false,
            held: None,
            slots: Vec::new(),
        }
    }

    pub fn dequeue(&mut self, timeout: Duration) -> OutputStatus {
        let sample = match self.held.take() {
            Some(sample) => sample,
            None => {
                let timeout = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
                match self.appsink.try_pull_sample(timeout) {
                    Some(sample) => sample,
                    None => return self.idle(),
                }
            }
        };

        if !self.format_reported {
            let Some(format) = sample.caps().and_then(|caps| (self.probe)(caps)) else {
                warn!(kind = %self.kind, "Encoded sample without usable caps");
                return OutputStatus::TryAgainLater;
            };
            debug!(kind = %self.kind, ?format, "Encoder output format known");
            self.format_reported = true;
            self.held = Some(sample);
            return OutputStatus::FormatChanged(format);
        }

        let Some(buffer) = sample.buffer() else {
            return OutputStatus::TryAgainLater;
        };
        let Ok(map) = buffer.map_readable() else {
            warn!(kind = %self.kind, "Failed to map encoded buffer");
            return OutputStatus::TryAgainLater;
        };

        let gst_flags = buffer.flags();
        let info = BufferInfo {
            offset: 0,
            size: map.size(),
            presentation_time_us: buffer
                .pts()
                .map(|pts| pts.useconds() as i64)
                .unwrap_or_default(),
            flags: SampleFlags {
                codec_config: gst_flags.contains(gst::BufferFlags::HEADER),
                end_of_stream: false,
                key_frame: !gst_flags.contains(gst::BufferFlags::DELTA_UNIT),
            },
        };
        let index = self.store(map.as_slice().to_vec());
        trace!(kind = %self.kind, index, size = info.size, pts = info.presentation_time_us, "Encoded buffer ready");
        OutputStatus::Ready { index, info }
    }

    /// Nothing pulled: report end of stream once, otherwise try again
    fn idle(&mut self) -> OutputStatus {
        if self.appsink.is_eos() && !self.eos_reported {
            self.eos_reported = true;
            debug!(kind = %self.kind, "Encoder reached end of stream");
            let index = self.store(Vec::new());
            return OutputStatus::Ready {
                index,
                info: BufferInfo {
                    flags: SampleFlags::END_OF_STREAM,
                    ..Default::default()
                },
            };
        }
        OutputStatus::TryAgainLater
    }

    fn store(&mut self, bytes: Vec<u8>) -> usize {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(bytes);
                index
            }
            None => {
                self.slots.push(Some(bytes));
                self.slots.len() - 1
            }
        }
    }

    pub fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(index)?.as_deref()
    }

    pub fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.held = None;
    }
}
