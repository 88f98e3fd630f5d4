// SPDX-License-Identifier: MPL-2.0

//! Synthetic sources for recording without hardware
//!
//! [`TestPattern`] paints moving color bars into a raster texture registry and
//! [`ToneCapture`] produces a sine tone paced at the real sample rate.

use crate::errors::CaptureError;
use crate::gpu::TextureId;
use crate::gpu::raster::ExternalTextures;
use crate::pipelines::audio::CaptureDevice;
use std::f32::consts::TAU;
use std::time::{Duration, Instant};
use tracing::debug;

/// SMPTE-style bar colors
const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

/// Moving color bar generator
#[derive(Debug, Clone)]
pub struct TestPattern {
    textures: ExternalTextures,
    texture: TextureId,
    width: u32,
    height: u32,
    frame: u64,
}

impl TestPattern {
    pub fn new(textures: ExternalTextures, texture: TextureId, width: u32, height: u32) -> Self {
        Self {
            textures,
            texture,
            width,
            height,
            frame: 0,
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Render the next frame into the registry
    pub fn paint_next(&mut self) {
        let rgba = render_bars(self.width, self.height, self.frame);
        self.textures
            .update(self.texture, self.width, self.height, rgba);
        self.frame += 1;
    }

    pub fn frames_painted(&self) -> u64 {
        self.frame
    }
}

/// Color bars shifted left by `frame` pixels, with a white sweep line
pub fn render_bars(width: u32, height: u32, frame: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut rgba = vec![0u8; w * h * 4];
    if w == 0 || h == 0 {
        return rgba;
    }

    let bar_width = w.div_ceil(BARS.len()).max(1);
    let shift = (frame as usize) % w;
    let sweep = (frame as usize * 2) % h;

    for (y, row) in rgba.chunks_exact_mut(w * 4).enumerate() {
        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            let color = if y == sweep {
                [255, 255, 255]
            } else {
                BARS[((x + shift) % w) / bar_width % BARS.len()]
            };
            pixel[..3].copy_from_slice(&color);
            pixel[3] = 255;
        }
    }
    rgba
}

/// Sine tone capture device
pub struct ToneCapture {
    frequency: f32,
    sample_rate: u32,
    channels: u16,
    phase: f32,
    started: Option<Instant>,
    frames_delivered: u64,
    paced: bool,
}

impl ToneCapture {
    /// A 440 Hz tone delivered no faster than real time
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            frequency: 440.0,
            sample_rate,
            channels,
            phase: 0.0,
            started: None,
            frames_delivered: 0,
            paced: true,
        }
    }

    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency = frequency;
        self
    }

    /// Deliver samples as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn pace(&self, started: Instant) {
        if !self.paced || self.sample_rate == 0 {
            return;
        }
        let due = Duration::from_secs_f64(self.frames_delivered as f64 / self.sample_rate as f64);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
    }
}

impl CaptureDevice for ToneCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(CaptureError::OpenFailed(
                "tone needs a sample rate and at least one channel".to_string(),
            ));
        }
        self.started = Some(Instant::now());
        self.frames_delivered = 0;
        debug!(
            frequency = self.frequency,
            sample_rate = self.sample_rate,
            channels = self.channels,
            "Tone capture started"
        );
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize, CaptureError> {
        let started = self.started.ok_or(CaptureError::Disconnected)?;
        let channels = usize::from(self.channels);
        let frames = buffer.len() / channels;
        let step = TAU * self.frequency / self.sample_rate as f32;

        for frame in buffer.chunks_exact_mut(channels) {
            let value = (self.phase.sin() * f32::from(i16::MAX) * 0.25) as i16;
            frame.fill(value);
            self.phase = (self.phase + step) % TAU;
        }

        self.frames_delivered += frames as u64;
        self.pace(started);
        Ok(frames * channels)
    }

    fn stop(&mut self) {
        if self.started.take().is_some() {
            debug!(frames = self.frames_delivered, "Tone capture stopped");
        }
    }
}
