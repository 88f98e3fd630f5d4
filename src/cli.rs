// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for recording
//!
//! This module provides command-line functionality for:
//! - Recording a test pattern with microphone (or tone) audio
//! - Listing audio input devices
//! - Listing installed encoders

use camrec::backends::audio::enumerate_audio_devices;
use camrec::config::{RecordingPreset, SessionConfigBuilder};
use camrec::constants::defaults;
use chrono::Local;
use clap::Args;
use std::path::{Path, PathBuf};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Recording duration in seconds
    #[arg(short, long, default_value = "10")]
    pub duration: u64,

    /// Output file path (default: ~/Videos/Camera/video_TIMESTAMP.mp4)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Preset JSON file; flags below override its values
    #[arg(short, long)]
    pub preset: Option<PathBuf>,

    /// Frame size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Video bitrate in bits per second
    #[arg(long)]
    pub video_bitrate: Option<u32>,

    /// Audio channel count (1 or 2)
    #[arg(long)]
    pub channels: Option<u16>,

    /// Audio device serial or node name (from 'camrec list-audio')
    #[arg(short, long)]
    pub audio_device: Option<String>,

    /// Record a sine tone instead of the microphone
    #[arg(long)]
    pub tone: bool,

    /// Preferred video encoder element (from 'camrec encoders')
    #[arg(long)]
    pub encoder: Option<String>,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid dimension '{}': {}", s, e))
    };
    Ok((parse(w)?, parse(h)?))
}

/// Apply the preset file and flag overrides to a builder
fn configure(
    mut builder: SessionConfigBuilder,
    preset: Option<&Path>,
    args: Option<&RecordArgs>,
) -> Result<SessionConfigBuilder, Box<dyn std::error::Error>> {
    if let Some(path) = preset {
        let preset = RecordingPreset::load(path)?;
        builder = builder.with_preset(&preset);
    }
    let Some(args) = args else {
        return Ok(builder);
    };
    if let Some((width, height)) = args.size {
        builder = builder.with_video_resolution(width, height);
    }
    if let Some(fps) = args.fps {
        builder = builder.with_video_frame_rate(fps);
    }
    if let Some(bitrate) = args.video_bitrate {
        builder = builder.with_video_bitrate(bitrate);
    }
    if let Some(channels) = args.channels {
        builder = builder.with_audio_channels(channels);
    }
    Ok(builder)
}

/// Print the parameters a recording would use
pub fn inspect(preset: Option<PathBuf>) -> CliResult {
    let builder = configure(
        SessionConfigBuilder::new(default_output_path()),
        preset.as_deref(),
        None,
    )?;
    let container = builder.validate()?;

    println!("Container: {}", container.extension());
    println!("Video: {}", serde_json::to_string_pretty(&builder.video_params())?);
    println!("Audio: {}", serde_json::to_string_pretty(&builder.audio_params())?);
    Ok(())
}

/// List audio input devices
pub fn list_audio_devices() -> CliResult {
    let devices = enumerate_audio_devices();

    if devices.is_empty() {
        println!("No audio input devices found.");
        return Ok(());
    }

    println!("Available audio inputs:");
    println!();
    for device in &devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{}", device.serial, device.name, marker);
        if let Some(channels) = device.channels {
            println!("      Channels: {}", channels);
        }
        println!("      Node: {}", device.node_name);
    }

    Ok(())
}

/// List installed encoders
#[cfg(feature = "gstreamer")]
pub fn list_encoders() -> CliResult {
    use camrec::media::encoders::detection;
    use camrec::media::encoders::video::enumerate_video_encoders;

    let video = enumerate_video_encoders();
    if video.is_empty() {
        println!("No H.264 encoders found.");
    } else {
        println!("H.264 encoders:");
        for encoder in &video {
            println!("  {} ({})", encoder.element_name, encoder.display_name);
        }
    }

    let audio = detection::detect_audio_encoders();
    if audio.is_empty() {
        println!("No AAC encoders found.");
    } else {
        println!("AAC encoders:");
        for encoder in &audio {
            println!("  {}", encoder);
        }
    }

    let missing = detection::missing_elements();
    if !missing.is_empty() {
        println!();
        println!("Missing elements: {}", missing.join(", "));
    }
    Ok(())
}

#[cfg(not(feature = "gstreamer"))]
pub fn list_encoders() -> CliResult {
    Err(without_gstreamer())
}

#[cfg(not(feature = "gstreamer"))]
pub fn record(_args: RecordArgs) -> CliResult {
    Err(without_gstreamer())
}

#[cfg(not(feature = "gstreamer"))]
fn without_gstreamer() -> Box<dyn std::error::Error> {
    "camrec was built without the `gstreamer` feature".into()
}

/// Record the test pattern until the duration elapses or Ctrl+C
#[cfg(feature = "gstreamer")]
pub fn record(args: RecordArgs) -> CliResult {
    use camrec::backends::audio::PipeWireCapture;
    use camrec::backends::synthetic::{TestPattern, ToneCapture};
    use camrec::clock;
    use camrec::gpu::IDENTITY_TRANSFORM;
    use camrec::gpu::raster::{ExternalTextures, RasterGraphics};
    use camrec::media::encoders::GstEncoderFactory;
    use camrec::pipelines::RecordingSession;
    use camrec::pipelines::audio::CaptureDevice;
    use camrec::pipelines::container::GstMp4Writer;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    const PATTERN_TEXTURE: u32 = 1;

    let output_path = args.output.clone().unwrap_or_else(default_output_path);
    let builder = configure(
        SessionConfigBuilder::new(&output_path),
        args.preset.as_deref(),
        Some(&args),
    )?;
    let config = builder.build(|path, format| {
        let writer = GstMp4Writer::new(path, format)?;
        Ok(Box::new(writer) as Box<dyn camrec::pipelines::ContainerWriter>)
    })?;

    let video = *config.video();
    let audio = *config.audio();
    println!("Recording to: {}", output_path.display());
    println!(
        "Video: {}x{} @ {}fps, {} kbps",
        video.width,
        video.height,
        video.frame_rate,
        video.bitrate / 1000
    );
    println!(
        "Audio: {} Hz, {} channel(s){}",
        audio.sample_rate,
        audio.channels,
        if args.tone { " (tone)" } else { "" }
    );

    let device: Box<dyn CaptureDevice> = if args.tone {
        Box::new(ToneCapture::new(audio.sample_rate, audio.channels))
    } else {
        Box::new(PipeWireCapture::new(
            args.audio_device.clone(),
            audio.sample_rate,
            audio.channels,
        ))
    };

    let finished = config.muxer().finished_channel();
    let factory = Arc::new(GstEncoderFactory {
        preferred_video_encoder: args.encoder.clone(),
    });
    let textures = ExternalTextures::new();
    let mut session = RecordingSession::new(config, factory, Arc::new(RasterGraphics), device)?;
    let session_dir = session.config().output_directory().to_path_buf();

    let mut pattern = TestPattern::new(textures.clone(), PATTERN_TEXTURE, video.width, video.height);
    pattern.paint_next();
    session.set_texture(pattern.texture());
    session.start(textures.shared_context(1))?;

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!();
    println!("Recording... (press Ctrl+C to stop early)");

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(video.frame_rate.max(1)));
    let start = Instant::now();
    let target_duration = Duration::from_secs(args.duration);
    let mut next_frame = start;

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        pattern.paint_next();
        session.frame_available(IDENTITY_TRANSFORM, clock::monotonic_ns());

        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        next_frame += frame_interval;
        if let Some(wait) = next_frame.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }
    println!();

    let temp_path = session.stop()?;
    drop(session);

    if let Ok(event) = finished.recv_timeout(Duration::from_secs(1))
        && event.forced
    {
        println!("Warning: an encoder never finished its stream; the file may be truncated");
    }

    relocate(&temp_path, &output_path)?;
    if let Err(e) = std::fs::remove_dir_all(&session_dir) {
        tracing::warn!(dir = %session_dir.display(), "Failed to remove session directory: {}", e);
    }
    println!("Video saved: {}", output_path.display());
    println!("Frames rendered: {}", pattern.frames_painted());

    Ok(())
}

/// Move the finished container out of the session directory
#[cfg(feature = "gstreamer")]
fn relocate(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_err() {
        // Different filesystem
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

/// Get default video directory
fn get_default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(defaults::SAVE_FOLDER)
}

fn default_output_path() -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    get_default_video_dir().join(format!("video_{}.mp4", timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size("640X480"), Ok((640, 480)));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn test_default_output_is_mp4() {
        let path = default_output_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(path.to_string_lossy().contains(defaults::SAVE_FOLDER));
    }
}
