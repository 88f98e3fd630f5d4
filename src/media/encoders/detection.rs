// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder detection
//!
//! Reports which H.264 and AAC encoders the GStreamer installation provides,
//! and whether the remaining elements a recording needs are present.

use super::audio::AAC_ENCODERS;
use super::video::H264_ENCODERS;
use gstreamer as gst;
use tracing::{debug, info};

/// Elements every recording needs regardless of encoder choice
const REQUIRED_ELEMENTS: [&str; 7] = [
    "appsrc",
    "appsink",
    "videoconvert",
    "audioconvert",
    "h264parse",
    "aacparse",
    "mp4mux",
];

/// Check if a specific GStreamer element is available
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().ok();
    gst::ElementFactory::find(element_name).is_some()
}

fn detect(names: impl IntoIterator<Item = &'static str>, label: &str) -> Vec<String> {
    let available: Vec<String> = names
        .into_iter()
        .filter(|name| {
            let found = is_element_available(name);
            if found {
                debug!("{} encoder available: {}", label, name);
            }
            found
        })
        .map(str::to_string)
        .collect();

    info!("Detected {} {} encoders", available.len(), label);
    available
}

/// Detect available H.264 encoders in priority order
pub fn detect_video_encoders() -> Vec<String> {
    detect(H264_ENCODERS.iter().map(|(name, _, _)| *name), "video")
}

/// Detect available AAC encoders in priority order
pub fn detect_audio_encoders() -> Vec<String> {
    detect(AAC_ENCODERS, "audio")
}

/// Required elements that are not installed
pub fn missing_elements() -> Vec<&'static str> {
    REQUIRED_ELEMENTS
        .into_iter()
        .filter(|name| !is_element_available(name))
        .collect()
}

/// Log all available encoders (for debugging)
pub fn log_available_encoders() {
    info!("=== GStreamer Encoder Detection ===");

    info!("Video encoders:");
    for encoder in detect_video_encoders() {
        info!("  ✓ {}", encoder);
    }

    info!("Audio encoders:");
    for encoder in detect_audio_encoders() {
        info!("  ✓ {}", encoder);
    }

    for element in missing_elements() {
        info!("  ✗ missing element {}", element);
    }
}
