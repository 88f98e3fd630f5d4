// SPDX-License-Identifier: MPL-2.0

//! Audio input devices
//!
//! Enumeration parses `pw-dump` output. With the `gstreamer` feature,
//! [`PipeWireCapture`] reads S16LE chunks from a PipeWire source.

use std::process::Command;
use tracing::{debug, warn};

/// Represents an audio input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
    pub serial: String,
    pub node_name: String,
    pub channels: Option<u16>,
    pub is_default: bool,
}

/// Enumerate available audio input devices using PipeWire
pub fn enumerate_audio_devices() -> Vec<AudioDevice> {
    let output = match Command::new("pw-dump").output() {
        Ok(output) => output,
        Err(e) => {
            warn!("Failed to run pw-dump: {}", e);
            return Vec::new();
        }
    };

    if !output.status.success() {
        warn!("pw-dump command failed");
        return Vec::new();
    }

    match std::str::from_utf8(&output.stdout) {
        Ok(stdout) => parse_pw_dump(stdout).unwrap_or_else(|e| {
            warn!("{}", e);
            Vec::new()
        }),
        Err(e) => {
            warn!("Failed to parse pw-dump output: {}", e);
            Vec::new()
        }
    }
}

/// Extract audio sources from `pw-dump` JSON, default source first
pub fn parse_pw_dump(json: &str) -> Result<Vec<AudioDevice>, String> {
    let nodes: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| format!("Failed to parse JSON from pw-dump: {}", e))?;

    let default_node_name = default_source(&nodes);
    let mut devices: Vec<AudioDevice> = nodes
        .iter()
        .filter_map(|node| node.get("info")?.get("props"))
        .filter(|props| props.get("media.class").and_then(|v| v.as_str()) == Some("Audio/Source"))
        .map(|props| {
            let text = |key: &str| props.get(key).and_then(|v| v.as_str());

            let node_name = text("node.name").unwrap_or("").to_string();
            // object.serial is numeric in newer PipeWire releases
            let serial = props
                .get("object.serial")
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "0".to_string());
            let device = AudioDevice {
                name: text("node.nick")
                    .or_else(|| text("node.description"))
                    .or_else(|| text("node.name"))
                    .unwrap_or("Unknown Audio Device")
                    .to_string(),
                serial,
                channels: props
                    .get("audio.channels")
                    .and_then(|v| v.as_u64())
                    .and_then(|n| u16::try_from(n).ok()),
                is_default: default_node_name.as_deref() == Some(node_name.as_str()),
                node_name,
            };
            debug!(
                name = %device.name,
                serial = %device.serial,
                is_default = device.is_default,
                "Found audio input device"
            );
            device
        })
        .collect();

    // Default first, then alphabetically
    devices.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
    Ok(devices)
}

/// Node name of the default audio source from the `default` metadata object
fn default_source(nodes: &[serde_json::Value]) -> Option<String> {
    let metadata = nodes.iter().find(|node| {
        node.get("type").and_then(|v| v.as_str()) == Some("PipeWire:Interface:Metadata")
            && node
                .get("props")
                .and_then(|p| p.get("metadata.name"))
                .and_then(|v| v.as_str())
                == Some("default")
    })?;

    metadata
        .get("metadata")?
        .as_array()?
        .iter()
        .filter(|entry| {
            matches!(
                entry.get("key").and_then(|v| v.as_str()),
                Some("default.audio.source" | "default.configured.audio.source")
            )
        })
        .find_map(|entry| entry.get("value")?.get("name")?.as_str())
        .map(|name| {
            debug!(default_source = %name, "Found default audio source from metadata");
            name.to_string()
        })
}

#[cfg(feature = "gstreamer")]
pub use pipewire_capture::PipeWireCapture;

#[cfg(feature = "gstreamer")]
mod pipewire_capture {
    use crate::errors::CaptureError;
    use crate::pipelines::audio::CaptureDevice;
    use gstreamer as gst;
    use gstreamer::prelude::*;
    use gstreamer_app as gst_app;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};
    use tracing::{debug, info, warn};

    /// How long a read may wait for the source before failing
    const READ_TIMEOUT: Duration = Duration::from_secs(2);

    /// PipeWire microphone delivering interleaved S16LE
    pub struct PipeWireCapture {
        target: Option<String>,
        sample_rate: u32,
        channels: u16,
        pipeline: Option<gst::Pipeline>,
        appsink: Option<gst_app::AppSink>,
        pending: VecDeque<i16>,
    }

    impl PipeWireCapture {
        /// Capture from `target` (serial or node name), or the default source
        pub fn new(target: Option<String>, sample_rate: u32, channels: u16) -> Self {
            Self {
                target,
                sample_rate,
                channels,
                pipeline: None,
                appsink: None,
                pending: VecDeque::new(),
            }
        }

        fn build(&self) -> Result<(gst::Pipeline, gst_app::AppSink), String> {
            gst::init().map_err(|e| format!("Failed to initialize GStreamer: {}", e))?;

            let mut source_builder = gst::ElementFactory::make("pipewiresrc")
                .property("do-timestamp", true)
                .property("keepalive-time", 1000)
                .property("resend-last", false);
            match &self.target {
                Some(target) => {
                    info!("Using PipeWire audio target: {}", target);
                    source_builder = source_builder.property("target-object", target.as_str());
                }
                None => info!("Using default PipeWire audio source"),
            }
            let source = source_builder
                .build()
                .map_err(|e| format!("Failed to create audio source: {}", e))?;

            let queue = gst::ElementFactory::make("queue")
                .property("max-size-buffers", 200u32)
                .property("max-size-time", 2_000_000_000u64)
                .build()
                .map_err(|e| format!("Failed to create audio queue: {}", e))?;
            let convert = gst::ElementFactory::make("audioconvert")
                .build()
                .map_err(|e| format!("Failed to create audioconvert: {}", e))?;
            let resample = gst::ElementFactory::make("audioresample")
                .build()
                .map_err(|e| format!("Failed to create audioresample: {}", e))?;

            let caps = gst::Caps::builder("audio/x-raw")
                .field("format", "S16LE")
                .field("layout", "interleaved")
                .field("rate", self.sample_rate as i32)
                .field("channels", i32::from(self.channels))
                .build();
            let appsink = gst_app::AppSink::builder().caps(&caps).build();
            appsink.set_property("sync", false);
            appsink.set_property("max-buffers", 64u32);
            appsink.set_property("drop", false);

            let pipeline = gst::Pipeline::new();
            let elements = [&source, &queue, &convert, &resample, appsink.upcast_ref()];
            pipeline
                .add_many(elements)
                .map_err(|e| format!("Failed to add audio elements: {}", e))?;
            gst::Element::link_many(elements)
                .map_err(|_| "Failed to link audio capture chain".to_string())?;

            Ok((pipeline, appsink))
        }

        /// Pull one buffer from the sink into `pending`
        fn pull(&mut self, appsink: &gst_app::AppSink) -> Result<bool, CaptureError> {
            let Some(sample) = appsink.try_pull_sample(gst::ClockTime::from_mseconds(100)) else {
                if appsink.is_eos() {
                    return Err(CaptureError::Disconnected);
                }
                return Ok(false);
            };
            let buffer = sample
                .buffer()
                .ok_or_else(|| CaptureError::ReadFailed("sample without buffer".to_string()))?;
            let map = buffer
                .map_readable()
                .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;
            self.pending.extend(
                map.as_slice()
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]])),
            );
            Ok(true)
        }
    }

    impl CaptureDevice for PipeWireCapture {
        fn start(&mut self) -> Result<(), CaptureError> {
            let (pipeline, appsink) = self.build().map_err(CaptureError::OpenFailed)?;
            pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| CaptureError::OpenFailed(format!("Failed to start capture: {}", e)))?;
            info!(
                sample_rate = self.sample_rate,
                channels = self.channels,
                "PipeWire audio capture started"
            );
            self.pipeline = Some(pipeline);
            self.appsink = Some(appsink);
            Ok(())
        }

        fn read(&mut self, buffer: &mut [i16]) -> Result<usize, CaptureError> {
            let appsink = self.appsink.clone().ok_or(CaptureError::Disconnected)?;
            let deadline = Instant::now() + READ_TIMEOUT;
            while self.pending.len() < buffer.len() {
                if !self.pull(&appsink)? && Instant::now() >= deadline {
                    return Err(CaptureError::ReadFailed("timed out waiting for audio".into()));
                }
            }
            for (slot, value) in buffer.iter_mut().zip(self.pending.drain(..buffer.len())) {
                *slot = value;
            }
            Ok(buffer.len())
        }

        fn stop(&mut self) {
            if let Some(pipeline) = self.pipeline.take() {
                if let Err(e) = pipeline.set_state(gst::State::Null) {
                    warn!("Failed to stop audio capture: {}", e);
                }
                debug!("PipeWire audio capture stopped");
            }
            self.appsink = None;
            self.pending.clear();
        }
    }

    impl Drop for PipeWireCapture {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"[
        {
            "id": 40,
            "type": "PipeWire:Interface:Metadata",
            "props": { "metadata.name": "default" },
            "metadata": [
                { "subject": 0, "key": "default.audio.sink", "value": { "name": "speakers" } },
                { "subject": 0, "key": "default.audio.source", "value": { "name": "usb_mic" } }
            ]
        },
        {
            "id": 51,
            "type": "PipeWire:Interface:Node",
            "info": { "props": {
                "media.class": "Audio/Source",
                "node.name": "builtin_mic",
                "node.description": "Built-in Microphone",
                "object.serial": 61
            } }
        },
        {
            "id": 52,
            "type": "PipeWire:Interface:Node",
            "info": { "props": {
                "media.class": "Audio/Source",
                "node.name": "usb_mic",
                "node.nick": "USB Mic",
                "object.serial": "77",
                "audio.channels": 2
            } }
        },
        {
            "id": 53,
            "type": "PipeWire:Interface:Node",
            "info": { "props": { "media.class": "Audio/Sink", "node.name": "speakers" } }
        }
    ]"#;

    #[test]
    fn test_parse_sources_default_first() {
        let devices = parse_pw_dump(DUMP).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "USB Mic");
        assert!(devices[0].is_default);
        assert_eq!(devices[0].serial, "77");
        assert_eq!(devices[0].channels, Some(2));
        assert_eq!(devices[1].name, "Built-in Microphone");
        assert_eq!(devices[1].serial, "61");
        assert!(!devices[1].is_default);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_pw_dump("not json").is_err());
    }
}
