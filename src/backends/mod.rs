// SPDX-License-Identifier: MPL-2.0

//! Capture backends feeding the recording pipelines
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │              Backend Layer                 │
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │    Audio    │    │    Synthetic     │   │
//! │  │  (PipeWire) │    │ (bars, sine tone)│   │
//! │  └─────────────┘    └──────────────────┘   │
//! └────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`audio`]: Audio device enumeration and PipeWire capture
//! - [`synthetic`]: Test pattern frames and a tone capture device

pub mod audio;
pub mod synthetic;
