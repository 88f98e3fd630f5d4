// SPDX-License-Identifier: MPL-2.0

//! Process-wide monotonic clock
//!
//! Audio capture timestamps and frame timestamps must come from the same
//! clock for the muxer's shared epoch to line the tracks up.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Reading reported at the epoch
///
/// Capture timestamps are back-dated by one buffer duration, so the clock
/// must never read less than that for the first buffer.
pub const CLOCK_ORIGIN: Duration = Duration::from_secs(1);

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

fn elapsed() -> Duration {
    CLOCK_ORIGIN + epoch().elapsed()
}

/// Pin the clock epoch
///
/// Called when a session is created so no reading happens before it.
pub fn init() {
    epoch();
}

/// Nanoseconds on the process clock, never zero
pub fn monotonic_ns() -> i64 {
    // Zero is reserved for "no timestamp" by frame sources
    (elapsed().as_nanos() as i64).max(1)
}

/// Microseconds on the process clock
pub fn monotonic_us() -> i64 {
    elapsed().as_micros() as i64
}
