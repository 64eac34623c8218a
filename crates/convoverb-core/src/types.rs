//! Common types for Convoverb
//!
//! Fundamental audio types and constants shared by the negotiator, the
//! processing loop and the host bindings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default sample rate (48kHz)
/// Used whenever the host clock does not report a rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Lowest sample rate offered during format negotiation
pub const MIN_SAMPLE_RATE: u32 = 1;

/// Highest sample rate offered during format negotiation
pub const MAX_SAMPLE_RATE: u32 = 384000;

/// Audio sample type (32-bit float, one value per frame on a mono port)
pub type Sample = f32;

/// Size of one sample in bytes
pub const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();

/// Process latency declared to the host: 1024 frames at 48kHz (~21.3ms)
pub const PROCESS_LATENCY: ProcessLatency = ProcessLatency {
    frames: 1024,
    rate: DEFAULT_SAMPLE_RATE,
};

/// Port direction as seen from the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// Short label used in port names and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }

    /// Prefix of the host-visible port name ("input_FL", "output_FL")
    pub fn port_prefix(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clock information the host attaches to a processing tick
///
/// Mirrors the host's position/clock block: `duration` is the number of
/// frames requested for this cycle and the rate is a rational `num/denom`
/// whose denominator is the sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPosition {
    /// Frames requested this cycle
    pub duration: u64,
    /// Clock rate numerator (normally 1)
    pub rate_num: u32,
    /// Clock rate denominator (the sample rate, 0 if unknown)
    pub rate_denom: u32,
}

impl ClockPosition {
    /// Create a position for `duration` frames at `sample_rate`
    pub fn new(duration: u64, sample_rate: u32) -> Self {
        Self {
            duration,
            rate_num: 1,
            rate_denom: sample_rate,
        }
    }
}

/// Per-tick scalar state handed to every channel of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingContext {
    /// Frames requested by the host
    pub frames: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Tick sequence number (1-based, diagnostics only)
    pub tick: u64,
}

impl ProcessingContext {
    /// Derive the context of tick `tick` from the host clock
    pub fn from_position(position: &ClockPosition, tick: u64) -> Self {
        let sample_rate = if position.rate_denom > 0 {
            position.rate_denom
        } else {
            DEFAULT_SAMPLE_RATE
        };
        Self {
            frames: usize::try_from(position.duration).unwrap_or(usize::MAX),
            sample_rate,
            tick,
        }
    }
}

/// Processing latency declared once when the filter connects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLatency {
    /// Latency in frames at `rate`
    pub frames: u32,
    /// Reference sample rate for `frames`
    pub rate: u32,
}

impl ProcessLatency {
    /// Latency in nanoseconds
    pub fn as_nanos(&self) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        self.frames as u64 * 1_000_000_000 / self.rate as u64
    }

    /// Latency in milliseconds
    pub fn as_millis_f32(&self) -> f32 {
        if self.rate == 0 {
            return 0.0;
        }
        (self.frames as f32 / self.rate as f32) * 1000.0
    }
}
