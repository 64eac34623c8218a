//! Format negotiation and per-channel naming
//!
//! Every port carries exactly one channel of 32-bit float audio. Stereo and
//! multichannel layouts are expressed as independent mono ports, each tagged
//! with its channel position, never as interleaved frames.

use std::borrow::Cow;
use std::fmt;

use crate::host::{keys, Properties};
use crate::types::{Direction, DEFAULT_SAMPLE_RATE, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};

/// DSP format description advertised on every port
pub const DSP_FORMAT: &str = "32 bit float mono audio";

/// Media type of the format offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
}

/// Media subtype of the format offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSubtype {
    Raw,
}

/// Sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit IEEE float, native endian
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
        }
    }
}

/// Channel position tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPosition {
    Mono,
    FrontLeft,
    FrontRight,
}

impl ChannelPosition {
    /// Short tag as used in property values
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPosition::Mono => "MONO",
            ChannelPosition::FrontLeft => "FL",
            ChannelPosition::FrontRight => "FR",
        }
    }
}

impl fmt::Display for ChannelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample rate choice: preferred value within an inclusive range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRange {
    pub default: u32,
    pub min: u32,
    pub max: u32,
}

impl RateRange {
    pub fn contains(&self, rate: u32) -> bool {
        (self.min..=self.max).contains(&rate)
    }
}

impl Default for RateRange {
    fn default() -> Self {
        Self {
            default: DEFAULT_SAMPLE_RATE,
            min: MIN_SAMPLE_RATE,
            max: MAX_SAMPLE_RATE,
        }
    }
}

/// Enumerated format offered when a port is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub media_type: MediaType,
    pub media_subtype: MediaSubtype,
    pub sample_format: SampleFormat,
    pub rate: RateRange,
    /// Logical channels per port (always 1)
    pub channels: u32,
    /// Position array (one entry per logical channel)
    pub position: [ChannelPosition; 1],
}

impl AudioFormat {
    /// Mono F32 offer for a port at `position`
    pub fn mono(position: ChannelPosition) -> Self {
        Self {
            media_type: MediaType::Audio,
            media_subtype: MediaSubtype::Raw,
            sample_format: SampleFormat::F32,
            rate: RateRange::default(),
            channels: 1,
            position: [position],
        }
    }

    /// Whether the host may run this port at `rate`
    pub fn accepts_rate(&self, rate: u32) -> bool {
        self.rate.contains(rate)
    }
}

/// Naming and position resolved for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Display name ("FL", "MONO", "CH3")
    pub name: Cow<'static, str>,
    /// Position tag carried in the format offer
    pub position: ChannelPosition,
    /// Value of the `audio.channel` port property, if the layout defines one
    pub channel_property: Option<&'static str>,
}

/// Resolve the name and position of channel `index` out of `total`
///
/// - 2 channels: FL, FR
/// - 1 channel: MONO
/// - otherwise: CH1, CH2, ... with a generic (mono) position
pub fn configure_port(index: usize, total: usize) -> ChannelConfig {
    match (total, index) {
        (2, 0) => ChannelConfig {
            name: Cow::Borrowed("FL"),
            position: ChannelPosition::FrontLeft,
            channel_property: Some("FL"),
        },
        (2, _) => ChannelConfig {
            name: Cow::Borrowed("FR"),
            position: ChannelPosition::FrontRight,
            channel_property: Some("FR"),
        },
        (1, _) => ChannelConfig {
            name: Cow::Borrowed("MONO"),
            position: ChannelPosition::Mono,
            channel_property: Some("MONO"),
        },
        _ => ChannelConfig {
            name: Cow::Owned(format!("CH{}", index + 1)),
            position: ChannelPosition::Mono,
            channel_property: None,
        },
    }
}

/// Host-visible port name, e.g. "input_FL"
pub fn port_name(direction: Direction, channel: &ChannelConfig) -> String {
    format!("{}_{}", direction.port_prefix(), channel.name)
}

/// Properties attached to a port when it is added
pub fn port_properties(direction: Direction, channel: &ChannelConfig) -> Properties {
    let mut props = Properties::new()
        .with(keys::PORT_NAME, port_name(direction, channel))
        .with(keys::FORMAT_DSP, DSP_FORMAT)
        .with(keys::MEDIA_TYPE, "Audio");
    if let Some(value) = channel.channel_property {
        props.set(keys::AUDIO_CHANNEL, value);
    }
    props
}
