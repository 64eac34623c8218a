//! Filter session configuration
//!
//! Everything the session needs to know before it connects to the host graph:
//! channel count, node identity and the verbose-diagnostics switch.

use serde::{Deserialize, Serialize};

use crate::host::{keys, Properties};

/// Default number of channels (stereo)
pub const DEFAULT_CHANNELS: usize = 2;

/// Default node name shown in the host graph
pub const DEFAULT_NODE_NAME: &str = "pw-convoverb";

/// Default node description shown in patchbays
pub const DEFAULT_NODE_DESCRIPTION: &str = "Convolution Reverb Filter";

/// Default name of the filter object itself
pub const DEFAULT_FILTER_NAME: &str = "pw-convoverb-filter";

/// Configuration for a filter session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of channels (one input and one output port each)
    pub channels: usize,

    /// Enable verbose diagnostics from the real-time thread
    ///
    /// Read once at session creation and handed to the processing loop.
    #[serde(default)]
    pub debug: bool,

    /// Node name (`node.name`)
    pub node_name: String,

    /// Human readable node description (`node.description`)
    pub node_description: String,

    /// Name of the filter object
    pub filter_name: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
            debug: false,
            node_name: DEFAULT_NODE_NAME.to_string(),
            node_description: DEFAULT_NODE_DESCRIPTION.to_string(),
            filter_name: DEFAULT_FILTER_NAME.to_string(),
        }
    }
}

impl FilterConfig {
    /// Create a config for `channels` channels with default naming
    pub fn with_channels(channels: usize) -> Self {
        Self {
            channels,
            ..Default::default()
        }
    }

    /// Create a single-channel config
    pub fn mono() -> Self {
        Self::with_channels(1)
    }

    /// Create a two-channel (FL/FR) config
    pub fn stereo() -> Self {
        Self::with_channels(2)
    }

    /// Enable or disable verbose diagnostics
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the node name
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Set the node description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.node_description = description.into();
        self
    }

    /// Set the filter object name
    pub fn with_filter_name(mut self, name: impl Into<String>) -> Self {
        self.filter_name = name.into();
        self
    }

    /// Properties attached to the filter node when it is created
    pub fn filter_properties(&self) -> Properties {
        Properties::new()
            .with(keys::MEDIA_TYPE, "Audio")
            .with(keys::MEDIA_CATEGORY, "Filter")
            .with(keys::MEDIA_ROLE, "DSP")
            .with(keys::MEDIA_CLASS, "Audio/Filter")
            .with(keys::AUDIO_CHANNELS, self.channels.to_string())
            .with(keys::NODE_NAME, self.node_name.as_str())
            .with(keys::NODE_DESCRIPTION, self.node_description.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_properties() {
        let props = FilterConfig::with_channels(5).filter_properties();
        assert_eq!(props.get(keys::MEDIA_TYPE), Some("Audio"));
        assert_eq!(props.get(keys::MEDIA_CATEGORY), Some("Filter"));
        assert_eq!(props.get(keys::MEDIA_ROLE), Some("DSP"));
        assert_eq!(props.get(keys::MEDIA_CLASS), Some("Audio/Filter"));
        assert_eq!(props.get(keys::AUDIO_CHANNELS), Some("5"));
        assert_eq!(props.get(keys::NODE_NAME), Some(DEFAULT_NODE_NAME));
    }

    #[test]
    fn test_config_serde() {
        let config = FilterConfig::stereo().with_debug(true).with_node_name("verb");
        let json = serde_json::to_string(&config).unwrap();
        let back: FilterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
