//! Filter error types

use thiserror::Error;

use crate::types::Direction;

/// Failure reported by a host graph implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Result type for host graph calls
pub type HostResult<T> = Result<T, HostError>;

/// Errors that can occur while setting up a filter session
///
/// Only construction can fail; everything that goes wrong during a processing
/// tick is absorbed per channel.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Channel count of zero
    #[error("Filter needs at least one channel (got {0})")]
    InvalidChannelCount(usize),

    /// Failed to acquire the graph context from the loop
    #[error("Failed to create graph context: {0}")]
    Context(#[source] HostError),

    /// Failed to connect to the graph core
    #[error("Failed to connect to graph core: {0}")]
    Core(#[source] HostError),

    /// Failed to create the filter node
    #[error("Failed to create filter node: {0}")]
    Filter(#[source] HostError),

    /// Failed to add a port
    #[error("Failed to add {direction} port for channel {channel}: {source}")]
    Port {
        direction: Direction,
        channel: usize,
        #[source]
        source: HostError,
    },

    /// Failed to connect the filter to the graph
    #[error("Failed to connect filter: {0}")]
    Connect(#[source] HostError),
}

/// Result type for filter session operations
pub type FilterResult<T> = Result<T, FilterError>;
