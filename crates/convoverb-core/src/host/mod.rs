//! Host audio-graph interface
//!
//! The filter never talks to a concrete audio server directly. Instead the
//! host graph is described by a small set of traits:
//!
//! - **Control side** (non-RT thread): [`HostLoop`] → [`HostContext`] →
//!   [`HostCore`] → [`HostFilter`]. Each step hands out an owned handle; the
//!   session drops them in reverse order on teardown.
//! - **RT side**: the host calls a [`FilterHandler`] once per audio block and
//!   lends it a [`BufferQueue`] to dequeue/queue [`HostBuffer`]s.
//! - **Notifications**: state transitions go to a [`StateObserver`].
//!
//! Implementations:
//! - [`memory`]: in-process graph for offline rendering and tests
//! - `jack` (Linux, `jack-backend` feature): JACK server binding

pub mod memory;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub mod jack;

use std::fmt;
use std::ops::BitOr;

use crate::error::HostResult;
use crate::format::AudioFormat;
use crate::types::{ClockPosition, Direction, ProcessLatency};

/// Well-known property keys
pub mod keys {
    pub const MEDIA_TYPE: &str = "media.type";
    pub const MEDIA_CATEGORY: &str = "media.category";
    pub const MEDIA_ROLE: &str = "media.role";
    pub const MEDIA_CLASS: &str = "media.class";
    pub const AUDIO_CHANNELS: &str = "audio.channels";
    pub const AUDIO_CHANNEL: &str = "audio.channel";
    pub const NODE_NAME: &str = "node.name";
    pub const NODE_DESCRIPTION: &str = "node.description";
    pub const PORT_NAME: &str = "port.name";
    pub const FORMAT_DSP: &str = "format.dsp";
}

/// Ordered key/value property list attached to nodes and ports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Properties::set`]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set `key`, replacing any previous value
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Port creation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortFlags(u32);

impl PortFlags {
    /// Ask the host to map buffer memory so a DSP view is available
    pub const MAP_BUFFERS: Self = Self(1 << 0);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Filter connect flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterFlags(u32);

impl FilterFlags {
    /// Run the process callback directly on the real-time thread
    pub const RT_PROCESS: Self = Self(1 << 0);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Capability flags of a buffer's data plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataFlags(u32);

impl DataFlags {
    pub const READABLE: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const DYNAMIC: Self = Self(1 << 2);
    pub const READWRITE: Self = Self(Self::READABLE.0 | Self::WRITABLE.0);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for DataFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Valid byte range of a buffer's data plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Offset of valid data in bytes
    pub offset: u32,
    /// Size of valid data in bytes
    pub size: u32,
    /// Distance between consecutive frames in bytes
    pub stride: i32,
    /// Chunk flags (cleared by the filter on write-back)
    pub flags: i32,
}

/// Raw view of a buffer's first data plane
pub struct RawData<'a> {
    /// Full mapped region (its length is the plane's declared capacity)
    pub bytes: &'a mut [u8],
    /// Capability flags of the region
    pub flags: DataFlags,
}

/// Host filter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterState {
    Error,
    Unconnected,
    Connecting,
    Paused,
    Streaming,
    Destroyed,
}

impl FilterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterState::Error => "error",
            FilterState::Unconnected => "unconnected",
            FilterState::Connecting => "connecting",
            FilterState::Paused => "paused",
            FilterState::Streaming => "streaming",
            FilterState::Destroyed => "destroyed",
        }
    }

    /// Whether no further transition can follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, FilterState::Destroyed)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            FilterState::Error => 0,
            FilterState::Unconnected => 1,
            FilterState::Connecting => 2,
            FilterState::Paused => 3,
            FilterState::Streaming => 4,
            FilterState::Destroyed => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => FilterState::Error,
            2 => FilterState::Connecting,
            3 => FilterState::Paused,
            4 => FilterState::Streaming,
            5 => FilterState::Destroyed,
            _ => FilterState::Unconnected,
        }
    }
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Control side
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry point of a host graph (the main loop the filter attaches to)
pub trait HostLoop {
    type Context: HostContext;

    /// Acquire a graph context bound to this loop
    fn context(&self) -> HostResult<Self::Context>;
}

/// Graph context; connecting it yields a core
pub trait HostContext {
    type Core: HostCore;

    fn connect(&self) -> HostResult<Self::Core>;
}

/// Connection to the graph server; creates filter nodes
pub trait HostCore {
    type Filter: HostFilter;

    fn create_filter(&self, name: &str, props: &Properties) -> HostResult<Self::Filter>;
}

/// A filter node inside the host graph
///
/// Dropping the filter disconnects it; after that the host delivers no more
/// ticks to the handler passed to [`HostFilter::connect`].
pub trait HostFilter {
    /// Cheap identifier of one port of this filter
    type Port: Copy + Eq + fmt::Debug + Send + Sync + 'static;
    /// Buffer queue lent to the handler on every tick
    type Queue: BufferQueue<Port = Self::Port>;

    /// Register the lifecycle observer
    fn add_listener(&mut self, observer: Box<dyn StateObserver>);

    /// Add a port offering exactly `format`
    fn add_port(
        &mut self,
        direction: Direction,
        flags: PortFlags,
        props: &Properties,
        format: &AudioFormat,
    ) -> HostResult<Self::Port>;

    /// Declare latency and start delivering ticks to `handler`
    fn connect<H>(&mut self, flags: FilterFlags, latency: ProcessLatency, handler: H) -> HostResult<()>
    where
        H: FilterHandler<Self::Queue> + 'static;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Real-time side
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-port buffer queues, valid for the duration of one callback
pub trait BufferQueue {
    type Port: Copy;
    type Buffer: HostBuffer;

    /// Take the next available buffer of `port`, if any
    fn dequeue(&mut self, port: Self::Port) -> Option<Self::Buffer>;

    /// Give a buffer back to `port`
    fn queue(&mut self, port: Self::Port, buffer: Self::Buffer);
}

/// A host-owned buffer borrowed for one tick
pub trait HostBuffer {
    /// Declared capacity of the first data plane in bytes, `None` without planes
    fn max_size(&self) -> Option<u32>;

    /// Chunk metadata of the first data plane
    fn chunk(&self) -> Option<&Chunk>;

    fn chunk_mut(&mut self) -> Option<&mut Chunk>;

    /// Frames available through the mapped DSP view, `None` if unmapped
    fn dsp_frames(&self) -> Option<usize>;

    /// Mapped view of the first `frames` samples
    ///
    /// Returns `Some` whenever `frames <= dsp_frames()`.
    fn dsp(&self, frames: usize) -> Option<&[f32]>;

    /// Writable mapped view of the first `frames` samples
    fn dsp_mut(&mut self, frames: usize) -> Option<&mut [f32]>;

    /// Raw access to the first data plane
    fn raw_data(&mut self) -> Option<RawData<'_>>;

    /// Set the buffer-level size (in frames) reported downstream
    fn set_size(&mut self, frames: u64);
}

/// Events the host delivers to a connected filter
///
/// `add_buffer` and `process` may run on the real-time thread.
pub trait FilterHandler<Q: BufferQueue>: Send {
    /// The host allocated a new buffer for `port`
    fn add_buffer(&mut self, queue: &mut Q, port: Q::Port, buffer: Q::Buffer);

    /// Process one audio block; `None` when the host has no timing information
    fn process(&mut self, queue: &mut Q, position: Option<&ClockPosition>);
}

/// Lifecycle notifications from the host (control thread)
pub trait StateObserver: Send {
    fn state_changed(&mut self, old: FilterState, new: FilterState, error: Option<&str>);
}
