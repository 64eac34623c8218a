//! In-process host graph
//!
//! A deterministic, single-filter host used for offline rendering and tests.
//! The caller plays the role of the graph's scheduler: it supplies buffers
//! for ports, announces new buffers, drives state transitions and calls
//! [`MemoryGraph::tick`] once per audio block.
//!
//! Every handle the graph hands out (context, core, filter, ports) is counted
//! while alive, so leaks after a failed setup are directly observable through
//! [`MemoryGraph::live_resources`]. Any acquisition step can be made to fail
//! with [`MemoryGraph::fail_at`].
//!
//! ```ignore
//! let graph = MemoryGraph::new();
//! let session = FilterSession::create(&graph, FilterConfig::stereo(), Passthrough)?;
//!
//! let slot = &session.slots()[0];
//! graph.push_buffer(slot.output.id, MemoryBuffer::mapped(256));
//! graph.tick(Some(ClockPosition::new(128, 48000)));
//! let rendered = graph.take_buffer(slot.output.id).unwrap();
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    BufferQueue, Chunk, DataFlags, FilterFlags, FilterHandler, FilterState, HostBuffer,
    HostContext, HostCore, HostFilter, HostLoop, PortFlags, Properties, RawData, StateObserver,
};
use crate::error::{HostError, HostResult};
use crate::format::AudioFormat;
use crate::types::{ClockPosition, Direction, ProcessLatency, SAMPLE_BYTES};

/// Acquisition step that should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Context,
    Core,
    Filter,
    /// The port of `direction` for channel `channel` (n-th port of that direction)
    Port { direction: Direction, channel: usize },
    Connect,
}

/// Identifier of a port on the memory graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryPortId(usize);

/// How a buffer's memory is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Mapped: a DSP view is available
    Mapped,
    /// Only the raw data plane is available, with the given capability flags
    Raw(DataFlags),
    /// No data planes at all
    Detached,
}

/// A buffer owned by the memory graph
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    samples: Vec<f32>,
    backing: Backing,
    chunk: Option<Chunk>,
    size: u64,
    origin: Option<MemoryPortId>,
}

impl MemoryBuffer {
    fn with_backing(frames: usize, backing: Backing) -> Self {
        Self {
            samples: vec![0.0; frames],
            backing,
            chunk: Some(Chunk::default()),
            size: 0,
            origin: None,
        }
    }

    /// Mapped buffer with room for `frames` samples
    pub fn mapped(frames: usize) -> Self {
        Self::with_backing(frames, Backing::Mapped)
    }

    /// Unmapped buffer exposing only a raw plane with `flags`
    pub fn raw(frames: usize, flags: DataFlags) -> Self {
        Self::with_backing(frames, Backing::Raw(flags))
    }

    /// Buffer without any data plane
    pub fn detached() -> Self {
        Self {
            samples: Vec::new(),
            backing: Backing::Detached,
            chunk: None,
            size: 0,
            origin: None,
        }
    }

    /// Copy `data` to the start of the buffer and mark it valid
    pub fn with_data(self, data: &[f32]) -> Self {
        self.with_data_at(0, data)
    }

    /// Copy `data` starting at frame `offset` and mark that range valid
    pub fn with_data_at(mut self, offset: usize, data: &[f32]) -> Self {
        let start = offset.min(self.samples.len());
        let end = (start + data.len()).min(self.samples.len());
        self.samples[start..end].copy_from_slice(&data[..end - start]);
        self.chunk = Some(Chunk {
            offset: (start * SAMPLE_BYTES) as u32,
            size: ((end - start) * SAMPLE_BYTES) as u32,
            stride: SAMPLE_BYTES as i32,
            flags: 0,
        });
        self
    }

    /// Fill the whole buffer with `value`
    pub fn with_fill(mut self, value: f32) -> Self {
        self.samples.fill(value);
        self
    }

    /// Replace the chunk metadata
    pub fn with_chunk(mut self, chunk: Chunk) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Remove the chunk metadata
    pub fn without_chunk(mut self) -> Self {
        self.chunk = None;
        self
    }

    /// Whole backing storage
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Samples covered by the chunk
    pub fn valid_samples(&self) -> &[f32] {
        let Some(chunk) = self.chunk else {
            return &[];
        };
        let start = (chunk.offset as usize / SAMPLE_BYTES).min(self.samples.len());
        let end = (start + chunk.size as usize / SAMPLE_BYTES).min(self.samples.len());
        &self.samples[start..end]
    }

    pub fn chunk(&self) -> Option<Chunk> {
        self.chunk
    }

    /// Buffer-level size in frames as last reported by the filter
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl HostBuffer for MemoryBuffer {
    fn max_size(&self) -> Option<u32> {
        match self.backing {
            Backing::Detached => None,
            _ => Some((self.samples.len() * SAMPLE_BYTES) as u32),
        }
    }

    fn chunk(&self) -> Option<&Chunk> {
        self.chunk.as_ref()
    }

    fn chunk_mut(&mut self) -> Option<&mut Chunk> {
        self.chunk.as_mut()
    }

    fn dsp_frames(&self) -> Option<usize> {
        match self.backing {
            Backing::Mapped => Some(self.samples.len()),
            _ => None,
        }
    }

    fn dsp(&self, frames: usize) -> Option<&[f32]> {
        match self.backing {
            Backing::Mapped => self.samples.get(..frames),
            _ => None,
        }
    }

    fn dsp_mut(&mut self, frames: usize) -> Option<&mut [f32]> {
        match self.backing {
            Backing::Mapped => self.samples.get_mut(..frames),
            _ => None,
        }
    }

    fn raw_data(&mut self) -> Option<RawData<'_>> {
        let flags = match self.backing {
            Backing::Mapped => DataFlags::READWRITE,
            Backing::Raw(flags) => flags,
            Backing::Detached => return None,
        };
        Some(RawData {
            bytes: bytemuck::cast_slice_mut(self.samples.as_mut_slice()),
            flags,
        })
    }

    fn set_size(&mut self, frames: u64) {
        self.size = frames;
    }
}

/// Dequeue/queue totals of one port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferCounters {
    pub dequeued: u64,
    pub queued: u64,
}

#[derive(Default)]
struct PortQueue {
    available: VecDeque<MemoryBuffer>,
    counters: BufferCounters,
}

/// Buffer queues of every port on the memory graph
#[derive(Default)]
pub struct MemoryQueue {
    ports: Vec<PortQueue>,
    outstanding: usize,
    misrouted: usize,
}

impl BufferQueue for MemoryQueue {
    type Port = MemoryPortId;
    type Buffer = MemoryBuffer;

    fn dequeue(&mut self, port: MemoryPortId) -> Option<MemoryBuffer> {
        let queue = self.ports.get_mut(port.0)?;
        let mut buffer = queue.available.pop_front()?;
        queue.counters.dequeued += 1;
        buffer.origin = Some(port);
        self.outstanding += 1;
        Some(buffer)
    }

    fn queue(&mut self, port: MemoryPortId, mut buffer: MemoryBuffer) {
        if buffer.origin.take() == Some(port) {
            self.outstanding = self.outstanding.saturating_sub(1);
        } else {
            self.misrouted += 1;
        }
        match self.ports.get_mut(port.0) {
            Some(queue) => {
                queue.counters.queued += 1;
                queue.available.push_back(buffer);
            }
            None => self.misrouted += 1,
        }
    }
}

/// What the filter asked for when it added a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub direction: Direction,
    pub flags: PortFlags,
    pub props: Properties,
    pub format: AudioFormat,
}

/// What the filter asked for when it was created and connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRecord {
    pub name: String,
    pub props: Properties,
    pub flags: Option<FilterFlags>,
    pub latency: Option<ProcessLatency>,
}

struct Runtime {
    queue: MemoryQueue,
    ports: Vec<PortRecord>,
    filter: Option<FilterRecord>,
    handler: Option<Box<dyn FilterHandler<MemoryQueue>>>,
    observer: Option<Box<dyn StateObserver>>,
    state: FilterState,
}

impl Runtime {
    fn new() -> Self {
        Self {
            queue: MemoryQueue::default(),
            ports: Vec::new(),
            filter: None,
            handler: None,
            observer: None,
            state: FilterState::Unconnected,
        }
    }

    fn transition(&mut self, new: FilterState, error: Option<&str>) {
        let old = self.state;
        self.state = new;
        if let Some(observer) = self.observer.as_mut() {
            observer.state_changed(old, new, error);
        }
    }
}

struct Shared {
    live: AtomicUsize,
    fail_point: Mutex<Option<FailPoint>>,
    runtime: Mutex<Runtime>,
}

impl Shared {
    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, point: FailPoint) -> HostResult<()> {
        let fail_point = *self.fail_point.lock().unwrap_or_else(PoisonError::into_inner);
        if fail_point == Some(point) {
            return Err(HostError::new(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

/// Counts one live handle for as long as it exists
struct ResourceToken {
    shared: Arc<Shared>,
}

impl ResourceToken {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.live.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for ResourceToken {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The in-process host graph (acts as the loop handle)
#[derive(Clone)]
pub struct MemoryGraph {
    shared: Arc<Shared>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                live: AtomicUsize::new(0),
                fail_point: Mutex::new(None),
                runtime: Mutex::new(Runtime::new()),
            }),
        }
    }

    /// Make the given acquisition step fail from now on
    pub fn fail_at(&self, point: FailPoint) {
        *self
            .shared
            .fail_point
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    /// Stop injecting failures
    pub fn clear_failure(&self) {
        *self
            .shared
            .fail_point
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of live handles (contexts, cores, filters, ports)
    pub fn live_resources(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Current filter state
    pub fn state(&self) -> FilterState {
        self.shared.runtime().state
    }

    /// Drive a state transition, notifying the registered observer
    pub fn set_state(&self, state: FilterState, error: Option<&str>) {
        self.shared.runtime().transition(state, error);
    }

    /// Whether a handler is connected and receiving ticks
    pub fn is_connected(&self) -> bool {
        self.shared.runtime().handler.is_some()
    }

    pub fn filter_record(&self) -> Option<FilterRecord> {
        self.shared.runtime().filter.clone()
    }

    pub fn port_record(&self, port: MemoryPortId) -> Option<PortRecord> {
        self.shared.runtime().ports.get(port.0).cloned()
    }

    /// Number of ports currently registered
    pub fn port_count(&self) -> usize {
        self.shared.runtime().ports.len()
    }

    /// Make a buffer available on `port` without going through the handler
    pub fn push_buffer(&self, port: MemoryPortId, buffer: MemoryBuffer) {
        if let Some(queue) = self.shared.runtime().queue.ports.get_mut(port.0) {
            queue.available.push_back(buffer);
        }
    }

    /// Announce a newly allocated buffer for `port` to the filter
    pub fn add_buffer(&self, port: MemoryPortId, mut buffer: MemoryBuffer) {
        let mut guard = self.shared.runtime();
        let runtime = &mut *guard;
        buffer.origin = Some(port);
        runtime.queue.outstanding += 1;
        match runtime.handler.as_mut() {
            Some(handler) => handler.add_buffer(&mut runtime.queue, port, buffer),
            None => runtime.queue.queue(port, buffer),
        }
    }

    /// Take the oldest available buffer of `port`
    pub fn take_buffer(&self, port: MemoryPortId) -> Option<MemoryBuffer> {
        self.shared
            .runtime()
            .queue
            .ports
            .get_mut(port.0)?
            .available
            .pop_front()
    }

    /// Number of buffers available on `port`
    pub fn available(&self, port: MemoryPortId) -> usize {
        self.shared
            .runtime()
            .queue
            .ports
            .get(port.0)
            .map_or(0, |queue| queue.available.len())
    }

    pub fn counters(&self, port: MemoryPortId) -> BufferCounters {
        self.shared
            .runtime()
            .queue
            .ports
            .get(port.0)
            .map(|queue| queue.counters)
            .unwrap_or_default()
    }

    /// Buffers handed to the filter and not given back yet
    pub fn outstanding_buffers(&self) -> usize {
        self.shared.runtime().queue.outstanding
    }

    /// Buffers returned to a port they did not come from
    pub fn misrouted_buffers(&self) -> usize {
        self.shared.runtime().queue.misrouted
    }

    /// Run one processing tick; returns false if no filter is connected
    pub fn tick(&self, position: Option<ClockPosition>) -> bool {
        let mut guard = self.shared.runtime();
        let runtime = &mut *guard;
        match runtime.handler.as_mut() {
            Some(handler) => {
                handler.process(&mut runtime.queue, position.as_ref());
                true
            }
            None => false,
        }
    }
}

impl HostLoop for MemoryGraph {
    type Context = MemoryContext;

    fn context(&self) -> HostResult<MemoryContext> {
        self.shared.check(FailPoint::Context)?;
        Ok(MemoryContext {
            shared: Arc::clone(&self.shared),
            _token: ResourceToken::new(&self.shared),
        })
    }
}

/// Graph context handle
pub struct MemoryContext {
    shared: Arc<Shared>,
    _token: ResourceToken,
}

impl HostContext for MemoryContext {
    type Core = MemoryCore;

    fn connect(&self) -> HostResult<MemoryCore> {
        self.shared.check(FailPoint::Core)?;
        Ok(MemoryCore {
            shared: Arc::clone(&self.shared),
            _token: ResourceToken::new(&self.shared),
        })
    }
}

/// Graph core handle
pub struct MemoryCore {
    shared: Arc<Shared>,
    _token: ResourceToken,
}

impl HostCore for MemoryCore {
    type Filter = MemoryFilter;

    fn create_filter(&self, name: &str, props: &Properties) -> HostResult<MemoryFilter> {
        self.shared.check(FailPoint::Filter)?;
        let mut runtime = self.shared.runtime();
        if runtime.filter.is_some() {
            return Err(HostError::new("memory graph already hosts a filter"));
        }
        runtime.filter = Some(FilterRecord {
            name: name.to_string(),
            props: props.clone(),
            flags: None,
            latency: None,
        });
        runtime.state = FilterState::Unconnected;
        drop(runtime);

        Ok(MemoryFilter {
            shared: Arc::clone(&self.shared),
            port_tokens: Vec::new(),
            _token: ResourceToken::new(&self.shared),
        })
    }
}

/// Filter node handle; owns its ports
pub struct MemoryFilter {
    shared: Arc<Shared>,
    port_tokens: Vec<ResourceToken>,
    _token: ResourceToken,
}

impl HostFilter for MemoryFilter {
    type Port = MemoryPortId;
    type Queue = MemoryQueue;

    fn add_listener(&mut self, observer: Box<dyn StateObserver>) {
        self.shared.runtime().observer = Some(observer);
    }

    fn add_port(
        &mut self,
        direction: Direction,
        flags: PortFlags,
        props: &Properties,
        format: &AudioFormat,
    ) -> HostResult<MemoryPortId> {
        let mut runtime = self.shared.runtime();
        let channel = runtime
            .ports
            .iter()
            .filter(|port| port.direction == direction)
            .count();
        self.shared.check(FailPoint::Port { direction, channel })?;

        let id = MemoryPortId(runtime.ports.len());
        runtime.ports.push(PortRecord {
            direction,
            flags,
            props: props.clone(),
            format: *format,
        });
        runtime.queue.ports.push(PortQueue::default());
        drop(runtime);

        self.port_tokens.push(ResourceToken::new(&self.shared));
        Ok(id)
    }

    fn connect<H>(&mut self, flags: FilterFlags, latency: ProcessLatency, handler: H) -> HostResult<()>
    where
        H: FilterHandler<MemoryQueue> + 'static,
    {
        self.shared.check(FailPoint::Connect)?;
        let mut runtime = self.shared.runtime();
        if runtime.handler.is_some() {
            return Err(HostError::new("filter is already connected"));
        }
        if let Some(record) = runtime.filter.as_mut() {
            record.flags = Some(flags);
            record.latency = Some(latency);
        }
        runtime.handler = Some(Box::new(handler));
        runtime.transition(FilterState::Connecting, None);
        runtime.transition(FilterState::Paused, None);
        Ok(())
    }
}

impl Drop for MemoryFilter {
    fn drop(&mut self) {
        let mut runtime = self.shared.runtime();
        runtime.handler = None;
        runtime.transition(FilterState::Destroyed, None);
        runtime.observer = None;
        runtime.filter = None;
        runtime.ports.clear();
        runtime.queue = MemoryQueue::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChannelPosition;

    #[test]
    fn test_resource_counting() {
        let graph = MemoryGraph::new();
        let context = graph.context().unwrap();
        let core = context.connect().unwrap();
        let mut filter = core.create_filter("f", &Properties::new()).unwrap();
        let format = AudioFormat::mono(ChannelPosition::Mono);
        filter
            .add_port(Direction::Input, PortFlags::MAP_BUFFERS, &Properties::new(), &format)
            .unwrap();
        assert_eq!(graph.live_resources(), 4);

        drop(filter);
        assert_eq!(graph.live_resources(), 2);
        drop(core);
        drop(context);
        assert_eq!(graph.live_resources(), 0);
    }

    #[test]
    fn test_fail_point() {
        let graph = MemoryGraph::new();
        graph.fail_at(FailPoint::Core);
        let context = graph.context().unwrap();
        assert!(context.connect().is_err());
        graph.clear_failure();
        assert!(context.connect().is_ok());
    }

    #[test]
    fn test_queue_roundtrip() {
        let mut queue = MemoryQueue::default();
        queue.ports.push(PortQueue::default());
        queue.ports.push(PortQueue::default());
        let a = MemoryPortId(0);
        let b = MemoryPortId(1);

        queue.ports[0].available.push_back(MemoryBuffer::mapped(8));
        let buffer = queue.dequeue(a).unwrap();
        assert!(queue.dequeue(a).is_none());
        assert_eq!(queue.outstanding, 1);

        queue.queue(b, buffer);
        assert_eq!(queue.outstanding, 1);
        assert_eq!(queue.misrouted, 1);
        assert_eq!(queue.ports[1].counters.queued, 1);
    }

    #[test]
    fn test_buffer_views() {
        let buffer = MemoryBuffer::mapped(4).with_data(&[1.0, 2.0]);
        assert_eq!(buffer.max_size(), Some(16));
        assert_eq!(buffer.dsp_frames(), Some(4));
        assert_eq!(buffer.dsp(2), Some(&[1.0, 2.0][..]));
        assert!(buffer.dsp(5).is_none());
        assert_eq!(buffer.valid_samples(), &[1.0, 2.0]);

        let mut raw = MemoryBuffer::raw(4, DataFlags::READABLE);
        assert!(raw.dsp_mut(1).is_none());
        let data = raw.raw_data().unwrap();
        assert_eq!(data.bytes.len(), 16);
        assert!(!data.flags.contains(DataFlags::WRITABLE));

        let mut detached = MemoryBuffer::detached();
        assert!(detached.max_size().is_none());
        assert!(detached.raw_data().is_none());
        assert!(HostBuffer::chunk(&detached).is_none());
    }
}
