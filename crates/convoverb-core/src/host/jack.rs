//! JACK host graph for Linux
//!
//! Maps the host traits onto a JACK client: the context names the client,
//! connecting opens it, the filter registers one JACK port per filter port
//! and activating the client starts the processing loop on JACK's RT thread.
//! Works under PipeWire's JACK compatibility layer as well.
//!
//! JACK has no buffer pools: every cycle each port exposes exactly one
//! buffer, which the queue hands out once and expects back in the same cycle.
//!
//! ```text
//! ┌──────────────────┐  activate_async   ┌─────────────────────┐
//! │  Control Thread  │──────────────────►│   JACK RT Thread    │
//! │   (JackFilter)   │                   │  (JackProcess<H>)   │
//! └──────────────────┘                   └─────────────────────┘
//!         ▲
//!         │ state / xrun / sample rate
//! ┌──────────────────┐
//! │ JackNotifications│
//! └──────────────────┘
//! ```

use std::any::Any;
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use jack::{AudioIn, AudioOut, Client, ClientOptions, Control, ProcessScope};

use super::{
    keys, BufferQueue, Chunk, DataFlags, FilterFlags, FilterHandler, FilterState, HostBuffer,
    HostContext, HostCore, HostFilter, HostLoop, PortFlags, Properties, RawData, StateObserver,
};
use crate::error::{HostError, HostResult};
use crate::format::{AudioFormat, SampleFormat};
use crate::types::{ClockPosition, Direction, ProcessLatency, SAMPLE_BYTES};

/// A JACK server reachable under a client name
#[derive(Debug, Clone)]
pub struct JackHost {
    client_name: String,
}

impl JackHost {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl HostLoop for JackHost {
    type Context = JackContext;

    fn context(&self) -> HostResult<JackContext> {
        if self.client_name.is_empty() {
            return Err(HostError::new("JACK client name must not be empty"));
        }
        Ok(JackContext {
            client_name: self.client_name.clone(),
        })
    }
}

/// Client configuration, not yet connected to the server
pub struct JackContext {
    client_name: String,
}

impl HostContext for JackContext {
    type Core = JackCore;

    fn connect(&self) -> HostResult<JackCore> {
        // JACK may rename the client if the name is taken
        let (client, _status) = Client::new(&self.client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| HostError::new(format!("Failed to create JACK client: {}", e)))?;

        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames)",
            client.name(),
            client.sample_rate(),
            client.buffer_size()
        );

        Ok(JackCore {
            client: Cell::new(Some(client)),
        })
    }
}

/// Open JACK client, handed to the filter it creates
pub struct JackCore {
    client: Cell<Option<Client>>,
}

impl HostCore for JackCore {
    type Filter = JackFilter;

    fn create_filter(&self, name: &str, props: &Properties) -> HostResult<JackFilter> {
        let client = self
            .client
            .take()
            .ok_or_else(|| HostError::new("JACK client already hosts a filter"))?;

        log::debug!(
            "JACK filter '{}' on client '{}' ({})",
            name,
            client.name(),
            props.get(keys::MEDIA_CLASS).unwrap_or("unclassified")
        );

        Ok(JackFilter {
            client: Some(client),
            ports: Vec::new(),
            tracker: StateTracker::default(),
            sample_rate: Arc::new(AtomicU32::new(0)),
            active: None,
        })
    }
}

/// Identifier of a port registered by a [`JackFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JackPortId(usize);

enum JackPort {
    Input(jack::Port<AudioIn>),
    Output(jack::Port<AudioOut>),
}

impl JackPort {
    /// This cycle's buffer of the port
    fn buffer(&mut self, ps: &ProcessScope) -> JackBuffer {
        match self {
            JackPort::Input(port) => {
                let samples = port.as_slice(ps);
                JackBuffer {
                    ptr: samples.as_ptr() as *mut f32,
                    len: samples.len(),
                    writable: false,
                    chunk: Chunk {
                        offset: 0,
                        size: (samples.len() * SAMPLE_BYTES) as u32,
                        stride: SAMPLE_BYTES as i32,
                        flags: 0,
                    },
                }
            }
            JackPort::Output(port) => {
                let samples = port.as_mut_slice(ps);
                JackBuffer {
                    ptr: samples.as_mut_ptr(),
                    len: samples.len(),
                    writable: true,
                    chunk: Chunk::default(),
                }
            }
        }
    }
}

/// Listener plus the last state reported to it
struct StateTracker {
    observer: Option<Box<dyn StateObserver>>,
    state: FilterState,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            observer: None,
            state: FilterState::Unconnected,
        }
    }
}

impl StateTracker {
    fn transition(&mut self, new: FilterState, error: Option<&str>) {
        let old = std::mem::replace(&mut self.state, new);
        if let Some(observer) = self.observer.as_mut() {
            observer.state_changed(old, new, error);
        }
    }
}

/// Filter node backed by a JACK client
pub struct JackFilter {
    client: Option<Client>,
    ports: Vec<JackPort>,
    tracker: StateTracker,
    sample_rate: Arc<AtomicU32>,
    /// Active client; dropping it deactivates
    active: Option<Box<dyn Any>>,
}

impl HostFilter for JackFilter {
    type Port = JackPortId;
    type Queue = JackQueue;

    fn add_listener(&mut self, observer: Box<dyn StateObserver>) {
        self.tracker.observer = Some(observer);
    }

    fn add_port(
        &mut self,
        direction: Direction,
        _flags: PortFlags,
        props: &Properties,
        format: &AudioFormat,
    ) -> HostResult<JackPortId> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| HostError::new("ports must be added before the filter is connected"))?;

        let rate = client.sample_rate() as u32;
        if format.sample_format != SampleFormat::F32 || format.channels != 1 {
            return Err(HostError::new("JACK ports carry mono F32 audio only"));
        }
        if !format.accepts_rate(rate) {
            return Err(HostError::new(format!(
                "JACK sample rate {}Hz is outside the offered range",
                rate
            )));
        }

        let name = props
            .get(keys::PORT_NAME)
            .ok_or_else(|| HostError::new("port has no name"))?;
        let port = match direction {
            Direction::Input => client.register_port(name, AudioIn::default()).map(JackPort::Input),
            Direction::Output => client
                .register_port(name, AudioOut::default())
                .map(JackPort::Output),
        }
        .map_err(|e| HostError::new(format!("Failed to register port '{}': {}", name, e)))?;

        self.ports.push(port);
        Ok(JackPortId(self.ports.len() - 1))
    }

    fn connect<H>(&mut self, flags: FilterFlags, latency: ProcessLatency, handler: H) -> HostResult<()>
    where
        H: FilterHandler<JackQueue> + 'static,
    {
        let client = self
            .client
            .take()
            .ok_or_else(|| HostError::new("filter is already connected"))?;

        if !flags.contains(FilterFlags::RT_PROCESS) {
            log::warn!("JACK always processes on its real-time thread");
        }
        log::info!(
            "Declared latency: {} frames @ {}Hz ({:.1}ms), JACK period {} frames",
            latency.frames,
            latency.rate,
            latency.as_millis_f32(),
            client.buffer_size()
        );

        self.sample_rate
            .store(client.sample_rate() as u32, Ordering::Relaxed);
        self.tracker.transition(FilterState::Connecting, None);

        let ports = std::mem::take(&mut self.ports);
        let queue = JackQueue {
            slots: (0..ports.len()).map(|_| None).collect(),
        };
        let process = JackProcess {
            ports,
            queue,
            handler,
            sample_rate: Arc::clone(&self.sample_rate),
        };
        let notifications = JackNotifications {
            sample_rate: Arc::clone(&self.sample_rate),
        };

        match client.activate_async(notifications, process) {
            Ok(active) => {
                log::info!("JACK client activated");
                self.active = Some(Box::new(active));
                self.tracker.transition(FilterState::Streaming, None);
                Ok(())
            }
            Err(e) => {
                let reason = format!("Failed to activate JACK client: {}", e);
                self.tracker.transition(FilterState::Error, Some(&reason));
                Err(HostError::new(reason))
            }
        }
    }
}

impl Drop for JackFilter {
    fn drop(&mut self) {
        // Deactivate before reporting
        drop(self.active.take());
        self.tracker.transition(FilterState::Destroyed, None);
    }
}

/// One cycle's port buffer
///
/// Only valid inside the process callback that produced it. The raw pointer
/// keeps it `!Send`, so a (necessarily `Send`) handler cannot stash it.
pub struct JackBuffer {
    ptr: *mut f32,
    len: usize,
    writable: bool,
    chunk: Chunk,
}

impl HostBuffer for JackBuffer {
    fn max_size(&self) -> Option<u32> {
        Some((self.len * SAMPLE_BYTES) as u32)
    }

    fn chunk(&self) -> Option<&Chunk> {
        Some(&self.chunk)
    }

    fn chunk_mut(&mut self) -> Option<&mut Chunk> {
        Some(&mut self.chunk)
    }

    fn dsp_frames(&self) -> Option<usize> {
        Some(self.len)
    }

    fn dsp(&self, frames: usize) -> Option<&[f32]> {
        if frames > self.len {
            return None;
        }
        // SAFETY: ptr/len come from the port buffer of the running cycle
        Some(unsafe { std::slice::from_raw_parts(self.ptr, frames) })
    }

    fn dsp_mut(&mut self, frames: usize) -> Option<&mut [f32]> {
        if !self.writable || frames > self.len {
            return None;
        }
        // SAFETY: output port buffer of the running cycle, exclusively ours
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr, frames) })
    }

    fn raw_data(&mut self) -> Option<RawData<'_>> {
        let samples = self.dsp_mut(self.len)?;
        Some(RawData {
            bytes: bytemuck::cast_slice_mut(samples),
            flags: DataFlags::READWRITE,
        })
    }

    fn set_size(&mut self, _frames: u64) {}
}

/// Per-cycle buffer slots, one per port
pub struct JackQueue {
    slots: Vec<Option<JackBuffer>>,
}

// SAFETY: slots only hold buffers while a process callback runs on the
// JACK thread; they are cleared before the callback returns.
unsafe impl Send for JackQueue {}

impl JackQueue {
    fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

impl BufferQueue for JackQueue {
    type Port = JackPortId;
    type Buffer = JackBuffer;

    fn dequeue(&mut self, port: JackPortId) -> Option<JackBuffer> {
        self.slots.get_mut(port.0)?.take()
    }

    fn queue(&mut self, port: JackPortId, buffer: JackBuffer) {
        if let Some(slot) = self.slots.get_mut(port.0) {
            *slot = Some(buffer);
        }
    }
}

/// JACK process handler wrapping the filter's handler
struct JackProcess<H> {
    ports: Vec<JackPort>,
    queue: JackQueue,
    handler: H,
    sample_rate: Arc<AtomicU32>,
}

impl<H: FilterHandler<JackQueue>> jack::ProcessHandler for JackProcess<H> {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        for (slot, port) in self.queue.slots.iter_mut().zip(self.ports.iter_mut()) {
            *slot = Some(port.buffer(ps));
        }

        let position = ClockPosition::new(
            u64::from(ps.n_frames()),
            self.sample_rate.load(Ordering::Relaxed),
        );
        self.handler.process(&mut self.queue, Some(&position));

        self.queue.clear();
        Control::Continue
    }
}

/// JACK notification handler
struct JackNotifications {
    sample_rate: Arc<AtomicU32>,
}

impl jack::NotificationHandler for JackNotifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        self.sample_rate.store(srate, Ordering::Relaxed);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }
}
