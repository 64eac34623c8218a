//! Real-time diagnostics and lock-free statistics
//!
//! The processing loop must not format strings, allocate or take locks, so
//! it never calls the logger directly. Instead it pushes small `Copy` events
//! into a pre-allocated SPSC ringbuffer; the control thread drains the ring
//! and turns events into log lines.
//!
//! ```text
//! ┌─────────────────────┐   push() (wait-free)   ┌─────────────────────┐
//! │   Host RT Thread    │───────────────────────►│   Diagnostic ring   │
//! │  (FilterProcessor)  │                        │   (rtrb, 256 slots) │
//! └──────────┬──────────┘                        └──────────┬──────────┘
//!            │ Relaxed atomics                              │ drain()
//!            ▼                                              ▼
//! ┌─────────────────────┐                        ┌─────────────────────┐
//! │     FilterStats     │◄──── state (observer) ─│   Control Thread    │
//! └─────────────────────┘                        └─────────────────────┘
//! ```
//!
//! A full ring drops the event and counts it in
//! [`FilterStats::dropped_diagnostics`]; diagnostics never hold up processing.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::host::FilterState;
use crate::types::Direction;

/// Ring capacity in events
pub const DIAGNOSTIC_QUEUE_CAPACITY: usize = 256;

/// Ticks below this number are always reported
const VERBOSE_TICKS: u64 = 20;

/// After the first ticks, report every n-th tick
const TICK_REPORT_INTERVAL: u64 = 100;

/// Missing-output warnings are only raised during the first ticks...
const MISSING_OUTPUT_WINDOW: u64 = 50;

/// ...and then only every n-th tick
const MISSING_OUTPUT_INTERVAL: u64 = 10;

/// Event raised on the real-time thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// A tick started
    Tick { tick: u64, frames: usize, sample_rate: u32 },
    /// Buffers dequeued for a channel
    Channel {
        tick: u64,
        channel: usize,
        input: bool,
        output: bool,
    },
    /// No output buffer for a channel (port probably unconnected)
    OutputMissing { tick: u64, channel: usize },
    /// A buffer could not be viewed as samples
    ViewUnresolved {
        tick: u64,
        channel: usize,
        direction: Direction,
    },
    /// The host announced a new buffer
    BufferAdded { direction: Direction, channel: usize },
}

impl Diagnostic {
    /// Write the event to the log
    pub fn log(&self) {
        match *self {
            Diagnostic::Tick {
                tick,
                frames,
                sample_rate,
            } => log::debug!("Process {}: samples={} rate={}", tick, frames, sample_rate),
            Diagnostic::Channel {
                tick,
                channel,
                input,
                output,
            } => log::trace!(
                "  tick {} CH{}: in={} out={}",
                tick,
                channel,
                if input { "buffer" } else { "none" },
                if output { "buffer" } else { "none" }
            ),
            Diagnostic::OutputMissing { tick, channel } => log::warn!(
                "CH{} output buffer missing at tick {} (unconnected?)",
                channel,
                tick
            ),
            Diagnostic::ViewUnresolved {
                tick,
                channel,
                direction,
            } => log::warn!(
                "CH{} {} buffer has no usable memory at tick {}",
                channel,
                direction,
                tick
            ),
            Diagnostic::BufferAdded { direction, channel } => {
                log::debug!("Add buffer: dir={} ch={}", direction, channel)
            }
        }
    }
}

/// Whether tick `tick` gets a tick line
#[inline]
pub fn report_tick(tick: u64) -> bool {
    tick < VERBOSE_TICKS || tick % TICK_REPORT_INTERVAL == 0
}

/// Whether tick `tick` gets per-channel buffer lines
#[inline]
pub fn report_channels(tick: u64) -> bool {
    tick < VERBOSE_TICKS
}

/// Whether tick `tick` gets missing-output warnings
#[inline]
pub fn report_missing_output(tick: u64) -> bool {
    tick < MISSING_OUTPUT_WINDOW && tick % MISSING_OUTPUT_INTERVAL == 0
}

/// Create the diagnostic ring; drops are counted in `stats`
pub fn diagnostic_channel(stats: Arc<FilterStats>) -> (DiagnosticSender, DiagnosticReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::new(DIAGNOSTIC_QUEUE_CAPACITY);
    (
        DiagnosticSender { producer, stats },
        DiagnosticReceiver { consumer },
    )
}

/// RT-side end of the diagnostic ring
pub struct DiagnosticSender {
    producer: rtrb::Producer<Diagnostic>,
    stats: Arc<FilterStats>,
}

impl DiagnosticSender {
    /// Push an event (wait-free); drops it if the ring is full
    #[inline]
    pub fn emit(&mut self, event: Diagnostic) {
        if self.producer.push(event).is_err() {
            FilterStats::bump(&self.stats.dropped_diagnostics);
        }
    }
}

/// Control-side end of the diagnostic ring
pub struct DiagnosticReceiver {
    consumer: rtrb::Consumer<Diagnostic>,
}

impl DiagnosticReceiver {
    /// Log every pending event; returns how many were drained
    pub fn drain(&mut self) -> usize {
        self.drain_with(|event| event.log())
    }

    /// Hand every pending event to `f`
    pub fn drain_with(&mut self, mut f: impl FnMut(Diagnostic)) -> usize {
        let mut count = 0;
        while let Ok(event) = self.consumer.pop() {
            f(event);
            count += 1;
        }
        count
    }

    /// Number of events waiting
    pub fn pending(&self) -> usize {
        self.consumer.slots()
    }
}

/// Lock-free counters shared between the RT thread and the control thread
///
/// All operations use `Ordering::Relaxed`: the counters are only read for
/// display and tests, never to synchronize other memory.
pub struct FilterStats {
    /// Ticks delivered by the host
    pub ticks: AtomicU64,
    /// Ticks skipped for lack of timing information
    pub skipped_ticks: AtomicU64,
    /// Channels rendered from an input buffer
    pub processed_channels: AtomicU64,
    /// Channels rendered from silence (no usable input)
    pub silent_channels: AtomicU64,
    /// Channels skipped because no output buffer was available
    pub idle_channels: AtomicU64,
    /// Channels skipped because the output buffer had no usable memory
    pub unresolved_channels: AtomicU64,
    /// Buffers taken from the host
    pub buffers_dequeued: AtomicU64,
    /// Buffers given back to the host
    pub buffers_queued: AtomicU64,
    /// Diagnostic events lost to a full ring
    pub dropped_diagnostics: AtomicU64,
    /// Last state reported by the host
    state: AtomicU8,
}

impl Default for FilterStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterStats {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            processed_channels: AtomicU64::new(0),
            silent_channels: AtomicU64::new(0),
            idle_channels: AtomicU64::new(0),
            unresolved_channels: AtomicU64::new(0),
            buffers_dequeued: AtomicU64::new(0),
            buffers_queued: AtomicU64::new(0),
            dropped_diagnostics: AtomicU64::new(0),
            state: AtomicU8::new(FilterState::Unconnected.to_u8()),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn processed_channels(&self) -> u64 {
        self.processed_channels.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn silent_channels(&self) -> u64 {
        self.silent_channels.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn idle_channels(&self) -> u64 {
        self.idle_channels.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unresolved_channels(&self) -> u64 {
        self.unresolved_channels.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn buffers_dequeued(&self) -> u64 {
        self.buffers_dequeued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn buffers_queued(&self) -> u64 {
        self.buffers_queued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_diagnostics(&self) -> u64 {
        self.dropped_diagnostics.load(Ordering::Relaxed)
    }

    /// Last state reported by the host (lock-free)
    #[inline]
    pub fn state(&self) -> FilterState {
        FilterState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: FilterState) {
        self.state.store(state.to_u8(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_policy() {
        assert!(report_tick(1));
        assert!(report_tick(19));
        assert!(!report_tick(20));
        assert!(!report_tick(99));
        assert!(report_tick(100));
        assert!(report_tick(300));

        assert!(report_channels(19));
        assert!(!report_channels(20));

        assert!(report_missing_output(10));
        assert!(report_missing_output(40));
        assert!(!report_missing_output(41));
        assert!(!report_missing_output(50));
    }

    #[test]
    fn test_channel_drains_in_order() {
        let (mut tx, mut rx) = diagnostic_channel(Arc::new(FilterStats::new()));
        tx.emit(Diagnostic::OutputMissing { tick: 10, channel: 1 });
        tx.emit(Diagnostic::BufferAdded {
            direction: Direction::Input,
            channel: 0,
        });
        assert_eq!(rx.pending(), 2);

        let mut seen = Vec::new();
        assert_eq!(rx.drain_with(|event| seen.push(event)), 2);
        assert_eq!(seen[0], Diagnostic::OutputMissing { tick: 10, channel: 1 });
        assert_eq!(rx.drain(), 0);
    }

    #[test]
    fn test_full_ring_drops_events() {
        let stats = Arc::new(FilterStats::new());
        let (mut tx, mut rx) = diagnostic_channel(Arc::clone(&stats));
        for tick in 0..(DIAGNOSTIC_QUEUE_CAPACITY as u64 + 5) {
            tx.emit(Diagnostic::Tick {
                tick,
                frames: 64,
                sample_rate: 48000,
            });
        }
        assert_eq!(stats.dropped_diagnostics(), 5);
        assert_eq!(rx.drain(), DIAGNOSTIC_QUEUE_CAPACITY);

        // Room again after draining
        tx.emit(Diagnostic::OutputMissing { tick: 1, channel: 0 });
        assert_eq!(stats.dropped_diagnostics(), 5);
        assert_eq!(rx.pending(), 1);
    }

    #[test]
    fn test_stats_state() {
        let stats = FilterStats::new();
        assert_eq!(stats.state(), FilterState::Unconnected);
        stats.set_state(FilterState::Streaming);
        assert_eq!(stats.state(), FilterState::Streaming);
        FilterStats::bump(&stats.ticks);
        assert_eq!(stats.ticks(), 1);
    }
}
