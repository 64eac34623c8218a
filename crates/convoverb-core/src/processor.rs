//! Real-time processing loop
//!
//! [`FilterProcessor`] is the handler the session connects to the host graph.
//! Once per tick, for every channel slot in index order, it:
//!
//! 1. dequeues the input and output buffer of the slot
//! 2. resolves bounded sample views over them
//! 3. runs the [`ChannelTransform`] (or renders from silence without input)
//! 4. writes chunk metadata back on the output
//! 5. queues every dequeued buffer back to the port it came from
//!
//! The loop never allocates, locks or logs. Verbose diagnostics (only with
//! `debug`) are pushed to a wait-free ring drained by the control thread.

use std::sync::Arc;

use crate::buffer::{input_frames, output_frames, SampleView, SampleViewMut};
use crate::diagnostics::{
    report_channels, report_missing_output, report_tick, Diagnostic, DiagnosticSender, FilterStats,
};
use crate::host::{BufferQueue, Chunk, FilterHandler, HostBuffer};
use crate::port::{find_port, ChannelSlot};
use crate::transform::ChannelTransform;
use crate::types::{ClockPosition, Direction, ProcessingContext, SAMPLE_BYTES};

/// Result of rendering one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Output rendered from the input
    Processed,
    /// Output rendered from silence (no input buffer, or empty input)
    Silent,
    /// Input present but without usable memory; rendered from silence
    InputUnresolved,
    /// Output without usable memory; nothing written
    OutputUnresolved,
}

/// Per-tick handler connected to the host filter
pub struct FilterProcessor<P, T> {
    slots: Arc<[ChannelSlot<P>]>,
    transform: T,
    debug: bool,
    tick: u64,
    stats: Arc<FilterStats>,
    diagnostics: DiagnosticSender,
}

impl<P, T: ChannelTransform> FilterProcessor<P, T> {
    pub fn new(
        slots: Arc<[ChannelSlot<P>]>,
        transform: T,
        debug: bool,
        stats: Arc<FilterStats>,
        diagnostics: DiagnosticSender,
    ) -> Self {
        Self {
            slots,
            transform,
            debug,
            tick: 0,
            stats,
            diagnostics,
        }
    }
}

impl<Q, T> FilterHandler<Q> for FilterProcessor<Q::Port, T>
where
    Q: BufferQueue,
    Q::Port: PartialEq + Send + Sync,
    T: ChannelTransform,
{
    fn add_buffer(&mut self, queue: &mut Q, port: Q::Port, buffer: Q::Buffer) {
        queue.queue(port, buffer);

        if self.debug {
            if let Some(port) = find_port(&self.slots, port) {
                self.diagnostics.emit(Diagnostic::BufferAdded {
                    direction: port.direction,
                    channel: port.channel,
                });
            }
        }
    }

    fn process(&mut self, queue: &mut Q, position: Option<&ClockPosition>) {
        self.tick += 1;
        FilterStats::bump(&self.stats.ticks);

        let Some(position) = position else {
            FilterStats::bump(&self.stats.skipped_ticks);
            return;
        };
        let context = ProcessingContext::from_position(position, self.tick);
        let tick = context.tick;

        let Self {
            slots,
            transform,
            debug,
            stats,
            diagnostics,
            ..
        } = self;
        let debug = *debug;

        if debug && report_tick(tick) {
            diagnostics.emit(Diagnostic::Tick {
                tick,
                frames: context.frames,
                sample_rate: context.sample_rate,
            });
        }

        for slot in slots.iter() {
            let mut input = queue.dequeue(slot.input.id);
            let output = queue.dequeue(slot.output.id);
            if input.is_some() {
                FilterStats::bump(&stats.buffers_dequeued);
            }
            if output.is_some() {
                FilterStats::bump(&stats.buffers_dequeued);
            }

            if debug && report_channels(tick) {
                diagnostics.emit(Diagnostic::Channel {
                    tick,
                    channel: slot.index,
                    input: input.is_some(),
                    output: output.is_some(),
                });
            }

            let Some(mut output) = output else {
                if let Some(input) = input {
                    queue.queue(slot.input.id, input);
                    FilterStats::bump(&stats.buffers_queued);
                }
                FilterStats::bump(&stats.idle_channels);
                if debug && report_missing_output(tick) {
                    diagnostics.emit(Diagnostic::OutputMissing {
                        tick,
                        channel: slot.index,
                    });
                }
                continue;
            };

            let outcome = render_channel(transform, input.as_mut(), &mut output, &context, slot.index);

            let unresolved = match outcome {
                ChannelOutcome::Processed => {
                    FilterStats::bump(&stats.processed_channels);
                    None
                }
                ChannelOutcome::Silent => {
                    FilterStats::bump(&stats.silent_channels);
                    None
                }
                ChannelOutcome::InputUnresolved => {
                    FilterStats::bump(&stats.silent_channels);
                    Some(Direction::Input)
                }
                ChannelOutcome::OutputUnresolved => {
                    FilterStats::bump(&stats.unresolved_channels);
                    Some(Direction::Output)
                }
            };
            if let Some(direction) = unresolved {
                if debug && report_tick(tick) {
                    diagnostics.emit(Diagnostic::ViewUnresolved {
                        tick,
                        channel: slot.index,
                        direction,
                    });
                }
            }

            if let Some(input) = input {
                queue.queue(slot.input.id, input);
                FilterStats::bump(&stats.buffers_queued);
            }
            queue.queue(slot.output.id, output);
            FilterStats::bump(&stats.buffers_queued);
        }
    }
}

/// Render one channel into `output`
///
/// Leaves both buffers untouched when the output has no usable memory.
pub fn render_channel<B, T>(
    transform: &mut T,
    input: Option<&mut B>,
    output: &mut B,
    context: &ProcessingContext,
    channel: usize,
) -> ChannelOutcome
where
    B: HostBuffer,
    T: ChannelTransform + ?Sized,
{
    let out_frames = output_frames(context.frames, output);
    let Some(mut out_view) = SampleViewMut::resolve(output, out_frames) else {
        return ChannelOutcome::OutputUnresolved;
    };

    let (in_view, input_present) = match input {
        Some(buffer) => {
            let in_frames = input_frames(out_frames, buffer);
            let view = if in_frames > 0 {
                SampleView::resolve(buffer, in_frames)
            } else {
                None
            };
            (view, in_frames > 0)
        }
        None => (None, false),
    };

    let outcome = match in_view {
        Some(in_view) => {
            let (head, tail) = out_view.split_at_mut(in_view.len());
            transform.process(&in_view, head, context.sample_rate, channel);
            tail.fill(0.0);
            ChannelOutcome::Processed
        }
        None => {
            out_view.silence();
            transform.process_in_place(&mut out_view, context.sample_rate, channel);
            if input_present {
                ChannelOutcome::InputUnresolved
            } else {
                ChannelOutcome::Silent
            }
        }
    };

    if let Some(chunk) = output.chunk_mut() {
        *chunk = Chunk {
            offset: 0,
            size: (out_frames * SAMPLE_BYTES) as u32,
            stride: SAMPLE_BYTES as i32,
            flags: 0,
        };
    }
    output.set_size(out_frames as u64);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{diagnostic_channel, DiagnosticReceiver};
    use crate::host::memory::{
        MemoryBuffer, MemoryContext, MemoryCore, MemoryFilter, MemoryGraph, MemoryPortId,
    };
    use crate::host::{
        DataFlags, FilterFlags, HostContext, HostCore, HostFilter, HostLoop, Properties,
    };
    use crate::types::PROCESS_LATENCY;

    /// Doubles its input; renders 0.125 on top of silence
    struct Doubler;

    impl ChannelTransform for Doubler {
        fn process(&mut self, input: &[f32], output: &mut [f32], _rate: u32, _channel: usize) {
            for (out, &sample) in output.iter_mut().zip(input) {
                *out = sample * 2.0;
            }
        }

        fn process_in_place(&mut self, buffer: &mut [f32], _rate: u32, _channel: usize) {
            for sample in buffer.iter_mut() {
                *sample = *sample * 2.0 + 0.125;
            }
        }
    }

    struct Rig {
        graph: MemoryGraph,
        slots: Arc<[ChannelSlot<MemoryPortId>]>,
        stats: Arc<FilterStats>,
        diagnostics: DiagnosticReceiver,
        _filter: MemoryFilter,
        _core: MemoryCore,
        _context: MemoryContext,
    }

    fn rig(channels: usize, debug: bool) -> Rig {
        let graph = MemoryGraph::new();
        let context = graph.context().unwrap();
        let core = context.connect().unwrap();
        let mut filter = core.create_filter("test", &Properties::new()).unwrap();
        let slots: Arc<[ChannelSlot<MemoryPortId>]> = (0..channels)
            .map(|i| ChannelSlot::create(&mut filter, i, channels).unwrap())
            .collect::<Vec<_>>()
            .into();
        let stats = Arc::new(FilterStats::new());
        let (tx, rx) = diagnostic_channel(Arc::clone(&stats));
        let processor = FilterProcessor::new(Arc::clone(&slots), Doubler, debug, Arc::clone(&stats), tx);
        filter
            .connect(FilterFlags::RT_PROCESS, PROCESS_LATENCY, processor)
            .unwrap();

        Rig {
            graph,
            slots,
            stats,
            diagnostics: rx,
            _filter: filter,
            _core: core,
            _context: context,
        }
    }

    fn events(rig: &mut Rig) -> Vec<Diagnostic> {
        let mut seen = Vec::new();
        rig.diagnostics.drain_with(|event| seen.push(event));
        seen
    }

    #[test]
    fn test_stereo_tick_with_single_input() {
        let rig = rig(2, false);
        let (ch0, ch1) = (&rig.slots[0], &rig.slots[1]);
        let ramp: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();

        rig.graph
            .push_buffer(ch0.input.id, MemoryBuffer::mapped(256).with_data(&ramp));
        rig.graph.push_buffer(ch0.output.id, MemoryBuffer::mapped(256));
        rig.graph
            .push_buffer(ch1.output.id, MemoryBuffer::mapped(256).with_fill(9.0));

        assert!(rig.graph.tick(Some(ClockPosition::new(128, 48000))));

        let out0 = rig.graph.take_buffer(ch0.output.id).unwrap();
        let expected: Vec<f32> = ramp.iter().map(|s| s * 2.0).collect();
        assert_eq!(out0.valid_samples(), expected.as_slice());
        assert_eq!(
            out0.chunk(),
            Some(Chunk {
                offset: 0,
                size: 512,
                stride: 4,
                flags: 0
            })
        );
        assert_eq!(out0.size(), 128);

        // No input on ch1: transform of silence
        let out1 = rig.graph.take_buffer(ch1.output.id).unwrap();
        assert_eq!(out1.valid_samples().len(), 128);
        assert!(out1.valid_samples().iter().all(|&s| s == 0.125));

        // Input went back to its own port
        assert_eq!(rig.graph.available(ch0.input.id), 1);
        assert_eq!(rig.graph.outstanding_buffers(), 0);
        assert_eq!(rig.graph.misrouted_buffers(), 0);

        assert_eq!(rig.stats.processed_channels(), 1);
        assert_eq!(rig.stats.silent_channels(), 1);
        assert_eq!(rig.stats.buffers_dequeued(), 3);
        assert_eq!(rig.stats.buffers_queued(), 3);
    }

    #[test]
    fn test_tick_without_position_is_skipped() {
        let rig = rig(1, false);
        let slot = &rig.slots[0];
        rig.graph.push_buffer(slot.input.id, MemoryBuffer::mapped(64));
        rig.graph.push_buffer(slot.output.id, MemoryBuffer::mapped(64));

        rig.graph.tick(None);

        assert_eq!(rig.stats.ticks(), 1);
        assert_eq!(rig.stats.skipped_ticks(), 1);
        assert_eq!(rig.graph.counters(slot.input.id).dequeued, 0);
        assert_eq!(rig.graph.counters(slot.output.id).dequeued, 0);
        assert_eq!(rig.graph.available(slot.output.id), 1);
    }

    #[test]
    fn test_missing_output_returns_input() {
        let mut rig = rig(2, true);
        let slot = rig.slots[0].clone();
        rig.graph
            .push_buffer(slot.input.id, MemoryBuffer::mapped(64).with_data(&[1.0; 64]));

        // Tick 10 is inside the missing-output warning window
        for _ in 0..9 {
            rig.graph.tick(None);
        }
        rig.graph.tick(Some(ClockPosition::new(64, 48000)));

        assert_eq!(rig.graph.available(slot.input.id), 1);
        assert_eq!(rig.graph.outstanding_buffers(), 0);
        assert_eq!(rig.stats.idle_channels(), 2);
        assert_eq!(
            rig.graph.take_buffer(slot.input.id).unwrap().valid_samples(),
            &[1.0; 64]
        );

        let seen = events(&mut rig);
        assert!(seen.contains(&Diagnostic::OutputMissing { tick: 10, channel: 0 }));
        assert!(seen.contains(&Diagnostic::OutputMissing { tick: 10, channel: 1 }));
    }

    #[test]
    fn test_output_zeroed_before_in_place_transform() {
        let rig = rig(1, false);
        let slot = &rig.slots[0];
        rig.graph
            .push_buffer(slot.output.id, MemoryBuffer::mapped(32).with_fill(7.0));

        rig.graph.tick(Some(ClockPosition::new(32, 48000)));

        let out = rig.graph.take_buffer(slot.output.id).unwrap();
        assert!(out.samples().iter().all(|&s| s == 0.125));
    }

    #[test]
    fn test_frame_counts_clamped() {
        let rig = rig(1, false);
        let slot = &rig.slots[0];
        // Output holds 64 frames although 128 are requested; 32 frames of input
        rig.graph
            .push_buffer(slot.input.id, MemoryBuffer::mapped(256).with_data(&[0.5; 32]));
        rig.graph
            .push_buffer(slot.output.id, MemoryBuffer::mapped(64).with_fill(9.0));

        rig.graph.tick(Some(ClockPosition::new(128, 48000)));

        let out = rig.graph.take_buffer(slot.output.id).unwrap();
        assert_eq!(out.size(), 64);
        assert_eq!(out.chunk().map(|c| c.size), Some(256));
        assert!(out.samples()[..32].iter().all(|&s| s == 1.0));
        assert!(out.samples()[32..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_unresolved_output_returns_both_untouched() {
        let mut rig = rig(1, true);
        let slot = rig.slots[0].clone();
        rig.graph
            .push_buffer(slot.input.id, MemoryBuffer::mapped(64).with_data(&[0.5; 16]));
        rig.graph.push_buffer(slot.output.id, MemoryBuffer::detached());

        rig.graph.tick(Some(ClockPosition::new(64, 48000)));

        let out = rig.graph.take_buffer(slot.output.id).unwrap();
        assert!(out.chunk().is_none());
        assert_eq!(out.size(), 0);
        let input = rig.graph.take_buffer(slot.input.id).unwrap();
        assert_eq!(input.chunk().map(|c| c.size), Some(64));
        assert_eq!(rig.stats.unresolved_channels(), 1);
        assert_eq!(rig.graph.outstanding_buffers(), 0);

        assert!(events(&mut rig).contains(&Diagnostic::ViewUnresolved {
            tick: 1,
            channel: 0,
            direction: Direction::Output,
        }));
    }

    #[test]
    fn test_unreadable_input_renders_silence() {
        let rig = rig(1, false);
        let slot = &rig.slots[0];
        rig.graph.push_buffer(
            slot.input.id,
            MemoryBuffer::raw(64, DataFlags::WRITABLE).with_data(&[0.5; 64]),
        );
        rig.graph.push_buffer(slot.output.id, MemoryBuffer::mapped(64));

        rig.graph.tick(Some(ClockPosition::new(64, 48000)));

        let out = rig.graph.take_buffer(slot.output.id).unwrap();
        assert!(out.valid_samples().iter().all(|&s| s == 0.125));
        assert_eq!(rig.stats.silent_channels(), 1);
        assert_eq!(rig.graph.available(slot.input.id), 1);
    }

    #[test]
    fn test_raw_output_fallback() {
        let rig = rig(1, false);
        let slot = &rig.slots[0];
        rig.graph
            .push_buffer(slot.input.id, MemoryBuffer::mapped(16).with_data(&[0.25; 16]));
        rig.graph
            .push_buffer(slot.output.id, MemoryBuffer::raw(16, DataFlags::WRITABLE));

        rig.graph.tick(Some(ClockPosition::new(16, 48000)));

        let out = rig.graph.take_buffer(slot.output.id).unwrap();
        assert_eq!(out.valid_samples(), &[0.5; 16]);
        assert_eq!(rig.stats.processed_channels(), 1);
    }

    #[test]
    fn test_add_buffer_queues_back() {
        let mut rig = rig(2, true);
        let port = rig.slots[1].input.id;

        rig.graph.add_buffer(port, MemoryBuffer::mapped(64));

        assert_eq!(rig.graph.available(port), 1);
        assert_eq!(rig.graph.outstanding_buffers(), 0);
        assert_eq!(
            events(&mut rig),
            vec![Diagnostic::BufferAdded {
                direction: Direction::Input,
                channel: 1,
            }]
        );
    }

    #[test]
    fn test_debug_events_follow_tick_counter() {
        let mut rig = rig(1, true);
        rig.graph.tick(None);
        rig.graph.tick(Some(ClockPosition::new(64, 0)));

        let seen = events(&mut rig);
        assert_eq!(
            seen[0],
            Diagnostic::Tick {
                tick: 2,
                frames: 64,
                sample_rate: 48000,
            }
        );
        assert_eq!(
            seen[1],
            Diagnostic::Channel {
                tick: 2,
                channel: 0,
                input: false,
                output: false,
            }
        );
    }

    #[test]
    fn test_quiet_without_debug() {
        let mut rig = rig(2, false);
        rig.graph.add_buffer(rig.slots[0].output.id, MemoryBuffer::mapped(8));
        rig.graph.tick(Some(ClockPosition::new(8, 48000)));
        assert!(events(&mut rig).is_empty());
    }
}
