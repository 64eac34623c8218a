//! Filter session lifecycle
//!
//! A [`FilterSession`] owns everything acquired from the host graph: context,
//! core, filter node (which owns the ports) and the channel-slot arena shared
//! with the processing loop. Construction either succeeds completely or
//! releases every resource it acquired before returning the error.
//!
//! ```ignore
//! let session = FilterSession::create(&host, FilterConfig::stereo(), Passthrough)?;
//! // ... host delivers ticks on its RT thread ...
//! session.poll_diagnostics();
//! session.destroy();
//! ```

use std::sync::Arc;

use crate::config::FilterConfig;
use crate::diagnostics::{diagnostic_channel, DiagnosticReceiver, FilterStats};
use crate::error::{FilterError, FilterResult};
use crate::host::{FilterFlags, FilterState, HostContext, HostCore, HostFilter, HostLoop};
use crate::observer::LogObserver;
use crate::port::ChannelSlot;
use crate::processor::FilterProcessor;
use crate::transform::ChannelTransform;
use crate::types::{ProcessLatency, PROCESS_LATENCY};

/// Core handle type of host loop `L`
pub type CoreOf<L> = <<L as HostLoop>::Context as HostContext>::Core;
/// Filter handle type of host loop `L`
pub type FilterOf<L> = <CoreOf<L> as HostCore>::Filter;
/// Port id type of host loop `L`
pub type PortOf<L> = <FilterOf<L> as HostFilter>::Port;

/// A running filter node in a host graph
pub struct FilterSession<L: HostLoop> {
    // Released in this order
    filter: Option<FilterOf<L>>,
    core: Option<CoreOf<L>>,
    context: Option<L::Context>,
    slots: Arc<[ChannelSlot<PortOf<L>>]>,
    stats: Arc<FilterStats>,
    diagnostics: DiagnosticReceiver,
    config: FilterConfig,
    latency: ProcessLatency,
}

impl<L: HostLoop> FilterSession<L> {
    /// Create the filter node, its ports, and connect it to the graph
    ///
    /// `transform` is moved to the processing loop and runs on the host's
    /// real-time thread from the moment this returns.
    pub fn create<T>(host: &L, config: FilterConfig, transform: T) -> FilterResult<Self>
    where
        T: ChannelTransform + 'static,
    {
        let channels = config.channels;
        if channels == 0 {
            return Err(FilterError::InvalidChannelCount(channels));
        }

        log::info!(
            "Creating filter '{}' ({} channels)",
            config.node_name,
            channels
        );

        let context = host.context().map_err(FilterError::Context)?;
        let core = context.connect().map_err(FilterError::Core)?;

        let props = config.filter_properties();
        let mut filter = core
            .create_filter(&config.filter_name, &props)
            .map_err(FilterError::Filter)?;

        let stats = Arc::new(FilterStats::new());
        filter.add_listener(Box::new(LogObserver::new(Arc::clone(&stats))));

        let slots: Arc<[ChannelSlot<PortOf<L>>]> = (0..channels)
            .map(|index| ChannelSlot::create(&mut filter, index, channels))
            .collect::<FilterResult<Vec<_>>>()?
            .into();

        let latency = PROCESS_LATENCY;
        let (sender, diagnostics) = diagnostic_channel(Arc::clone(&stats));
        let processor = FilterProcessor::new(
            Arc::clone(&slots),
            transform,
            config.debug,
            Arc::clone(&stats),
            sender,
        );

        if let Err(err) = filter.connect(FilterFlags::RT_PROCESS, latency, processor) {
            log::error!("Failed to connect filter: {}", err);
            return Err(FilterError::Connect(err));
        }

        log::info!(
            "Filter connected: {} ports, latency {} frames @ {} Hz ({:.2} ms)",
            channels * 2,
            latency.frames,
            latency.rate,
            latency.as_millis_f32()
        );

        Ok(Self {
            filter: Some(filter),
            core: Some(core),
            context: Some(context),
            slots,
            stats,
            diagnostics,
            config,
            latency,
        })
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.slots.len()
    }

    /// Channel slots in index order
    pub fn slots(&self) -> &[ChannelSlot<PortOf<L>>] {
        &self.slots
    }

    /// Latency declared to the host
    pub fn latency(&self) -> ProcessLatency {
        self.latency
    }

    /// Counters shared with the processing loop
    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// Last state reported by the host
    pub fn state(&self) -> FilterState {
        self.stats.state()
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Log pending diagnostics from the processing loop
    ///
    /// Returns the number of events drained. Call periodically from the
    /// control thread; a no-op unless the session was created with `debug`.
    pub fn poll_diagnostics(&mut self) -> usize {
        self.diagnostics.drain()
    }

    /// Disconnect and release everything
    pub fn destroy(self) {
        drop(self);
    }
}

impl<L: HostLoop> Drop for FilterSession<L> {
    fn drop(&mut self) {
        log::debug!("Destroying filter '{}'", self.config.node_name);

        // Disconnects the processing loop; no ticks after this
        drop(self.filter.take());
        self.diagnostics.drain();

        drop(self.core.take());
        drop(self.context.take());
    }
}

/// Destroy a session if there is one
pub fn destroy<L: HostLoop>(session: Option<FilterSession<L>>) {
    if let Some(session) = session {
        session.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::keys;
    use crate::host::memory::{FailPoint, MemoryBuffer, MemoryGraph};
    use crate::transform::{GainTransform, Passthrough};
    use crate::types::{ClockPosition, Direction};

    fn port_names(graph: &MemoryGraph, session: &FilterSession<MemoryGraph>) -> Vec<String> {
        session
            .slots()
            .iter()
            .flat_map(|slot| [slot.input.id, slot.output.id])
            .map(|id| {
                graph
                    .port_record(id)
                    .and_then(|record| record.props.get(keys::PORT_NAME).map(str::to_string))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_create_stereo() {
        let graph = MemoryGraph::new();
        let session = FilterSession::create(&graph, FilterConfig::stereo(), Passthrough).unwrap();

        assert_eq!(session.channels(), 2);
        assert_eq!(
            port_names(&graph, &session),
            vec!["input_FL", "output_FL", "input_FR", "output_FR"]
        );
        assert_eq!(graph.port_count(), 4);

        let record = graph.filter_record().unwrap();
        assert_eq!(record.name, "pw-convoverb-filter");
        assert_eq!(record.props.get(keys::MEDIA_CLASS), Some("Audio/Filter"));
        assert_eq!(record.props.get(keys::AUDIO_CHANNELS), Some("2"));
        assert_eq!(record.props.get(keys::NODE_NAME), Some("pw-convoverb"));
        assert!(record.flags.unwrap().contains(FilterFlags::RT_PROCESS));
        assert_eq!(record.latency, Some(PROCESS_LATENCY));

        assert!(graph.is_connected());
        assert_eq!(session.state(), FilterState::Paused);
    }

    #[test]
    fn test_port_naming_mono_and_multichannel() {
        let graph = MemoryGraph::new();
        let session = FilterSession::create(&graph, FilterConfig::mono(), Passthrough).unwrap();
        assert_eq!(port_names(&graph, &session), vec!["input_MONO", "output_MONO"]);
        session.destroy();

        let session =
            FilterSession::create(&graph, FilterConfig::with_channels(5), Passthrough).unwrap();
        let names = port_names(&graph, &session);
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "input_CH1");
        assert_eq!(names[9], "output_CH5");
        let record = graph.port_record(session.slots()[4].input.id).unwrap();
        assert_eq!(record.props.get(keys::AUDIO_CHANNEL), None);
    }

    #[test]
    fn test_latency_independent_of_channels() {
        for channels in [1, 2, 5, 8] {
            let graph = MemoryGraph::new();
            let session =
                FilterSession::create(&graph, FilterConfig::with_channels(channels), Passthrough)
                    .unwrap();
            assert_eq!(session.latency().frames, 1024);
            assert_eq!(session.latency().rate, 48000);
            assert_eq!(session.latency().as_nanos(), 21_333_333);

            // What the host was actually told
            let record = graph.filter_record().unwrap();
            assert_eq!(record.latency, Some(PROCESS_LATENCY), "{} channels", channels);
        }
    }

    #[test]
    fn test_custom_names_reach_the_host() {
        let graph = MemoryGraph::new();
        let config = FilterConfig::stereo()
            .with_filter_name("verb-filter")
            .with_node_name("verb")
            .with_description("Hall Reverb");
        let session = FilterSession::create(&graph, config, Passthrough).unwrap();

        let record = graph.filter_record().unwrap();
        assert_eq!(record.name, "verb-filter");
        assert_eq!(record.props.get(keys::NODE_NAME), Some("verb"));
        assert_eq!(record.props.get(keys::NODE_DESCRIPTION), Some("Hall Reverb"));
        assert_eq!(session.config().filter_name, "verb-filter");
    }

    #[test]
    fn test_invalid_channel_count() {
        let graph = MemoryGraph::new();
        let result = FilterSession::create(&graph, FilterConfig::with_channels(0), Passthrough);
        assert!(matches!(result, Err(FilterError::InvalidChannelCount(0))));
        assert_eq!(graph.live_resources(), 0);
    }

    #[test]
    fn test_failed_create_releases_everything() {
        let points = [
            FailPoint::Context,
            FailPoint::Core,
            FailPoint::Filter,
            FailPoint::Port {
                direction: Direction::Input,
                channel: 0,
            },
            FailPoint::Port {
                direction: Direction::Input,
                channel: 2,
            },
            FailPoint::Port {
                direction: Direction::Output,
                channel: 3,
            },
            FailPoint::Connect,
        ];

        for point in points {
            let graph = MemoryGraph::new();
            graph.fail_at(point);
            let result = FilterSession::create(&graph, FilterConfig::with_channels(4), Passthrough);

            let err = match result {
                Ok(_) => panic!("create succeeded despite failure at {:?}", point),
                Err(err) => err,
            };
            match (point, &err) {
                (FailPoint::Context, FilterError::Context(_))
                | (FailPoint::Core, FilterError::Core(_))
                | (FailPoint::Filter, FilterError::Filter(_))
                | (FailPoint::Connect, FilterError::Connect(_)) => {}
                (
                    FailPoint::Port { direction, channel },
                    FilterError::Port {
                        direction: failed_direction,
                        channel: failed_channel,
                        ..
                    },
                ) => {
                    assert_eq!(direction, *failed_direction);
                    assert_eq!(channel, *failed_channel);
                }
                _ => panic!("unexpected error {:?} for {:?}", err, point),
            }

            assert_eq!(graph.live_resources(), 0, "leak after failure at {:?}", point);
            assert_eq!(graph.port_count(), 0);
            assert!(!graph.is_connected());
        }
    }

    #[test]
    fn test_second_filter_rejected_without_leaks() {
        let graph = MemoryGraph::new();
        let session = FilterSession::create(&graph, FilterConfig::stereo(), Passthrough).unwrap();
        let live = graph.live_resources();

        let result = FilterSession::create(&graph, FilterConfig::mono(), Passthrough);
        assert!(matches!(result, Err(FilterError::Filter(_))));
        assert_eq!(graph.live_resources(), live);
        assert!(graph.is_connected());
        drop(session);
    }

    #[test]
    fn test_state_changes_are_relayed() {
        let graph = MemoryGraph::new();
        let session = FilterSession::create(&graph, FilterConfig::stereo(), Passthrough).unwrap();

        graph.set_state(FilterState::Streaming, None);
        assert_eq!(session.state(), FilterState::Streaming);

        graph.set_state(FilterState::Error, Some("device lost"));
        assert_eq!(session.state(), FilterState::Error);

        // Error does not tear the filter down
        assert!(graph.is_connected());
        assert!(graph.tick(Some(ClockPosition::new(64, 48000))));
        assert_eq!(session.stats().ticks(), 1);
    }

    #[test]
    fn test_render_and_poll_diagnostics() {
        let graph = MemoryGraph::new();
        let mut session = FilterSession::create(
            &graph,
            FilterConfig::mono().with_debug(true),
            GainTransform::new(0.5),
        )
        .unwrap();
        let slot = session.slots()[0].clone();

        graph.add_buffer(slot.input.id, MemoryBuffer::mapped(64).with_data(&[1.0; 64]));
        graph.add_buffer(slot.output.id, MemoryBuffer::mapped(64));
        assert!(graph.tick(Some(ClockPosition::new(64, 48000))));

        let out = graph.take_buffer(slot.output.id).unwrap();
        assert!(out.valid_samples().iter().all(|&s| s == 0.5));
        assert_eq!(out.valid_samples().len(), 64);
        assert_eq!(session.stats().processed_channels(), 1);

        // Two buffer-add events, one tick line, one channel line
        assert_eq!(session.poll_diagnostics(), 4);
        assert_eq!(session.poll_diagnostics(), 0);
    }

    #[test]
    fn test_unpolled_diagnostics_are_counted_when_dropped() {
        let graph = MemoryGraph::new();
        let mut session = FilterSession::create(
            &graph,
            FilterConfig::mono().with_debug(true),
            Passthrough,
        )
        .unwrap();
        let input = session.slots()[0].input.id;

        for _ in 0..300 {
            graph.add_buffer(input, MemoryBuffer::mapped(64));
        }
        assert_eq!(session.stats().dropped_diagnostics(), 300 - 256);

        assert_eq!(session.poll_diagnostics(), 256);
        graph.add_buffer(input, MemoryBuffer::mapped(64));
        assert_eq!(session.poll_diagnostics(), 1);
        assert_eq!(session.stats().dropped_diagnostics(), 44);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let graph = MemoryGraph::new();
        let session = FilterSession::create(&graph, FilterConfig::stereo(), Passthrough).unwrap();
        assert_eq!(graph.live_resources(), 3 + 4);

        destroy(Some(session));
        assert_eq!(graph.live_resources(), 0);
        assert!(!graph.is_connected());
        assert!(!graph.tick(Some(ClockPosition::new(64, 48000))));

        destroy::<MemoryGraph>(None);
    }
}
