//! Port descriptors and the channel-slot arena

use crate::error::{FilterError, FilterResult};
use crate::format::{configure_port, port_properties, AudioFormat, ChannelPosition};
use crate::host::{HostFilter, PortFlags};
use crate::types::Direction;

/// One mono port registered with the host graph
///
/// Immutable after creation; the host handle is only an identifier; the port
/// itself is owned (and released) by the filter node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port<P> {
    /// Host identifier of the port
    pub id: P,
    pub direction: Direction,
    /// 0-based channel index
    pub channel: usize,
    /// Display name ("FL", "CH3", ...)
    pub name: String,
    pub position: ChannelPosition,
    /// Negotiated format (mono F32)
    pub format: AudioFormat,
}

/// Input/output port pair sharing one channel index
///
/// The unit of work of a processing tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSlot<P> {
    pub index: usize,
    pub input: Port<P>,
    pub output: Port<P>,
}

impl<P: Copy + PartialEq> ChannelSlot<P> {
    /// Register the input and output port of channel `index` on `filter`
    pub fn create<F>(filter: &mut F, index: usize, total: usize) -> FilterResult<Self>
    where
        F: HostFilter<Port = P>,
    {
        let input = add_port(filter, Direction::Input, index, total)?;
        let output = add_port(filter, Direction::Output, index, total)?;
        Ok(Self {
            index,
            input,
            output,
        })
    }

    /// The port of this slot with host id `id`
    pub fn port(&self, id: P) -> Option<&Port<P>> {
        if self.input.id == id {
            Some(&self.input)
        } else if self.output.id == id {
            Some(&self.output)
        } else {
            None
        }
    }
}

fn add_port<F: HostFilter>(
    filter: &mut F,
    direction: Direction,
    channel: usize,
    total: usize,
) -> FilterResult<Port<F::Port>> {
    let config = configure_port(channel, total);
    let format = AudioFormat::mono(config.position);
    let props = port_properties(direction, &config);

    let id = filter
        .add_port(direction, PortFlags::MAP_BUFFERS, &props, &format)
        .map_err(|source| FilterError::Port {
            direction,
            channel,
            source,
        })?;

    log::debug!(
        "Added {} port {:?} for channel {} ({})",
        direction,
        id,
        channel,
        config.name
    );

    Ok(Port {
        id,
        direction,
        channel,
        name: config.name.into_owned(),
        position: config.position,
        format,
    })
}

/// Find the port with host id `id` in a slot arena
pub fn find_port<P: Copy + PartialEq>(slots: &[ChannelSlot<P>], id: P) -> Option<&Port<P>> {
    slots.iter().find_map(|slot| slot.port(id))
}
