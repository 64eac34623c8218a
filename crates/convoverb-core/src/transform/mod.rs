//! Per-channel signal transforms
//!
//! The processing loop hands every channel to a [`ChannelTransform`] once per
//! tick. Transforms run on the real-time thread, so they must not allocate,
//! lock or block; any state they need (delay lines, filter memories) is
//! allocated at construction time.
//!
//! Stock transforms:
//! - [`Passthrough`]: copies input to output
//! - [`GainTransform`]: linear volume
//! - [`DelayTransform`]: per-channel feedback delay

mod delay;
mod gain;

pub use delay::DelayTransform;
pub use gain::GainTransform;

/// Signal transform applied to each channel of the filter
///
/// The frame count is the slice length. Implementations must write every
/// output frame.
pub trait ChannelTransform: Send {
    /// Render `output` from `input` (same length) for `channel`
    fn process(&mut self, input: &[f32], output: &mut [f32], sample_rate: u32, channel: usize);

    /// Render `buffer` in place for `channel`
    ///
    /// Called when a channel has no usable input; `buffer` holds silence.
    fn process_in_place(&mut self, buffer: &mut [f32], sample_rate: u32, channel: usize);
}

impl<T: ChannelTransform + ?Sized> ChannelTransform for Box<T> {
    fn process(&mut self, input: &[f32], output: &mut [f32], sample_rate: u32, channel: usize) {
        (**self).process(input, output, sample_rate, channel)
    }

    fn process_in_place(&mut self, buffer: &mut [f32], sample_rate: u32, channel: usize) {
        (**self).process_in_place(buffer, sample_rate, channel)
    }
}

/// Identity transform
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl ChannelTransform for Passthrough {
    fn process(&mut self, input: &[f32], output: &mut [f32], _sample_rate: u32, _channel: usize) {
        let frames = input.len().min(output.len());
        output[..frames].copy_from_slice(&input[..frames]);
        output[frames..].fill(0.0);
    }

    fn process_in_place(&mut self, _buffer: &mut [f32], _sample_rate: u32, _channel: usize) {}
}
