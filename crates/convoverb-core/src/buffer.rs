//! Buffer view resolution
//!
//! Turns a host buffer into a bounded `f32` view for the transform. The
//! mapped DSP view is preferred; when the host did not map the buffer the raw
//! data plane is used instead, gated by the plane's capability flag, offset by
//! the chunk offset and bounds/alignment checked before it is reinterpreted.
//!
//! Views borrow the buffer, so they cannot outlive the tick that dequeued it.

use std::ops::{Deref, DerefMut};

use crate::host::{DataFlags, HostBuffer};
use crate::types::SAMPLE_BYTES;

/// Read-only sample view over an input buffer
#[derive(Debug)]
pub struct SampleView<'a> {
    samples: &'a [f32],
}

impl<'a> SampleView<'a> {
    /// Resolve a readable view of exactly `frames` samples
    pub fn resolve<B: HostBuffer>(buffer: &'a mut B, frames: usize) -> Option<Self> {
        if buffer.dsp_frames().is_some_and(|available| available >= frames) {
            return buffer.dsp(frames).map(|samples| Self { samples });
        }
        let bytes = raw_region(buffer, frames, DataFlags::READABLE)?;
        let samples: &'a [f32] = bytemuck::try_cast_slice(&*bytes).ok()?;
        Some(Self { samples })
    }

    pub fn as_slice(&self) -> &'a [f32] {
        self.samples
    }
}

impl Deref for SampleView<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        self.samples
    }
}

/// Writable sample view over an output buffer
#[derive(Debug)]
pub struct SampleViewMut<'a> {
    samples: &'a mut [f32],
}

impl<'a> SampleViewMut<'a> {
    /// Resolve a writable view of exactly `frames` samples
    pub fn resolve<B: HostBuffer>(buffer: &'a mut B, frames: usize) -> Option<Self> {
        if buffer.dsp_frames().is_some_and(|available| available >= frames) {
            return buffer.dsp_mut(frames).map(|samples| Self { samples });
        }
        let bytes = raw_region(buffer, frames, DataFlags::WRITABLE)?;
        let samples = bytemuck::try_cast_slice_mut(bytes).ok()?;
        Some(Self { samples })
    }

    /// Zero the whole view
    pub fn silence(&mut self) {
        self.samples.fill(0.0);
    }
}

impl Deref for SampleViewMut<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        self.samples
    }
}

impl DerefMut for SampleViewMut<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        self.samples
    }
}

/// Byte range of `frames` samples starting at the chunk offset of the raw plane
fn raw_region<B: HostBuffer>(buffer: &mut B, frames: usize, required: DataFlags) -> Option<&mut [u8]> {
    let offset = buffer.chunk().map_or(0, |chunk| chunk.offset as usize);
    let raw = buffer.raw_data()?;
    if !raw.flags.contains(required) {
        return None;
    }
    let end = offset.checked_add(frames.checked_mul(SAMPLE_BYTES)?)?;
    raw.bytes.get_mut(offset..end)
}

/// Frames of output to render: the request, clamped to the buffer capacity
pub fn output_frames<B: HostBuffer>(requested: usize, buffer: &B) -> usize {
    match buffer.max_size() {
        Some(max_bytes) if max_bytes > 0 => requested.min(max_bytes as usize / SAMPLE_BYTES),
        _ => requested,
    }
}

/// Frames of input to consume: `out_frames`, clamped to the valid chunk
/// size (when nonzero) and to the buffer capacity
pub fn input_frames<B: HostBuffer>(out_frames: usize, buffer: &B) -> usize {
    let mut frames = out_frames;
    if let Some(chunk) = buffer.chunk() {
        let valid = chunk.size as usize / SAMPLE_BYTES;
        if valid > 0 && valid < frames {
            frames = valid;
        }
    }
    if let Some(max_bytes) = buffer.max_size().filter(|&max| max > 0) {
        frames = frames.min(max_bytes as usize / SAMPLE_BYTES);
    }
    frames
}
