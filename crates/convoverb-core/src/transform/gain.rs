//! Gain transform - simple volume control

use super::ChannelTransform;

/// Upper bound of the gain multiplier (+6 dB)
pub const MAX_GAIN: f32 = 2.0;

/// Scales every channel by the same linear factor
///
/// Zero latency; no state.
#[derive(Debug, Clone, Copy)]
pub struct GainTransform {
    gain: f32,
}

impl GainTransform {
    /// Create a gain transform (clamped to 0.0..=MAX_GAIN)
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, MAX_GAIN),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, MAX_GAIN);
    }
}

impl Default for GainTransform {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ChannelTransform for GainTransform {
    fn process(&mut self, input: &[f32], output: &mut [f32], _sample_rate: u32, _channel: usize) {
        for (out, &sample) in output.iter_mut().zip(input) {
            *out = sample * self.gain;
        }
        let frames = input.len().min(output.len());
        output[frames..].fill(0.0);
    }

    fn process_in_place(&mut self, buffer: &mut [f32], _sample_rate: u32, _channel: usize) {
        for sample in buffer.iter_mut() {
            *sample *= self.gain;
        }
    }
}
