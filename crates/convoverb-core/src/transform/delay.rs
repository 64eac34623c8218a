//! Feedback delay transform
//!
//! One delay line per channel with:
//! - Delay time in ms
//! - Feedback control
//! - Dry/wet mix
//!
//! All lines are allocated up front; nothing is allocated on the RT thread.

use super::ChannelTransform;
use crate::types::DEFAULT_SAMPLE_RATE;

/// Maximum delay time in seconds at the default rate
const MAX_DELAY_SECONDS: f32 = 2.0;
/// Delay line length in samples
const MAX_DELAY_SAMPLES: usize = (DEFAULT_SAMPLE_RATE as f32 * MAX_DELAY_SECONDS) as usize;
/// Feedback ceiling, keeps the loop stable
const MAX_FEEDBACK: f32 = 0.95;

/// Mono delay line
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    fn new() -> Self {
        Self {
            buffer: vec![0.0; MAX_DELAY_SAMPLES],
            write_pos: 0,
        }
    }

    /// Read the sample written `delay` samples ago
    #[inline]
    fn read(&self, delay: usize) -> f32 {
        let read_pos = if self.write_pos >= delay {
            self.write_pos - delay
        } else {
            MAX_DELAY_SAMPLES - (delay - self.write_pos)
        };
        self.buffer[read_pos]
    }

    /// Push one sample through the line; returns the delayed sample
    #[inline]
    fn process(&mut self, input: f32, delay: usize, feedback: f32) -> f32 {
        let delayed = self.read(delay);
        self.buffer[self.write_pos] = input + delayed * feedback;
        self.write_pos = (self.write_pos + 1) % MAX_DELAY_SAMPLES;
        delayed
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Per-channel feedback delay
///
/// Channels beyond the count given at construction pass through dry.
pub struct DelayTransform {
    lines: Vec<DelayLine>,
    time_ms: f32,
    feedback: f32,
    mix: f32,
}

impl DelayTransform {
    /// Create a delay for `channels` channels
    pub fn new(channels: usize, time_ms: f32, feedback: f32, mix: f32) -> Self {
        let mut transform = Self {
            lines: (0..channels).map(|_| DelayLine::new()).collect(),
            time_ms: 0.0,
            feedback: 0.0,
            mix: 0.0,
        };
        transform.set_time_ms(time_ms);
        transform.set_feedback(feedback);
        transform.set_mix(mix);
        transform
    }

    pub fn set_time_ms(&mut self, time_ms: f32) {
        self.time_ms = time_ms.clamp(1.0, MAX_DELAY_SECONDS * 1000.0);
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, MAX_FEEDBACK);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    /// Delay in samples at `sample_rate`, limited by the line length
    pub fn delay_samples(&self, sample_rate: u32) -> usize {
        let samples = (self.time_ms / 1000.0 * sample_rate as f32) as usize;
        samples.clamp(1, MAX_DELAY_SAMPLES - 1)
    }

    /// Clear every delay line
    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
    }
}

impl ChannelTransform for DelayTransform {
    fn process(&mut self, input: &[f32], output: &mut [f32], sample_rate: u32, channel: usize) {
        let delay = self.delay_samples(sample_rate);
        let (feedback, mix) = (self.feedback, self.mix);
        let dry = 1.0 - mix;
        let frames = input.len().min(output.len());

        match self.lines.get_mut(channel) {
            Some(line) => {
                for (out, &sample) in output.iter_mut().zip(input) {
                    let delayed = line.process(sample, delay, feedback);
                    *out = sample * dry + delayed * mix;
                }
            }
            None => output[..frames].copy_from_slice(&input[..frames]),
        }
        output[frames..].fill(0.0);
    }

    fn process_in_place(&mut self, buffer: &mut [f32], sample_rate: u32, channel: usize) {
        let delay = self.delay_samples(sample_rate);
        let (feedback, mix) = (self.feedback, self.mix);
        let dry = 1.0 - mix;

        if let Some(line) = self.lines.get_mut(channel) {
            for sample in buffer.iter_mut() {
                let delayed = line.process(*sample, delay, feedback);
                *sample = *sample * dry + delayed * mix;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_dry() {
        let mut transform = DelayTransform::new(1, 10.0, 0.5, 0.0);
        let mut input = vec![0.0; 64];
        input[0] = 1.0;
        let mut output = vec![0.0; 64];
        transform.process(&input, &mut output, 48000, 0);
        assert!((output[0] - 1.0).abs() < 0.01);
        assert!(output[32].abs() < 0.01);
    }

    #[test]
    fn test_delay_tail_on_silence() {
        // 1ms at 48kHz = 48 samples
        let mut transform = DelayTransform::new(2, 1.0, 0.0, 1.0);
        assert_eq!(transform.delay_samples(48000), 48);

        let mut input = vec![0.0; 16];
        input[0] = 1.0;
        let mut output = vec![0.0; 16];
        transform.process(&input, &mut output, 48000, 1);
        assert!(output.iter().all(|s| s.abs() < 0.01));

        // The impulse comes out of the line while the channel only sees silence
        let mut silence = vec![0.0; 64];
        transform.process_in_place(&mut silence, 48000, 1);
        assert!((silence[48 - 16] - 1.0).abs() < 0.01);

        // Channel 0 never saw the impulse
        let mut silence = vec![0.0; 64];
        transform.process_in_place(&mut silence, 48000, 0);
        assert!(silence.iter().all(|s| s.abs() < 0.01));
    }

    #[test]
    fn test_delay_feedback_repeats() {
        let mut transform = DelayTransform::new(1, 1.0, 0.5, 1.0);
        let mut buffer = vec![0.0; 200];
        buffer[0] = 1.0;
        transform.process_in_place(&mut buffer, 48000, 0);
        assert!((buffer[48] - 1.0).abs() < 0.01);
        assert!((buffer[96] - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_unknown_channel_passes_through() {
        let mut transform = DelayTransform::new(1, 1.0, 0.5, 1.0);
        let mut output = [0.0; 3];
        transform.process(&[0.1, 0.2, 0.3], &mut output, 48000, 4);
        assert_eq!(output, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_delay_reset() {
        let mut transform = DelayTransform::new(1, 1.0, 0.9, 1.0);
        let mut buffer = vec![1.0; 256];
        transform.process_in_place(&mut buffer, 48000, 0);
        transform.reset();

        let mut buffer = vec![0.0; 128];
        transform.process_in_place(&mut buffer, 48000, 0);
        assert!(buffer.iter().all(|s| s.abs() < 0.01));
    }
}
