//! Feedback delay stage
//!
//! Stereo delay line with a filtered feedback path. The `delay` parameter
//! sets both the wet mix and the feedback amount.

use std::f32::consts::PI;

use super::stage::{finite, mix, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

/// Delay time of the echo
pub const DELAY_TIME_MS: f32 = 250.0;

/// Cutoff of the one-pole low-pass in the feedback path
const FEEDBACK_FILTER_HZ: f32 = 8000.0;

/// Upper bound on feedback so the loop always decays
const MAX_FEEDBACK: f32 = 0.95;

/// Circular buffer and filter memory for one channel
#[derive(Debug, Clone, Default)]
struct DelayLine {
    buffer: Vec<f32>,
    filter_state: f32,
}

/// Echo with feedback
///
/// Parameters: `wet` (0..1), `feedback` (0..0.95).
#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    wet: f32,
    feedback: f32,
    sample_rate: u32,
    lines: Vec<DelayLine>,
    write_pos: usize,
}

impl FeedbackDelay {
    pub fn new(wet: f32, feedback: f32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            wet: finite("delay.wet", wet)?.clamp(0.0, 1.0),
            feedback: finite("delay.feedback", feedback)?.clamp(0.0, MAX_FEEDBACK),
            sample_rate,
            lines: Vec::new(),
            write_pos: 0,
        })
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    fn delay_samples(&self) -> usize {
        ((DELAY_TIME_MS * self.sample_rate as f32 / 1000.0) as usize).max(1)
    }

    /// Delay plus a 10ms margin
    fn required_buffer_size(&self) -> usize {
        (((DELAY_TIME_MS + 10.0) * self.sample_rate as f32 / 1000.0) as usize).max(2)
    }

    fn ensure_lines(&mut self, channels: usize) {
        let size = self.required_buffer_size();
        if self.lines.len() != channels || self.lines.iter().any(|l| l.buffer.len() != size) {
            self.lines = vec![
                DelayLine {
                    buffer: vec![0.0; size],
                    filter_state: 0.0,
                };
                channels
            ];
            self.write_pos = 0;
        }
    }

    /// coeff = 1 - exp(-2 * PI * fc / fs)
    fn filter_coeff(&self) -> f32 {
        1.0 - (-2.0 * PI * FEEDBACK_FILTER_HZ / self.sample_rate as f32).exp()
    }
}

impl ProcessingStage for FeedbackDelay {
    fn kind(&self) -> StageKind {
        StageKind::Delay
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "wet" => self.wet = finite("delay.wet", value)?.clamp(0.0, 1.0),
            "feedback" => self.feedback = finite("delay.feedback", value)?.clamp(0.0, MAX_FEEDBACK),
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        Ok(())
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.lines.clear();
        }
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if buffer.is_empty() {
            return;
        }
        self.ensure_lines(buffer.channels());

        let delay_samples = self.delay_samples();
        let coeff = self.filter_coeff();
        let feedback = self.feedback;
        let wet = self.wet;
        let size = self.lines[0].buffer.len();
        let start = self.write_pos;

        for (channel, line) in buffer.samples.iter_mut().zip(self.lines.iter_mut()) {
            let mut write_pos = start;
            for sample in channel.iter_mut() {
                let read_pos = (write_pos + size - delay_samples) % size;
                let delayed = line.buffer[read_pos];

                line.filter_state += coeff * (delayed * feedback - line.filter_state);
                line.buffer[write_pos] = *sample + line.filter_state;

                *sample = mix(*sample, delayed, wet);
                write_pos = (write_pos + 1) % size;
            }
        }

        self.write_pos = (start + buffer.len()) % size;
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.buffer.fill(0.0);
            line.filter_state = 0.0;
        }
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;

    #[test]
    fn test_delay_produces_echo_across_blocks() {
        let mut delay = FeedbackDelay::new(1.0, 0.5, 1000).unwrap();
        // 250ms at 1kHz is 250 samples; feed it in 100-sample blocks
        let mut echo_at = None;
        for block in 0..4 {
            let mut buffer = AudioBuffer::new(100, ChannelLayout::Mono, 1000);
            if block == 0 {
                buffer.samples[0][0] = 1.0;
            }
            delay.process(&mut buffer);
            if let Some(i) = buffer.channel(0).iter().position(|&s| s.abs() > 0.5) {
                echo_at.get_or_insert(block * 100 + i);
            }
        }
        assert_eq!(echo_at, Some(250));
    }

    #[test]
    fn test_delay_dry_when_wet_is_zero() {
        let mut delay = FeedbackDelay::new(0.0, 0.7, 44100).unwrap();
        let mut buffer = AudioBuffer::new(64, ChannelLayout::Stereo, 44100);
        buffer.samples[0][3] = 0.8;
        let original = buffer.clone();
        delay.process(&mut buffer);
        assert_eq!(buffer, original);
    }

    #[test]
    fn test_feedback_clamped() {
        let mut delay = FeedbackDelay::new(0.5, 3.0, 44100).unwrap();
        assert_eq!(delay.feedback(), MAX_FEEDBACK);
        delay.set_parameter("feedback", 0.4).unwrap();
        assert_eq!(delay.feedback(), 0.4);
        assert!(delay.set_parameter("time", 1.0).is_err());
    }
}
