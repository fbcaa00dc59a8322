//! Freeverb stage for the live graph
//!
//! - 8 parallel comb filters per channel for the reflections
//! - 4 series allpass filters per channel for diffusion
//!
//! The offline export uses a convolution reverb instead (see
//! `dsp::convolution`); this stage only runs in real time.

use super::stage::{finite, mix, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Freeverb Constants
// ============================================================================

/// Reference sample rate for Freeverb delays
const REFERENCE_SAMPLE_RATE: f64 = 44100.0;

/// Comb filter delays at 44100 Hz
const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delays at 44100 Hz
const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];

/// Right channel delay offset in samples
const STEREO_SPREAD: usize = 23;

const ALLPASS_GAIN: f32 = 0.5;

/// Input attenuation before the parallel combs
const FIXED_GAIN: f32 = 0.015;

const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

/// Fixed damping amount (0 bright, 1 dark)
const DAMPING: f32 = 0.5;

// ============================================================================
// Filter Components
// ============================================================================

/// Low-pass feedback comb filter
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    mask: usize,
    filter_state: f32,
    feedback: f32,
    damp1: f32,
    damp2: f32,
}

impl CombFilter {
    fn new(delay_size: usize) -> Self {
        // Power of two for mask wrapping
        let size = delay_size.next_power_of_two();
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            mask: size - 1,
            filter_state: 0.0,
            feedback: 0.5,
            damp1: 0.5,
            damp2: 0.5,
        }
    }

    fn set_coefficients(&mut self, feedback: f32, damp1: f32, damp2: f32) {
        self.feedback = feedback;
        self.damp1 = damp1;
        self.damp2 = damp2;
    }

    #[inline]
    fn process(&mut self, input: f32, delay: usize) -> f32 {
        let read_pos = (self.write_pos + self.mask + 1 - delay) & self.mask;
        let output = self.buffer[read_pos];

        self.filter_state = output * self.damp1 + self.filter_state * self.damp2;
        self.buffer[self.write_pos] = input + self.filter_state * self.feedback;
        self.write_pos = (self.write_pos + 1) & self.mask;

        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.write_pos = 0;
    }
}

/// Schroeder allpass for diffusion
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    mask: usize,
}

impl AllpassFilter {
    fn new(delay_size: usize) -> Self {
        let size = delay_size.next_power_of_two();
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            mask: size - 1,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, delay: usize) -> f32 {
        let read_pos = (self.write_pos + self.mask + 1 - delay) & self.mask;
        let delayed = self.buffer[read_pos];

        let output = delayed - ALLPASS_GAIN * input;
        self.buffer[self.write_pos] = input + ALLPASS_GAIN * output;
        self.write_pos = (self.write_pos + 1) & self.mask;

        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Comb and allpass bank for one channel
#[derive(Debug, Clone)]
struct ChannelTank {
    combs: [CombFilter; 8],
    allpasses: [AllpassFilter; 4],
    comb_delays: [usize; 8],
    allpass_delays: [usize; 4],
}

impl ChannelTank {
    fn new(sample_rate: u32, spread: usize) -> Self {
        let scale = sample_rate as f64 / REFERENCE_SAMPLE_RATE;
        let scaled = |d: usize| (((d + spread) as f64 * scale) as usize).max(1);

        let comb_delays: [usize; 8] = std::array::from_fn(|i| scaled(COMB_DELAYS[i]));
        let allpass_delays: [usize; 4] = std::array::from_fn(|i| scaled(ALLPASS_DELAYS[i]));

        Self {
            combs: std::array::from_fn(|i| CombFilter::new((comb_delays[i] + 1).max(16))),
            allpasses: std::array::from_fn(|i| AllpassFilter::new((allpass_delays[i] + 1).max(16))),
            comb_delays,
            allpass_delays,
        }
    }

    fn set_coefficients(&mut self, feedback: f32, damp1: f32, damp2: f32) {
        for comb in &mut self.combs {
            comb.set_coefficients(feedback, damp1, damp2);
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut sum = 0.0;
        for (comb, &delay) in self.combs.iter_mut().zip(&self.comb_delays) {
            sum += comb.process(input, delay);
        }
        let mut output = sum;
        for (allpass, &delay) in self.allpasses.iter_mut().zip(&self.allpass_delays) {
            output = allpass.process(output, delay);
        }
        output
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
    }
}

// ============================================================================
// Reverb Stage
// ============================================================================

/// Freeverb with `wet` and `room_size` parameters (both 0..1)
#[derive(Debug, Clone)]
pub struct Reverb {
    wet: f32,
    room_size: f32,
    sample_rate: u32,
    left: ChannelTank,
    right: ChannelTank,
}

impl Reverb {
    pub fn new(wet: f32, room_size: f32, sample_rate: u32) -> Result<Self> {
        let wet = finite("reverb.wet", wet)?.clamp(0.0, 1.0);
        let room_size = finite("reverb.room_size", room_size)?.clamp(0.0, 1.0);
        let mut reverb = Self {
            wet,
            room_size,
            sample_rate,
            left: ChannelTank::new(sample_rate, 0),
            right: ChannelTank::new(sample_rate, STEREO_SPREAD),
        };
        reverb.update_coefficients();
        Ok(reverb)
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    pub fn room_size(&self) -> f32 {
        self.room_size
    }

    fn update_coefficients(&mut self) {
        let feedback = self.room_size * ROOM_SCALE + ROOM_OFFSET;
        let damp1 = 1.0 - DAMPING * DAMP_SCALE;
        let damp2 = DAMPING * DAMP_SCALE;
        self.left.set_coefficients(feedback, damp1, damp2);
        self.right.set_coefficients(feedback, damp1, damp2);
    }
}

impl ProcessingStage for Reverb {
    fn kind(&self) -> StageKind {
        StageKind::Reverb
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "wet" => self.wet = finite("reverb.wet", value)?.clamp(0.0, 1.0),
            "room_size" => {
                self.room_size = finite("reverb.room_size", value)?.clamp(0.0, 1.0);
                self.update_coefficients();
            }
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        Ok(())
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.left = ChannelTank::new(sample_rate, 0);
            self.right = ChannelTank::new(sample_rate, STEREO_SPREAD);
            self.update_coefficients();
        }
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        let wet = self.wet;
        if buffer.channels() == 1 {
            for sample in buffer.channel_mut(0).iter_mut() {
                let tail = self.left.process(*sample * FIXED_GAIN);
                *sample = mix(*sample, tail, wet);
            }
            return;
        }

        for i in 0..buffer.len() {
            let input_left = buffer.samples[0][i];
            let input_right = buffer.samples[1][i];
            let input = (input_left + input_right) * 0.5 * FIXED_GAIN;

            let tail_left = self.left.process(input);
            let tail_right = self.right.process(input);

            buffer.samples[0][i] = mix(input_left, tail_left, wet);
            buffer.samples[1][i] = mix(input_right, tail_right, wet);
        }
    }

    fn reset(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;

    fn impulse(len: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(len, ChannelLayout::Stereo, 44100);
        buffer.samples[0][0] = 1.0;
        buffer.samples[1][0] = 1.0;
        buffer
    }

    #[test]
    fn test_reverb_produces_tail() {
        let mut reverb = Reverb::new(1.0, 0.8, 44100).unwrap();
        let mut buffer = impulse(8192);
        reverb.process(&mut buffer);

        let tail_energy: f32 = buffer.channel(0)[2000..].iter().map(|s| s * s).sum();
        assert!(tail_energy > 0.0);
        assert!(buffer.is_finite());
    }

    #[test]
    fn test_reverb_dry_at_zero_wet() {
        let mut reverb = Reverb::new(0.0, 0.5, 44100).unwrap();
        let mut buffer = impulse(1024);
        let original = buffer.clone();
        reverb.process(&mut buffer);
        assert_eq!(buffer, original);
    }

    #[test]
    fn test_reverb_reset_clears_tail() {
        let mut reverb = Reverb::new(1.0, 0.9, 44100).unwrap();
        let mut buffer = impulse(4096);
        reverb.process(&mut buffer);
        reverb.reset();

        let mut silence = AudioBuffer::new(4096, ChannelLayout::Stereo, 44100);
        reverb.process(&mut silence);
        assert!(silence.samples.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn test_reverb_parameters() {
        let mut reverb = Reverb::new(0.2, 0.27, 44100).unwrap();
        reverb.set_parameter("wet", 0.6).unwrap();
        reverb.set_parameter("room_size", 2.0).unwrap();
        assert_eq!(reverb.wet(), 0.6);
        assert_eq!(reverb.room_size(), 1.0);
        assert!(reverb.set_parameter("decay", 1.0).is_err());
        assert!(Reverb::new(f32::NAN, 0.5, 44100).is_err());
    }
}
