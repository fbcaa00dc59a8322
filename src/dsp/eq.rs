//! Biquad filter stages
//!
//! The `bass` parameter drives a low shelf; `highpass` and `lowpass` drive
//! the matching pass filters. All three share one biquad implementation.

use std::f64::consts::PI;

use super::stage::{finite, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

/// Corner frequency of the bass shelf
pub const BASS_SHELF_HZ: f32 = 400.0;

/// Butterworth Q for the pass filters and the shelf slope
const DEFAULT_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowShelf,
    LowPass,
    HighPass,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Audio EQ Cookbook formulas
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    fn calculate(filter_type: FilterType, sample_rate: f64, frequency: f64, gain_db: f64) -> Self {
        // Keep below Nyquist
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * DEFAULT_Q);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::LowShelf => {
                let a = 10.0_f64.powf(gain_db / 40.0);
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// Single biquad stage
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    filter_type: FilterType,
    frequency: f32,
    gain_db: f32,
    sample_rate: u32,
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
}

impl BiquadFilter {
    fn new(filter_type: FilterType, frequency: f32, gain_db: f32, sample_rate: u32) -> Self {
        let mut filter = Self {
            filter_type,
            frequency,
            gain_db,
            sample_rate,
            coeffs: BiquadCoeffs::default(),
            states: Vec::new(),
        };
        filter.update_coefficients();
        filter
    }

    /// Bass shelf at `BASS_SHELF_HZ`
    pub fn low_shelf(gain_db: f32, sample_rate: u32) -> Result<Self> {
        let gain_db = finite("bass", gain_db)?;
        Ok(Self::new(FilterType::LowShelf, BASS_SHELF_HZ, gain_db, sample_rate))
    }

    pub fn high_pass(cutoff_hz: f32, sample_rate: u32) -> Result<Self> {
        let cutoff_hz = finite("highpass", cutoff_hz)?;
        Ok(Self::new(FilterType::HighPass, cutoff_hz, 0.0, sample_rate))
    }

    pub fn low_pass(cutoff_hz: f32, sample_rate: u32) -> Result<Self> {
        let cutoff_hz = finite("lowpass", cutoff_hz)?;
        Ok(Self::new(FilterType::LowPass, cutoff_hz, 0.0, sample_rate))
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    fn update_coefficients(&mut self) {
        self.coeffs = BiquadCoeffs::calculate(
            self.filter_type,
            self.sample_rate as f64,
            self.frequency as f64,
            self.gain_db as f64,
        );
    }
}

impl ProcessingStage for BiquadFilter {
    fn kind(&self) -> StageKind {
        match self.filter_type {
            FilterType::LowShelf => StageKind::LowShelf,
            FilterType::LowPass => StageKind::Lowpass,
            FilterType::HighPass => StageKind::Highpass,
        }
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match (self.filter_type, name) {
            (FilterType::LowShelf, "gain_db") => self.gain_db = finite("bass", value)?,
            (FilterType::LowPass | FilterType::HighPass, "frequency") => {
                self.frequency = finite("frequency", value)?
            }
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        self.update_coefficients();
        Ok(())
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.states.len() != buffer.channels() {
            self.states.resize(buffer.channels(), BiquadState::default());
        }
        let coeffs = self.coeffs;
        for (channel, state) in buffer.samples.iter_mut().zip(self.states.iter_mut()) {
            for sample in channel.iter_mut() {
                *sample = state.process(*sample as f64, &coeffs) as f32;
            }
        }
    }

    fn reset(&mut self) {
        self.states.iter_mut().for_each(|s| *s = BiquadState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f64, sample_rate: u32, seconds: f64) -> AudioBuffer {
        let n = (sample_rate as f64 * seconds) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin() as f32 * 0.5)
            .collect();
        AudioBuffer {
            samples: vec![samples.clone(), samples],
            sample_rate,
        }
    }

    /// RMS of the second half, after the filter has settled
    fn settled_rms(buffer: &AudioBuffer) -> f64 {
        let ch = buffer.channel(0);
        let tail = &ch[ch.len() / 2..];
        (tail.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / tail.len() as f64).sqrt()
    }

    #[test]
    fn test_high_pass_attenuates_lows() {
        let mut filter = BiquadFilter::high_pass(1000.0, 44100).unwrap();
        let mut buffer = sine(50.0, 44100, 0.5);
        let before = settled_rms(&buffer);
        filter.process(&mut buffer);
        assert!(settled_rms(&buffer) < before * 0.1);
    }

    #[test]
    fn test_low_pass_attenuates_highs() {
        let mut filter = BiquadFilter::low_pass(1000.0, 44100).unwrap();
        let mut buffer = sine(10000.0, 44100, 0.5);
        let before = settled_rms(&buffer);
        filter.process(&mut buffer);
        assert!(settled_rms(&buffer) < before * 0.1);
    }

    #[test]
    fn test_low_shelf_boost() {
        let mut filter = BiquadFilter::low_shelf(12.0, 44100).unwrap();
        let mut buffer = sine(60.0, 44100, 0.5);
        let before = settled_rms(&buffer);
        filter.process(&mut buffer);
        // +12dB is ~4x in amplitude well below the corner
        assert!(settled_rms(&buffer) > before * 3.0);
    }

    #[test]
    fn test_kinds_and_parameters() {
        let mut shelf = BiquadFilter::low_shelf(3.0, 44100).unwrap();
        assert_eq!(shelf.kind(), StageKind::LowShelf);
        shelf.set_parameter("gain_db", -6.0).unwrap();
        assert_eq!(shelf.gain_db(), -6.0);
        assert!(shelf.set_parameter("frequency", 100.0).is_err());

        let mut lp = BiquadFilter::low_pass(5000.0, 44100).unwrap();
        assert_eq!(lp.kind(), StageKind::Lowpass);
        lp.set_parameter("frequency", 2000.0).unwrap();
        assert_eq!(lp.frequency(), 2000.0);
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(BiquadFilter::high_pass(f32::NAN, 44100).is_err());
        assert!(BiquadFilter::low_shelf(f32::INFINITY, 44100).is_err());
    }
}
