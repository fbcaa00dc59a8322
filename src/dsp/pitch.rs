//! Pitch shifting
//!
//! The live stage keeps tempo: two read heads sweep a short delay line at
//! the shifted rate and crossfade with sine windows. The offline render
//! changes playback rate instead, so pitch and length move together.

use std::f32::consts::PI;

use super::stage::{finite, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

/// Grain window of the live shifter
const WINDOW_SECONDS: f32 = 0.1;

/// Playback rate for a shift in semitones: `2^(s/12)`
#[inline]
pub fn semitones_to_rate(semitones: f32) -> f64 {
    2.0_f64.powf(semitones as f64 / 12.0)
}

/// Resample a buffer as if played back at `rate`
///
/// Output length is `floor(len / rate)`; samples are read with linear
/// interpolation.
pub fn resample_by_rate(buffer: &AudioBuffer, rate: f64) -> AudioBuffer {
    let out_len = (buffer.len() as f64 / rate).floor() as usize;
    let samples = buffer
        .samples
        .iter()
        .map(|channel| {
            (0..out_len)
                .map(|i| {
                    let pos = i as f64 * rate;
                    let index = pos.floor() as usize;
                    let frac = (pos - index as f64) as f32;
                    let a = channel.get(index).copied().unwrap_or(0.0);
                    let b = channel.get(index + 1).copied().unwrap_or(a);
                    a + frac * (b - a)
                })
                .collect()
        })
        .collect();

    AudioBuffer {
        samples,
        sample_rate: buffer.sample_rate,
    }
}

/// Per-channel delay line and window phase
#[derive(Debug, Clone)]
struct ShifterChannel {
    delay_line: Vec<f32>,
    write_pos: usize,
    phase: f32,
}

impl ShifterChannel {
    fn new(window_samples: usize) -> Self {
        Self {
            delay_line: vec![0.0; window_samples + 2],
            write_pos: 0,
            phase: 0.0,
        }
    }

    #[inline]
    fn read(&self, delay: f32) -> f32 {
        let size = self.delay_line.len();
        let int_delay = delay as usize;
        let frac = delay - int_delay as f32;
        let p1 = (self.write_pos + size - int_delay.min(size - 1)) % size;
        let p2 = (p1 + size - 1) % size;
        self.delay_line[p1] + frac * (self.delay_line[p2] - self.delay_line[p1])
    }
}

/// Tempo-preserving pitch shift
///
/// Parameter: `semitones` (-12..12).
#[derive(Debug, Clone)]
pub struct PitchShift {
    semitones: f32,
    sample_rate: u32,
    channels: Vec<ShifterChannel>,
}

impl PitchShift {
    pub fn new(semitones: f32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            semitones: finite("pitch", semitones)?.clamp(-12.0, 12.0),
            sample_rate,
            channels: Vec::new(),
        })
    }

    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    fn window_samples(&self) -> usize {
        ((WINDOW_SECONDS * self.sample_rate as f32) as usize).max(2)
    }
}

impl ProcessingStage for PitchShift {
    fn kind(&self) -> StageKind {
        StageKind::PitchShift
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "semitones" => self.semitones = finite("pitch", value)?.clamp(-12.0, 12.0),
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        Ok(())
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.channels.clear();
        }
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        let window = self.window_samples();
        if self.channels.len() != buffer.channels() {
            self.channels = vec![ShifterChannel::new(window); buffer.channels()];
        }

        let ratio = semitones_to_rate(self.semitones) as f32;
        // Delay shrinks when reading faster than writing
        let step = (1.0 - ratio) / window as f32;
        let window = window as f32;

        for (channel, state) in buffer.samples.iter_mut().zip(self.channels.iter_mut()) {
            let size = state.delay_line.len();
            for sample in channel.iter_mut() {
                state.delay_line[state.write_pos] = *sample;

                let phase_a = state.phase;
                let phase_b = (phase_a + 0.5).rem_euclid(1.0);
                let out = (PI * phase_a).sin() * state.read(phase_a * window)
                    + (PI * phase_b).sin() * state.read(phase_b * window);
                *sample = out;

                state.phase = (state.phase + step).rem_euclid(1.0);
                state.write_pos = (state.write_pos + 1) % size;
            }
        }
    }

    fn reset(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    fn ramp(len: usize) -> AudioBuffer {
        AudioBuffer {
            samples: vec![(0..len).map(|i| i as f32).collect()],
            sample_rate: 44100,
        }
    }

    #[test_case(12.0 => 2.0; "octave up")]
    #[test_case(-12.0 => 0.5; "octave down")]
    #[test_case(0.0 => 1.0; "unison")]
    fn test_semitones_to_rate(semitones: f32) -> f64 {
        semitones_to_rate(semitones)
    }

    #[test_case(1000, 12.0 => 500; "octave up halves length")]
    #[test_case(1000, -12.0 => 2000; "octave down doubles length")]
    #[test_case(1000, 7.0 => 667; "fifth up")]
    fn test_resample_length(len: usize, semitones: f32) -> usize {
        resample_by_rate(&ramp(len), semitones_to_rate(semitones)).len()
    }

    #[test]
    fn test_resample_interpolates() {
        let out = resample_by_rate(&ramp(10), 0.5);
        assert_relative_eq!(out.samples[0][1], 0.5);
        assert_relative_eq!(out.samples[0][4], 2.0);
        // Last sample holds the final input value
        assert_relative_eq!(out.samples[0][19], 9.0);
    }

    #[test]
    fn test_live_shifter_preserves_length_and_is_bounded() {
        let mut shifter = PitchShift::new(5.0, 44100).unwrap();
        let samples: Vec<f32> = (0..4410)
            .map(|i| (i as f32 * 2.0 * PI * 220.0 / 44100.0).sin() * 0.5)
            .collect();
        let mut buffer = AudioBuffer {
            samples: vec![samples],
            sample_rate: 44100,
        };
        shifter.process(&mut buffer);
        assert_eq!(buffer.len(), 4410);
        assert!(buffer.is_finite());
        // Two sine windows sum to at most sqrt(2)
        assert!(buffer.peak() <= 0.5 * 2.0_f32.sqrt() + 1e-3);
    }

    #[test]
    fn test_semitones_clamped() {
        let mut shifter = PitchShift::new(30.0, 44100).unwrap();
        assert_eq!(shifter.semitones(), 12.0);
        shifter.set_parameter("semitones", -3.0).unwrap();
        assert_eq!(shifter.semitones(), -3.0);
    }
}
