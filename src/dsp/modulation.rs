//! LFO-driven stages: tremolo, vibrato and chorus
//!
//! Vibrato and chorus read a delay line at a position swept by a sine LFO.
//! Tremolo sweeps the amplitude instead. Left and right LFOs run half a
//! cycle apart.

use std::f32::consts::TAU;

use super::stage::{finite, mix, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

/// Longest modulated delay any stage here uses
const MAX_DELAY_SECONDS: f32 = 0.05;

/// Phase offset of the right channel (half a cycle)
const STEREO_PHASE_OFFSET: f32 = 0.5;

/// Vibrato sweep centre
const VIBRATO_BASE_DELAY_MS: f32 = 2.5;

/// Chorus settings
const CHORUS_RATE_HZ: f32 = 1.5;
const CHORUS_BASE_DELAY_MS: f32 = 3.5;
const CHORUS_DEPTH: f32 = 0.7;

// ============================================================================
// Building Blocks
// ============================================================================

/// Sine LFO with phase in 0..1
#[derive(Debug, Clone, Copy)]
struct Lfo {
    phase: f32,
}

impl Lfo {
    fn new(phase: f32) -> Self {
        Self { phase }
    }

    /// Advance one sample and return the value in -1..1
    #[inline]
    fn next(&mut self, rate_hz: f32, sample_rate: f32) -> f32 {
        self.phase += rate_hz / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        (self.phase * TAU).sin()
    }
}

/// Delay line read at a fractional, LFO-swept position
#[derive(Debug, Clone)]
struct ModulatedDelay {
    delay_line: Vec<f32>,
    write_pos: usize,
    lfo: Lfo,
}

impl ModulatedDelay {
    fn new(sample_rate: u32, phase: f32) -> Self {
        let max_samples = ((MAX_DELAY_SECONDS * sample_rate as f32) as usize).max(4);
        Self {
            delay_line: vec![0.0; max_samples],
            write_pos: 0,
            lfo: Lfo::new(phase),
        }
    }

    /// Write `input` and return the swept, delayed sample
    #[inline]
    fn process(
        &mut self,
        input: f32,
        rate_hz: f32,
        depth: f32,
        base_delay_samples: f32,
        sample_rate: f32,
    ) -> f32 {
        let lfo = self.lfo.next(rate_hz, sample_rate);
        let max_delay = (self.delay_line.len() - 2) as f32;
        let delay_samples = (base_delay_samples + lfo * depth * base_delay_samples).clamp(1.0, max_delay);

        let delayed = self.read_interpolated(delay_samples);
        self.delay_line[self.write_pos] = input;
        self.write_pos = (self.write_pos + 1) % self.delay_line.len();
        delayed
    }

    #[inline]
    fn read_interpolated(&self, delay_samples: f32) -> f32 {
        let size = self.delay_line.len();
        let int_delay = delay_samples as usize;
        let frac = delay_samples - int_delay as f32;

        let read_pos_1 = (self.write_pos + size - int_delay) % size;
        let read_pos_2 = (read_pos_1 + size - 1) % size;

        let sample_1 = self.delay_line[read_pos_1];
        let sample_2 = self.delay_line[read_pos_2];
        sample_1 + frac * (sample_2 - sample_1)
    }

    fn clear(&mut self) {
        self.delay_line.fill(0.0);
        self.write_pos = 0;
    }
}

fn channel_phase(channel: usize) -> f32 {
    if channel % 2 == 1 {
        STEREO_PHASE_OFFSET
    } else {
        0.0
    }
}

/// LFO rate for tremolo and vibrato: `0.1 + depth * 19.9` Hz
pub fn modulation_rate_hz(depth: f32) -> f32 {
    0.1 + depth * 19.9
}

// ============================================================================
// Tremolo
// ============================================================================

/// Amplitude modulation
///
/// Parameters: `rate` (Hz), `depth` (0..1). Depth also sets the wet mix.
#[derive(Debug, Clone)]
pub struct Tremolo {
    rate_hz: f32,
    depth: f32,
    sample_rate: u32,
    lfos: Vec<Lfo>,
}

impl Tremolo {
    pub fn new(rate_hz: f32, depth: f32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            rate_hz: finite("tremolo.rate", rate_hz)?.max(0.0),
            depth: finite("tremolo.depth", depth)?.clamp(0.0, 1.0),
            sample_rate,
            lfos: Vec::new(),
        })
    }

    pub fn rate_hz(&self) -> f32 {
        self.rate_hz
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }
}

impl ProcessingStage for Tremolo {
    fn kind(&self) -> StageKind {
        StageKind::Tremolo
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "rate" => self.rate_hz = finite("tremolo.rate", value)?.max(0.0),
            "depth" => self.depth = finite("tremolo.depth", value)?.clamp(0.0, 1.0),
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        Ok(())
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate;
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.lfos.len() != buffer.channels() {
            self.lfos = (0..buffer.channels()).map(|c| Lfo::new(channel_phase(c))).collect();
        }
        let (rate, depth, sr) = (self.rate_hz, self.depth, self.sample_rate as f32);
        for (channel, lfo) in buffer.samples.iter_mut().zip(self.lfos.iter_mut()) {
            for sample in channel.iter_mut() {
                let level = 1.0 - depth * (0.5 + 0.5 * lfo.next(rate, sr));
                *sample = mix(*sample, *sample * level, depth);
            }
        }
    }

    fn reset(&mut self) {
        self.lfos.clear();
    }
}

// ============================================================================
// Vibrato
// ============================================================================

/// Pitch wobble through a swept delay
///
/// Parameters: `rate` (Hz), `depth` (0..1). Depth also sets the wet mix.
#[derive(Debug, Clone)]
pub struct Vibrato {
    rate_hz: f32,
    depth: f32,
    sample_rate: u32,
    voices: Vec<ModulatedDelay>,
}

impl Vibrato {
    pub fn new(rate_hz: f32, depth: f32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            rate_hz: finite("vibrato.rate", rate_hz)?.max(0.0),
            depth: finite("vibrato.depth", depth)?.clamp(0.0, 1.0),
            sample_rate,
            voices: Vec::new(),
        })
    }

    pub fn rate_hz(&self) -> f32 {
        self.rate_hz
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }
}

impl ProcessingStage for Vibrato {
    fn kind(&self) -> StageKind {
        StageKind::Vibrato
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "rate" => self.rate_hz = finite("vibrato.rate", value)?.max(0.0),
            "depth" => self.depth = finite("vibrato.depth", value)?.clamp(0.0, 1.0),
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        Ok(())
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.voices.clear();
        }
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.voices.len() != buffer.channels() {
            self.voices = (0..buffer.channels())
                .map(|c| ModulatedDelay::new(self.sample_rate, channel_phase(c)))
                .collect();
        }
        let sr = self.sample_rate as f32;
        let base = VIBRATO_BASE_DELAY_MS * 0.001 * sr;
        let (rate, depth) = (self.rate_hz, self.depth);
        for (channel, voice) in buffer.samples.iter_mut().zip(self.voices.iter_mut()) {
            for sample in channel.iter_mut() {
                let swept = voice.process(*sample, rate, depth, base, sr);
                *sample = mix(*sample, swept, depth);
            }
        }
    }

    fn reset(&mut self) {
        self.voices.iter_mut().for_each(ModulatedDelay::clear);
    }
}

// ============================================================================
// Chorus
// ============================================================================

/// One swept voice per channel, mixed with the dry signal
///
/// Parameter: `wet` (0..1).
#[derive(Debug, Clone)]
pub struct Chorus {
    wet: f32,
    sample_rate: u32,
    voices: Vec<ModulatedDelay>,
}

impl Chorus {
    pub fn new(wet: f32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            wet: finite("chorus.wet", wet)?.clamp(0.0, 1.0),
            sample_rate,
            voices: Vec::new(),
        })
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }
}

impl ProcessingStage for Chorus {
    fn kind(&self) -> StageKind {
        StageKind::Chorus
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "wet" => self.wet = finite("chorus.wet", value)?.clamp(0.0, 1.0),
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        Ok(())
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.voices.clear();
        }
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.voices.len() != buffer.channels() {
            self.voices = (0..buffer.channels())
                .map(|c| ModulatedDelay::new(self.sample_rate, channel_phase(c)))
                .collect();
        }
        let sr = self.sample_rate as f32;
        let base = CHORUS_BASE_DELAY_MS * 0.001 * sr;
        let wet = self.wet;
        for (channel, voice) in buffer.samples.iter_mut().zip(self.voices.iter_mut()) {
            for sample in channel.iter_mut() {
                let swept = voice.process(*sample, CHORUS_RATE_HZ, CHORUS_DEPTH, base, sr);
                *sample = mix(*sample, swept, wet);
            }
        }
    }

    fn reset(&mut self) {
        self.voices.iter_mut().for_each(ModulatedDelay::clear);
    }
}
