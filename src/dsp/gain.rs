//! Gain stages
//!
//! `BusGain` is the fader at the head of every bus; it moves between levels
//! with a short exponential ramp so mute/solo and fader changes never click.
//! `Volume` is the static gain stage produced by the `volume` parameter.

use super::stage::{finite, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Time constant of the bus gain ramp
pub const RAMP_TIME_CONSTANT_MS: f32 = 10.0;

/// Level used instead of zero for muted buses
///
/// An exponential approach never reaches zero, so muted targets stop here.
pub const MUTE_FLOOR: f32 = 1e-4;

/// Distance at which the ramp snaps onto its target
const SNAP_EPSILON: f32 = 1e-7;

// ============================================================================
// Gain Ramp
// ============================================================================

/// One-pole exponential approach toward a target level
#[derive(Debug, Clone)]
pub struct GainRamp {
    current: f32,
    target: f32,
    coefficient: f32,
    time_constant_ms: f32,
}

impl GainRamp {
    pub fn new(initial: f32, time_constant_ms: f32, sample_rate: u32) -> Self {
        Self {
            current: initial,
            target: initial,
            coefficient: Self::coefficient(time_constant_ms, sample_rate),
            time_constant_ms,
        }
    }

    /// factor = exp(-1 / (time_constant * sample_rate))
    fn coefficient(time_constant_ms: f32, sample_rate: u32) -> f32 {
        let samples = time_constant_ms * 0.001 * sample_rate as f32;
        if samples < 1.0 {
            return 0.0;
        }
        (-1.0 / samples).exp()
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.coefficient = Self::coefficient(self.time_constant_ms, sample_rate);
    }

    /// Cancel the running ramp, hold the current value and approach `target`
    pub fn ramp_to(&mut self, target: f32) {
        self.target = target;
    }

    /// Jump straight to a level
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let diff = self.current - self.target;
        if diff.abs() <= SNAP_EPSILON {
            self.current = self.target;
        } else {
            self.current = self.target + self.coefficient * diff;
        }
        self.current
    }
}

// ============================================================================
// Bus Gain
// ============================================================================

/// Fader at the head of a bus
///
/// Parameter: `gain` (linear).
#[derive(Debug, Clone)]
pub struct BusGain {
    ramp: GainRamp,
}

impl BusGain {
    pub fn new(initial: f32, sample_rate: u32) -> Self {
        Self {
            ramp: GainRamp::new(initial, RAMP_TIME_CONSTANT_MS, sample_rate),
        }
    }

    /// Level the ramp is heading to
    pub fn level(&self) -> f32 {
        self.ramp.target()
    }

    /// Level actually applied to the last sample
    pub fn current(&self) -> f32 {
        self.ramp.current()
    }

    pub fn ramp_to(&mut self, target: f32) {
        self.ramp.ramp_to(target);
    }

    pub fn set_immediate(&mut self, value: f32) {
        self.ramp.set_immediate(value);
    }
}

impl ProcessingStage for BusGain {
    fn kind(&self) -> StageKind {
        StageKind::Gain
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "gain" => {
                self.ramp_to(finite("gain", value)?.max(0.0));
                Ok(())
            }
            _ => Err(unknown_parameter(self.kind(), name, value)),
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.ramp.set_sample_rate(sample_rate);
    }

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.ramp.is_settled() {
            let level = self.ramp.current();
            if (level - 1.0).abs() > f32::EPSILON {
                buffer.scale(level);
            }
            return;
        }

        // Per-frame ramp, same level on every channel
        for i in 0..buffer.len() {
            let level = self.ramp.next();
            for channel in &mut buffer.samples {
                channel[i] *= level;
            }
        }
    }

    fn reset(&mut self) {
        let target = self.ramp.target();
        self.ramp.set_immediate(target);
    }
}

// ============================================================================
// Volume
// ============================================================================

/// Static linear gain from the `volume` parameter (value / 100)
#[derive(Debug, Clone)]
pub struct Volume {
    gain: f32,
}

impl Volume {
    pub fn new(gain: f32) -> Result<Self> {
        Ok(Self {
            gain: finite("volume", gain)?.max(0.0),
        })
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl ProcessingStage for Volume {
    fn kind(&self) -> StageKind {
        StageKind::Volume
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "gain" => {
                self.gain = finite("volume", value)?.max(0.0);
                Ok(())
            }
            _ => Err(unknown_parameter(self.kind(), name, value)),
        }
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

    fn process(&mut self, buffer: &mut AudioBuffer) {
        // Unity gain optimization
        if (self.gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        buffer.scale(self.gain);
    }

    fn reset(&mut self) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;
    use approx::assert_relative_eq;

    fn ones(num_samples: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(num_samples, ChannelLayout::Stereo, 44100);
        for channel in &mut buffer.samples {
            channel.iter_mut().for_each(|s| *s = 1.0);
        }
        buffer
    }

    #[test]
    fn test_ramp_reaches_63_percent_after_one_time_constant() {
        let mut ramp = GainRamp::new(0.0, 10.0, 44100);
        ramp.ramp_to(1.0);
        // 10ms at 44.1kHz
        for _ in 0..441 {
            ramp.next();
        }
        assert_relative_eq!(ramp.current(), 1.0 - (-1.0_f32).exp(), epsilon = 0.01);
    }

    #[test]
    fn test_ramp_cancel_and_hold() {
        let mut ramp = GainRamp::new(1.0, 10.0, 44100);
        ramp.ramp_to(0.0);
        for _ in 0..100 {
            ramp.next();
        }
        let held = ramp.current();
        assert!(held < 1.0 && held > 0.0);

        // A new target starts from the held value, not from the old target
        ramp.ramp_to(1.0);
        let next = ramp.next();
        assert!(next > held && next < 1.0);
    }

    #[test]
    fn test_ramp_settles_exactly() {
        let mut ramp = GainRamp::new(1.0, 10.0, 44100);
        ramp.ramp_to(MUTE_FLOOR);
        for _ in 0..44100 {
            ramp.next();
        }
        assert!(ramp.is_settled());
        assert_eq!(ramp.current(), MUTE_FLOOR);
    }

    #[test]
    fn test_bus_gain_settled_scales_block() {
        let mut gain = BusGain::new(0.5, 44100);
        let mut buffer = ones(64);
        gain.process(&mut buffer);
        assert!(buffer.samples.iter().flatten().all(|&s| s == 0.5));
    }

    #[test]
    fn test_bus_gain_ramp_is_monotonic() {
        let mut gain = BusGain::new(1.0, 44100);
        gain.set_parameter("gain", 0.0).unwrap();
        let mut buffer = ones(512);
        gain.process(&mut buffer);

        let left = buffer.channel(0);
        assert!(left.windows(2).all(|w| w[1] <= w[0]));
        assert!(left[0] < 1.0);
        assert_eq!(buffer.channel(0), buffer.channel(1));
    }

    #[test]
    fn test_bus_gain_rejects_unknown_parameter() {
        let mut gain = BusGain::new(1.0, 44100);
        assert!(gain.set_parameter("pan", 0.2).is_err());
        assert!(gain.set_parameter("gain", f32::NAN).is_err());
    }

    #[test]
    fn test_volume() {
        let mut volume = Volume::new(1.5).unwrap();
        let mut buffer = ones(8);
        volume.process(&mut buffer);
        assert!(buffer.samples.iter().flatten().all(|&s| s == 1.5));

        volume.set_parameter("gain", 0.25).unwrap();
        assert_eq!(volume.gain(), 0.25);
        assert!(Volume::new(f32::NAN).is_err());
    }
}
