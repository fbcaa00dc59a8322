//! Distortion stage
//!
//! Static waveshaper driven by the `distortion` parameter. The dry/wet mix
//! is tied to the amount (`wet = amount * 0.8`) so a light setting only
//! adds a little grit.

use std::f32::consts::PI;

use super::stage::{finite, mix, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

// ============================================================================
// Waveshaping
// ============================================================================

/// Soft-knee sigmoid curve
///
/// `k = amount * 100`; larger `k` pushes the knee toward hard clipping.
/// Inputs within 0.001 of zero map to zero.
#[inline]
pub fn waveshape(x: f32, amount: f32) -> f32 {
    let k = amount * 100.0;
    let deg = PI / 180.0;
    if x.abs() < 0.001 {
        return 0.0;
    }
    (3.0 + k) * x * 20.0 * deg / (PI + k * x.abs())
}

// ============================================================================
// Distortion
// ============================================================================

/// Parameters: `amount` (0..1), `wet` (0..1)
#[derive(Debug, Clone)]
pub struct Distortion {
    amount: f32,
    wet: f32,
}

impl Distortion {
    pub fn new(amount: f32, wet: f32) -> Result<Self> {
        Ok(Self {
            amount: finite("distortion.amount", amount)?.clamp(0.0, 1.0),
            wet: finite("distortion.wet", wet)?.clamp(0.0, 1.0),
        })
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }
}

impl ProcessingStage for Distortion {
    fn kind(&self) -> StageKind {
        StageKind::Distortion
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "amount" => self.amount = finite("distortion.amount", value)?.clamp(0.0, 1.0),
            "wet" => self.wet = finite("distortion.wet", value)?.clamp(0.0, 1.0),
            _ => return Err(unknown_parameter(self.kind(), name, value)),
        }
        Ok(())
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

    fn process(&mut self, buffer: &mut AudioBuffer) {
        let (amount, wet) = (self.amount, self.wet);
        for channel in &mut buffer.samples {
            for sample in channel.iter_mut() {
                *sample = mix(*sample, waveshape(*sample, amount), wet);
            }
        }
    }

    fn reset(&mut self) {}
}

// ============================================================================
// Tests
// ============================================================================
