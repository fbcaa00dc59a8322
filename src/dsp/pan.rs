//! Stereo panner at the tail of every bus

use super::stage::{finite, unknown_parameter, ProcessingStage, StageKind};
use crate::engine::buffer::AudioBuffer;
use crate::error::Result;

/// Left/right channel factors for a pan position in `-1..=1`
///
/// Linear law: the far side is attenuated, the near side stays at unity.
/// The offline mixdown uses the same law, so live and exported mixes agree.
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let left = if pan <= 0.0 { 1.0 } else { 1.0 - pan };
    let right = if pan >= 0.0 { 1.0 } else { 1.0 + pan };
    (left, right)
}

/// Parameter: `pan` (-1 left .. 1 right)
#[derive(Debug, Clone, Default)]
pub struct Panner {
    pan: f32,
}

impl Panner {
    pub fn new(pan: f32) -> Result<Self> {
        Ok(Self {
            pan: finite("pan", pan)?.clamp(-1.0, 1.0),
        })
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn set_pan(&mut self, pan: f32) {
        if pan.is_finite() {
            self.pan = pan.clamp(-1.0, 1.0);
        }
    }
}

impl ProcessingStage for Panner {
    fn kind(&self) -> StageKind {
        StageKind::Pan
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "pan" => {
                self.pan = finite("pan", value)?.clamp(-1.0, 1.0);
                Ok(())
            }
            _ => Err(unknown_parameter(self.kind(), name, value)),
        }
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.pan == 0.0 || buffer.channels() < 2 {
            return;
        }
        let (left, right) = pan_gains(self.pan);
        buffer.channel_mut(0).iter_mut().for_each(|s| *s *= left);
        buffer.channel_mut(1).iter_mut().for_each(|s| *s *= right);
    }

    fn reset(&mut self) {}
}
