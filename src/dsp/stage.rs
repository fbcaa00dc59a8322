//! Processing stage trait
//!
//! Every node in the live graph that transforms audio implements
//! `ProcessingStage`. Wiring (connect/disconnect) belongs to the graph, not
//! to the stage.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::buffer::AudioBuffer;
use crate::error::{DisposeError, MixdeckError, Result};

/// Identifies what a stage does
///
/// Two chains with equal kind sequences can be updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Gain,
    Pan,
    PitchShift,
    Reverb,
    Delay,
    LowShelf,
    Distortion,
    Volume,
    Tremolo,
    Vibrato,
    Highpass,
    Lowpass,
    Chorus,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Gain => "gain",
            StageKind::Pan => "pan",
            StageKind::PitchShift => "pitch_shift",
            StageKind::Reverb => "reverb",
            StageKind::Delay => "delay",
            StageKind::LowShelf => "low_shelf",
            StageKind::Distortion => "distortion",
            StageKind::Volume => "volume",
            StageKind::Tremolo => "tremolo",
            StageKind::Vibrato => "vibrato",
            StageKind::Highpass => "highpass",
            StageKind::Lowpass => "lowpass",
            StageKind::Chorus => "chorus",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node that processes a block of audio in place
pub trait ProcessingStage: Send {
    fn kind(&self) -> StageKind;

    /// Set a single named parameter without rebuilding the stage
    fn set_parameter(&mut self, name: &str, value: f32) -> Result<()>;

    /// Called when the sample rate or block size changes
    fn prepare(&mut self, sample_rate: u32, max_block_size: usize);

    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Clear delay lines, filter history and LFO phase
    fn reset(&mut self);

    /// Release the stage's resources
    ///
    /// Stages without external resources just drop their state.
    fn dispose(&mut self) -> std::result::Result<(), DisposeError> {
        self.reset();
        Ok(())
    }
}

/// Reject non-finite parameter values
pub(crate) fn finite(param: &str, value: f32) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MixdeckError::InvalidParameter {
            param: param.to_string(),
            value: value.to_string(),
            expected: "a finite number".to_string(),
        })
    }
}

/// Error for a parameter name the stage does not expose
pub(crate) fn unknown_parameter(kind: StageKind, name: &str, value: f32) -> MixdeckError {
    MixdeckError::InvalidParameter {
        param: format!("{}.{}", kind, name),
        value: value.to_string(),
        expected: "a parameter exposed by this stage".to_string(),
    }
}

/// Linear crossfade between the dry input and the processed signal
#[inline]
pub(crate) fn mix(dry: f32, wet_signal: f32, wet: f32) -> f32 {
    dry * (1.0 - wet) + wet_signal * wet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_rejects_nan() {
        assert!(finite("reverb", f32::NAN).is_err());
        assert!(finite("reverb", f32::INFINITY).is_err());
        assert_eq!(finite("reverb", 0.5).unwrap(), 0.5);
    }

    #[test]
    fn test_mix_endpoints() {
        assert_eq!(mix(1.0, 0.0, 0.0), 1.0);
        assert_eq!(mix(1.0, 0.0, 1.0), 0.0);
        assert_eq!(mix(1.0, 0.0, 0.25), 0.75);
    }
}
