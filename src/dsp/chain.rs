//! Effect chain construction
//!
//! Turns a track's (or the master bus') effect parameters into an ordered
//! list of stage descriptors, then into live stages. Chain order is fixed:
//!
//! 1. Pitch shift
//! 2. Reverb
//! 3. Delay
//! 4. Bass (low shelf)
//! 5. Distortion
//! 6. Volume
//! 7. Tremolo
//! 8. Vibrato
//! 9. Highpass
//! 10. Lowpass
//! 11. Chorus
//!
//! Pan is never part of the chain; every bus ends in its own panner.

use tracing::warn;

use super::delay::FeedbackDelay;
use super::eq::BiquadFilter;
use super::gain::Volume;
use super::modulation::{modulation_rate_hz, Chorus, Tremolo, Vibrato};
use super::pitch::PitchShift;
use super::reverb::Reverb;
use super::saturation::Distortion;
use super::stage::{ProcessingStage, StageKind};
use crate::error::Result;
use crate::timeline::{is_enabled, EffectParam, EffectParameters, EnabledEffects};

/// Parameters in chain order
pub const CHAIN_ORDER: [EffectParam; 11] = [
    EffectParam::Pitch,
    EffectParam::Reverb,
    EffectParam::Delay,
    EffectParam::Bass,
    EffectParam::Distortion,
    EffectParam::Volume,
    EffectParam::Tremolo,
    EffectParam::Vibrato,
    EffectParam::Highpass,
    EffectParam::Lowpass,
    EffectParam::Chorus,
];

/// Descriptor for one stage, with values already mapped from the UI range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectSpec {
    PitchShift { semitones: f32 },
    Reverb { wet: f32, room_size: f32 },
    Delay { wet: f32, feedback: f32 },
    Bass { gain_db: f32 },
    Distortion { amount: f32, wet: f32 },
    Volume { gain: f32 },
    Tremolo { rate_hz: f32, depth: f32 },
    Vibrato { rate_hz: f32, depth: f32 },
    Highpass { cutoff_hz: f32 },
    Lowpass { cutoff_hz: f32 },
    Chorus { wet: f32 },
}

impl EffectSpec {
    /// Map one effect parameter value to its stage descriptor
    ///
    /// Returns `None` for `pan`, which is handled by the bus panner.
    pub fn from_param(param: EffectParam, value: f32) -> Option<Self> {
        let value = param.clamp(value);
        let spec = match param {
            EffectParam::Pitch => EffectSpec::PitchShift { semitones: value },
            EffectParam::Volume => EffectSpec::Volume { gain: value / 100.0 },
            EffectParam::Reverb => {
                let wet = value / 100.0;
                EffectSpec::Reverb {
                    wet,
                    room_size: 0.1 + 0.85 * wet,
                }
            }
            EffectParam::Delay => {
                let wet = value / 100.0;
                EffectSpec::Delay {
                    wet,
                    feedback: 0.3 + 0.4 * wet,
                }
            }
            EffectParam::Bass => EffectSpec::Bass { gain_db: value },
            EffectParam::Distortion => {
                let amount = value / 100.0;
                EffectSpec::Distortion {
                    amount,
                    wet: amount * 0.8,
                }
            }
            EffectParam::Tremolo => {
                let depth = value / 100.0;
                EffectSpec::Tremolo {
                    rate_hz: modulation_rate_hz(depth),
                    depth,
                }
            }
            EffectParam::Vibrato => {
                let depth = value / 100.0;
                EffectSpec::Vibrato {
                    rate_hz: modulation_rate_hz(depth),
                    depth,
                }
            }
            EffectParam::Highpass => EffectSpec::Highpass { cutoff_hz: value },
            EffectParam::Lowpass => EffectSpec::Lowpass { cutoff_hz: value },
            EffectParam::Chorus => EffectSpec::Chorus {
                wet: value / 100.0,
            },
            EffectParam::Pan => return None,
        };
        Some(spec)
    }

    pub fn kind(&self) -> StageKind {
        match self {
            EffectSpec::PitchShift { .. } => StageKind::PitchShift,
            EffectSpec::Reverb { .. } => StageKind::Reverb,
            EffectSpec::Delay { .. } => StageKind::Delay,
            EffectSpec::Bass { .. } => StageKind::LowShelf,
            EffectSpec::Distortion { .. } => StageKind::Distortion,
            EffectSpec::Volume { .. } => StageKind::Volume,
            EffectSpec::Tremolo { .. } => StageKind::Tremolo,
            EffectSpec::Vibrato { .. } => StageKind::Vibrato,
            EffectSpec::Highpass { .. } => StageKind::Highpass,
            EffectSpec::Lowpass { .. } => StageKind::Lowpass,
            EffectSpec::Chorus { .. } => StageKind::Chorus,
        }
    }

    /// Named values, as accepted by `ProcessingStage::set_parameter`
    pub fn parameters(&self) -> Vec<(&'static str, f32)> {
        match *self {
            EffectSpec::PitchShift { semitones } => vec![("semitones", semitones)],
            EffectSpec::Reverb { wet, room_size } => vec![("wet", wet), ("room_size", room_size)],
            EffectSpec::Delay { wet, feedback } => vec![("wet", wet), ("feedback", feedback)],
            EffectSpec::Bass { gain_db } => vec![("gain_db", gain_db)],
            EffectSpec::Distortion { amount, wet } => vec![("amount", amount), ("wet", wet)],
            EffectSpec::Volume { gain } => vec![("gain", gain)],
            EffectSpec::Tremolo { rate_hz, depth } | EffectSpec::Vibrato { rate_hz, depth } => {
                vec![("rate", rate_hz), ("depth", depth)]
            }
            EffectSpec::Highpass { cutoff_hz } | EffectSpec::Lowpass { cutoff_hz } => {
                vec![("frequency", cutoff_hz)]
            }
            EffectSpec::Chorus { wet } => vec![("wet", wet)],
        }
    }

    /// Construct the live stage
    pub fn build(&self, sample_rate: u32) -> Result<Box<dyn ProcessingStage>> {
        Ok(match *self {
            EffectSpec::PitchShift { semitones } => Box::new(PitchShift::new(semitones, sample_rate)?),
            EffectSpec::Reverb { wet, room_size } => Box::new(Reverb::new(wet, room_size, sample_rate)?),
            EffectSpec::Delay { wet, feedback } => {
                Box::new(FeedbackDelay::new(wet, feedback, sample_rate)?)
            }
            EffectSpec::Bass { gain_db } => Box::new(BiquadFilter::low_shelf(gain_db, sample_rate)?),
            EffectSpec::Distortion { amount, wet } => Box::new(Distortion::new(amount, wet)?),
            EffectSpec::Volume { gain } => Box::new(Volume::new(gain)?),
            EffectSpec::Tremolo { rate_hz, depth } => {
                Box::new(Tremolo::new(rate_hz, depth, sample_rate)?)
            }
            EffectSpec::Vibrato { rate_hz, depth } => {
                Box::new(Vibrato::new(rate_hz, depth, sample_rate)?)
            }
            EffectSpec::Highpass { cutoff_hz } => {
                Box::new(BiquadFilter::high_pass(cutoff_hz, sample_rate)?)
            }
            EffectSpec::Lowpass { cutoff_hz } => Box::new(BiquadFilter::low_pass(cutoff_hz, sample_rate)?),
            EffectSpec::Chorus { wet } => Box::new(Chorus::new(wet, sample_rate)?),
        })
    }

    /// Push this spec's values into an existing stage of the same kind
    pub fn apply_to(&self, stage: &mut dyn ProcessingStage) -> Result<()> {
        for (name, value) in self.parameters() {
            stage.set_parameter(name, value)?;
        }
        Ok(())
    }
}

/// Stage descriptors for a parameter set, in chain order
///
/// A parameter is skipped when its flag is disabled or its value sits at
/// the default. Pan never appears.
pub fn effect_specs(params: &EffectParameters, enabled: &EnabledEffects) -> Vec<EffectSpec> {
    CHAIN_ORDER
        .iter()
        .filter(|&&param| is_enabled(enabled, param) && !params.is_default(param))
        .filter_map(|&param| EffectSpec::from_param(param, params.get(param)))
        .collect()
}

/// Result of building a chain
pub struct BuiltChain {
    pub stages: Vec<Box<dyn ProcessingStage>>,
    /// Kinds that failed to construct and were left out
    pub skipped: Vec<StageKind>,
}

impl BuiltChain {
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }
}

/// Construct every stage; failures are logged and omitted
pub fn build_chain(specs: &[EffectSpec], sample_rate: u32, max_block_size: usize) -> BuiltChain {
    let mut stages = Vec::with_capacity(specs.len());
    let mut skipped = Vec::new();

    for spec in specs {
        match spec.build(sample_rate) {
            Ok(mut stage) => {
                stage.prepare(sample_rate, max_block_size);
                stages.push(stage);
            }
            Err(e) => {
                warn!(stage = %spec.kind(), error = %e, "skipping effect stage that failed to build");
                skipped.push(spec.kind());
            }
        }
    }

    BuiltChain { stages, skipped }
}
