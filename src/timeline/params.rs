//! Effect parameter table
//!
//! Every track and the master bus carry the same fixed set of named
//! parameters. The default of each parameter is its no-op value; a parameter
//! at its default never produces a processing stage.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::MixdeckError;

/// Tolerance used when comparing a value against its default
pub const DEFAULT_TOLERANCE: f32 = 0.01;

/// Per-effect enable flags, keyed by effect name
///
/// A missing entry means enabled.
pub type EnabledEffects = HashMap<String, bool>;

/// Names of every effect parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectParam {
    Pitch,
    Volume,
    Reverb,
    Delay,
    Bass,
    Distortion,
    Pan,
    Tremolo,
    Vibrato,
    Highpass,
    Lowpass,
    Chorus,
}

impl EffectParam {
    /// All parameters, in table order
    pub const ALL: [EffectParam; 12] = [
        EffectParam::Pitch,
        EffectParam::Volume,
        EffectParam::Reverb,
        EffectParam::Delay,
        EffectParam::Bass,
        EffectParam::Distortion,
        EffectParam::Pan,
        EffectParam::Tremolo,
        EffectParam::Vibrato,
        EffectParam::Highpass,
        EffectParam::Lowpass,
        EffectParam::Chorus,
    ];

    /// Wire name of the parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pitch => "pitch",
            Self::Volume => "volume",
            Self::Reverb => "reverb",
            Self::Delay => "delay",
            Self::Bass => "bass",
            Self::Distortion => "distortion",
            Self::Pan => "pan",
            Self::Tremolo => "tremolo",
            Self::Vibrato => "vibrato",
            Self::Highpass => "highpass",
            Self::Lowpass => "lowpass",
            Self::Chorus => "chorus",
        }
    }

    /// Valid (min, max) range
    pub fn range(&self) -> (f32, f32) {
        match self {
            Self::Pitch => (-12.0, 12.0),
            Self::Volume => (0.0, 200.0),
            Self::Bass => (-12.0, 12.0),
            Self::Pan => (-100.0, 100.0),
            Self::Highpass => (20.0, 2000.0),
            Self::Lowpass => (1000.0, 20000.0),
            Self::Reverb
            | Self::Delay
            | Self::Distortion
            | Self::Tremolo
            | Self::Vibrato
            | Self::Chorus => (0.0, 100.0),
        }
    }

    /// The no-op value
    pub fn default_value(&self) -> f32 {
        match self {
            Self::Volume => 100.0,
            Self::Highpass => 20.0,
            Self::Lowpass => 20000.0,
            _ => 0.0,
        }
    }

    /// Clamp a value into the valid range
    pub fn clamp(&self, value: f32) -> f32 {
        let (min, max) = self.range();
        value.clamp(min, max)
    }
}

impl FromStr for EffectParam {
    type Err = MixdeckError;

    /// Case-insensitive lookup by parameter name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MixdeckError::InvalidParameter {
                param: "effect".to_string(),
                value: s.to_string(),
                expected: "a known effect name".to_string(),
            })
    }
}

impl fmt::Display for EffectParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full set of effect parameters for one track or the master bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParameters {
    pub pitch: f32,
    pub volume: f32,
    pub reverb: f32,
    pub delay: f32,
    pub bass: f32,
    pub distortion: f32,
    pub pan: f32,
    pub tremolo: f32,
    pub vibrato: f32,
    pub highpass: f32,
    pub lowpass: f32,
    pub chorus: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            pitch: EffectParam::Pitch.default_value(),
            volume: EffectParam::Volume.default_value(),
            reverb: EffectParam::Reverb.default_value(),
            delay: EffectParam::Delay.default_value(),
            bass: EffectParam::Bass.default_value(),
            distortion: EffectParam::Distortion.default_value(),
            pan: EffectParam::Pan.default_value(),
            tremolo: EffectParam::Tremolo.default_value(),
            vibrato: EffectParam::Vibrato.default_value(),
            highpass: EffectParam::Highpass.default_value(),
            lowpass: EffectParam::Lowpass.default_value(),
            chorus: EffectParam::Chorus.default_value(),
        }
    }
}

impl EffectParameters {
    pub fn get(&self, param: EffectParam) -> f32 {
        match param {
            EffectParam::Pitch => self.pitch,
            EffectParam::Volume => self.volume,
            EffectParam::Reverb => self.reverb,
            EffectParam::Delay => self.delay,
            EffectParam::Bass => self.bass,
            EffectParam::Distortion => self.distortion,
            EffectParam::Pan => self.pan,
            EffectParam::Tremolo => self.tremolo,
            EffectParam::Vibrato => self.vibrato,
            EffectParam::Highpass => self.highpass,
            EffectParam::Lowpass => self.lowpass,
            EffectParam::Chorus => self.chorus,
        }
    }

    pub fn set(&mut self, param: EffectParam, value: f32) {
        let slot = match param {
            EffectParam::Pitch => &mut self.pitch,
            EffectParam::Volume => &mut self.volume,
            EffectParam::Reverb => &mut self.reverb,
            EffectParam::Delay => &mut self.delay,
            EffectParam::Bass => &mut self.bass,
            EffectParam::Distortion => &mut self.distortion,
            EffectParam::Pan => &mut self.pan,
            EffectParam::Tremolo => &mut self.tremolo,
            EffectParam::Vibrato => &mut self.vibrato,
            EffectParam::Highpass => &mut self.highpass,
            EffectParam::Lowpass => &mut self.lowpass,
            EffectParam::Chorus => &mut self.chorus,
        };
        *slot = value;
    }

    /// Builder-style setter
    pub fn with(mut self, param: EffectParam, value: f32) -> Self {
        self.set(param, value);
        self
    }

    /// True when the parameter sits at its no-op value
    pub fn is_default(&self, param: EffectParam) -> bool {
        (self.get(param) - param.default_value()).abs() <= DEFAULT_TOLERANCE
    }

    /// True when every parameter sits at its no-op value
    pub fn is_all_default(&self) -> bool {
        EffectParam::ALL.iter().all(|p| self.is_default(*p))
    }

    /// Build parameters from a loose name → value map
    ///
    /// Unknown names and non-finite values are skipped with a warning; the
    /// remaining entries still apply. Values are clamped into range.
    pub fn from_map(map: &HashMap<String, f32>) -> Self {
        let mut params = Self::default();
        for (name, value) in map {
            let Ok(param) = name.parse::<EffectParam>() else {
                warn!(effect = %name, "ignoring unknown effect parameter");
                continue;
            };
            if !value.is_finite() {
                warn!(effect = %name, value, "ignoring non-finite effect parameter");
                continue;
            }
            params.set(param, param.clamp(*value));
        }
        params
    }
}

/// Check whether an effect is enabled in a flag map (absent means enabled)
pub fn is_enabled(enabled: &EnabledEffects, param: EffectParam) -> bool {
    enabled.get(param.as_str()).copied().unwrap_or(true)
}
