//! Timeline tracks

use serde::{Deserialize, Serialize};
use std::fmt;

use super::params::{EffectParameters, EnabledEffects};

/// Unique track identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named lane on the timeline with its own mix controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub gain_db: f32,
    /// Stereo position, -1 (left) to 1 (right)
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub effects: EffectParameters,
    #[serde(default)]
    pub enabled_effects: EnabledEffects,
    /// Effect ids currently shown/applied, in display order
    #[serde(default)]
    pub active_effects: Vec<String>,
}

impl Track {
    /// Create a track with unity gain, centred, no effects
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TrackId(id.into()),
            name: name.into(),
            color: String::new(),
            gain_db: 0.0,
            pan: 0.0,
            mute: false,
            solo: false,
            effects: EffectParameters::default(),
            enabled_effects: EnabledEffects::new(),
            active_effects: Vec::new(),
        }
    }

    /// Create a track with a generated id
    pub fn named(name: impl Into<String>) -> Self {
        let mut track = Self::new(String::new(), name);
        track.id = TrackId::generate();
        track
    }

    pub fn with_gain_db(mut self, gain_db: f32) -> Self {
        self.gain_db = gain_db;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan.clamp(-1.0, 1.0);
        self
    }

    pub fn with_mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    pub fn with_solo(mut self, solo: bool) -> Self {
        self.solo = solo;
        self
    }

    pub fn with_effects(mut self, effects: EffectParameters) -> Self {
        self.effects = effects;
        self
    }
}
