//! Timeline snapshots
//!
//! A `Version` is the immutable description the engine loads. Editing
//! operations produce a new `Version`; only mute/solo and mix controls are
//! applied to an already-loaded graph in place.

use serde::{Deserialize, Serialize};

use super::params::EffectParameters;
use super::segment::Segment;
use super::track::{Track, TrackId};
use crate::error::{MixdeckError, Result};

/// Loop points on the timeline
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopRegion {
    pub enabled: bool,
    pub start_ms: f64,
    pub end_ms: f64,
}

impl LoopRegion {
    pub fn new(start_ms: f64, end_ms: f64) -> Self {
        Self {
            enabled: true,
            start_ms,
            end_ms,
        }
    }
}

/// Timeline snapshot consumed by the graph manager and the exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub bpm: f64,
    #[serde(default = "default_time_signature")]
    pub time_signature: (u8, u8),
    pub length_ms: f64,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default, rename = "loop")]
    pub loop_region: LoopRegion,
    #[serde(default)]
    pub master_chain: EffectParameters,
}

fn default_time_signature() -> (u8, u8) {
    (4, 4)
}

impl Default for Version {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            time_signature: default_time_signature(),
            length_ms: 0.0,
            tracks: Vec::new(),
            segments: Vec::new(),
            loop_region: LoopRegion::default(),
            master_chain: EffectParameters::default(),
        }
    }
}

impl Version {
    pub fn new(bpm: f64, length_ms: f64) -> Self {
        Self {
            bpm,
            length_ms,
            ..Self::default()
        }
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| &t.id == id)
    }

    /// Segments owned by a track, in timeline order
    pub fn segments_for(&self, id: &TrackId) -> Vec<&Segment> {
        let mut segments: Vec<&Segment> =
            self.segments.iter().filter(|s| &s.track_id == id).collect();
        segments.sort_by(|a, b| a.start_on_timeline_ms.total_cmp(&b.start_on_timeline_ms));
        segments
    }

    /// Remove a track and every segment it owns
    ///
    /// Returns the removed track, or `None` if no track had that id.
    pub fn remove_track(&mut self, id: &TrackId) -> Option<Track> {
        let index = self.tracks.iter().position(|t| &t.id == id)?;
        self.segments.retain(|s| &s.track_id != id);
        Some(self.tracks.remove(index))
    }

    /// End of the last segment on the timeline
    pub fn content_end_ms(&self) -> f64 {
        self.segments
            .iter()
            .map(Segment::end_ms)
            .fold(0.0, f64::max)
    }

    /// Validate the tempo and every segment window
    pub fn validate(&self) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(MixdeckError::InvalidParameter {
                param: "bpm".to_string(),
                value: self.bpm.to_string(),
                expected: "a positive, finite tempo".to_string(),
            });
        }
        for segment in &self.segments {
            segment.validate()?;
        }
        Ok(())
    }
}
