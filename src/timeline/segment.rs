//! Timeline segments (clips)

use serde::{Deserialize, Serialize};

use super::track::TrackId;
use crate::error::{MixdeckError, Result};

/// Reference to the audio source backing a segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub url: String,
}

impl SourceRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A placed, time-bounded excerpt of a source buffer on a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub track_id: TrackId,
    pub source: SourceRef,
    /// Position on the shared timeline
    pub start_on_timeline_ms: f64,
    /// Offset into the source
    #[serde(default)]
    pub start_in_file_ms: f64,
    pub duration_ms: f64,
    #[serde(default)]
    pub gain_db: f32,
    #[serde(default)]
    pub fade_in_ms: f64,
    #[serde(default)]
    pub fade_out_ms: f64,
    /// Length of the backing source, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_duration_ms: Option<f64>,
}

impl Segment {
    pub fn new(
        id: impl Into<String>,
        track_id: TrackId,
        source: SourceRef,
        start_on_timeline_ms: f64,
        duration_ms: f64,
    ) -> Self {
        Self {
            id: id.into(),
            track_id,
            source,
            start_on_timeline_ms,
            start_in_file_ms: 0.0,
            duration_ms,
            gain_db: 0.0,
            fade_in_ms: 0.0,
            fade_out_ms: 0.0,
            source_duration_ms: None,
        }
    }

    pub fn with_offset(mut self, start_in_file_ms: f64) -> Self {
        self.start_in_file_ms = start_in_file_ms;
        self
    }

    pub fn with_gain_db(mut self, gain_db: f32) -> Self {
        self.gain_db = gain_db;
        self
    }

    pub fn with_fades(mut self, fade_in_ms: f64, fade_out_ms: f64) -> Self {
        self.fade_in_ms = fade_in_ms;
        self.fade_out_ms = fade_out_ms;
        self
    }

    pub fn with_source_duration(mut self, source_duration_ms: f64) -> Self {
        self.source_duration_ms = Some(source_duration_ms);
        self
    }

    /// End position on the timeline (exclusive)
    #[inline]
    pub fn end_ms(&self) -> f64 {
        self.start_on_timeline_ms + self.duration_ms
    }

    /// Half-open interval overlap test against `[start, start + duration)`
    #[inline]
    pub fn overlaps(&self, start_ms: f64, duration_ms: f64) -> bool {
        self.start_on_timeline_ms < start_ms + duration_ms && start_ms < self.end_ms()
    }

    /// Copy of this segment moved to a new timeline position
    pub fn moved_to(&self, start_on_timeline_ms: f64) -> Self {
        Self {
            start_on_timeline_ms,
            ..self.clone()
        }
    }

    /// Check the segment's window against its source
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| MixdeckError::InvalidSegment {
            segment_id: self.id.clone(),
            reason,
        };

        if !(self.duration_ms.is_finite() && self.duration_ms > 0.0) {
            return Err(invalid(format!(
                "duration must be positive, got {}",
                self.duration_ms
            )));
        }
        if self.start_in_file_ms < 0.0 || self.start_on_timeline_ms < 0.0 {
            return Err(invalid("negative start position".to_string()));
        }
        if let Some(source_ms) = self.source_duration_ms {
            if self.start_in_file_ms + self.duration_ms > source_ms + 1e-6 {
                return Err(invalid(format!(
                    "window {}..{}ms exceeds source length {}ms",
                    self.start_in_file_ms,
                    self.start_in_file_ms + self.duration_ms,
                    source_ms
                )));
            }
        }
        Ok(())
    }
}
