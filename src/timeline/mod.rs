//! Timeline data model
//!
//! Tracks, segments and versions are plain serde types shared by the live
//! graph and the offline exporter.

pub mod params;
pub mod placement;
pub mod segment;
pub mod track;
pub mod version;

pub use params::{is_enabled, EffectParam, EffectParameters, EnabledEffects, DEFAULT_TOLERANCE};
pub use placement::{insert_segment_with_spacing, resolve_segment_start};
pub use segment::{Segment, SourceRef};
pub use track::{Track, TrackId};
pub use version::{LoopRegion, Version};
