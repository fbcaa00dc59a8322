//! Mute and solo resolution
//!
//! Mute always wins. When any track is soloed, only soloed tracks are
//! audible.

use std::collections::HashMap;

use crate::dsp::gain::MUTE_FLOOR;
use crate::timeline::{Track, TrackId};

/// Whether a single track is audible given the solo state of the session
#[inline]
pub fn is_audible(track: &Track, any_solo: bool) -> bool {
    !track.mute && (!any_solo || track.solo)
}

/// Audibility of every track, keyed by id
pub fn resolve_audibility(tracks: &[Track]) -> HashMap<TrackId, bool> {
    let any_solo = tracks.iter().any(|t| t.solo);
    tracks
        .iter()
        .map(|t| (t.id.clone(), is_audible(t, any_solo)))
        .collect()
}

/// Bus gain target for an audibility state
///
/// Muted buses ramp toward a floor instead of zero.
#[inline]
pub fn target_gain(audible: bool) -> f32 {
    if audible {
        1.0
    } else {
        MUTE_FLOOR
    }
}
