//! Collision-aware clip placement
//!
//! Pure functions over a track's segments. Intervals are half-open, so a
//! segment ending at 1000ms does not collide with one starting at 1000ms.
//! Inputs are never mutated; insertion returns a new collection.

use super::segment::Segment;

/// Resolve where a clip of `duration_ms` should start when dropped at
/// `desired_start_ms`
///
/// 1. A drop that overlaps nothing is kept as is.
/// 2. Otherwise, against the earliest-starting overlapped segment, the clip
///    moves earlier into the gap before that segment when the gap can hold
///    it; if not, it snaps to that segment's end.
/// 3. When the snapped slot still collides, the clip is placed at that end
///    anyway and `insert_segment_with_spacing` pushes the neighbours.
pub fn resolve_segment_start(segments: &[Segment], desired_start_ms: f64, duration_ms: f64) -> f64 {
    let desired = desired_start_ms.max(0.0);

    let Some(conflict) = first_conflict(segments, desired, duration_ms) else {
        return desired;
    };

    let gap_start = segments
        .iter()
        .filter(|s| s.end_ms() <= conflict.start_on_timeline_ms)
        .map(Segment::end_ms)
        .fold(0.0, f64::max);
    let gap = conflict.start_on_timeline_ms - gap_start;
    if gap >= duration_ms {
        return conflict.start_on_timeline_ms - duration_ms;
    }

    let forward = conflict.end_ms();
    if first_conflict(segments, forward, duration_ms).is_none() {
        return forward;
    }

    // No clean slot: insertion will push the later neighbours out of the way.
    forward
}

/// Place `new_segment` on its track and shift colliding neighbours forward
///
/// Only segments on the same track as `new_segment` take part. Neighbours
/// that start at or after the new segment and now overlap it are pushed
/// forward by exactly the overlap; the push cascades in start order so
/// relative order is preserved. Everything else keeps its position.
///
/// The returned list keeps the input order, with the new segment placed
/// before the first segment that starts after it.
pub fn insert_segment_with_spacing(segments: &[Segment], new_segment: &Segment) -> Vec<Segment> {
    let same_track: Vec<Segment> = segments
        .iter()
        .filter(|s| s.track_id == new_segment.track_id && s.id != new_segment.id)
        .cloned()
        .collect();

    let start = resolve_segment_start(
        &same_track,
        new_segment.start_on_timeline_ms,
        new_segment.duration_ms,
    );
    let placed = new_segment.moved_to(start);

    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&a, &b| {
        segments[a]
            .start_on_timeline_ms
            .total_cmp(&segments[b].start_on_timeline_ms)
    });

    let mut result: Vec<Segment> = segments
        .iter()
        .filter(|s| s.id != new_segment.id)
        .cloned()
        .collect();
    let mut cursor_end = placed.end_ms();

    for index in order {
        let original = &segments[index];
        if original.track_id != placed.track_id
            || original.id == placed.id
            || original.start_on_timeline_ms < placed.start_on_timeline_ms
        {
            continue;
        }
        if original.start_on_timeline_ms < cursor_end {
            let shifted = original.moved_to(cursor_end);
            cursor_end = shifted.end_ms();
            if let Some(slot) = result.iter_mut().find(|s| s.id == original.id) {
                *slot = shifted;
            }
        } else {
            break;
        }
    }

    let index = result
        .iter()
        .position(|s| s.start_on_timeline_ms > placed.start_on_timeline_ms)
        .unwrap_or(result.len());
    result.insert(index, placed);
    result
}

fn first_conflict<'a>(
    segments: &'a [Segment],
    start_ms: f64,
    duration_ms: f64,
) -> Option<&'a Segment> {
    segments
        .iter()
        .filter(|s| s.overlaps(start_ms, duration_ms))
        .min_by(|a, b| a.start_on_timeline_ms.total_cmp(&b.start_on_timeline_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{SourceRef, TrackId};
    use test_case::test_case;

    fn clips(spans: &[(f64, f64)]) -> Vec<Segment> {
        spans
            .iter()
            .enumerate()
            .map(|(i, &(start, duration))| {
                Segment::new(
                    format!("seg-{}", i),
                    TrackId::from("track"),
                    SourceRef::new("clip.wav"),
                    start,
                    duration,
                )
            })
            .collect()
    }

    #[test_case(&[(0.0, 1000.0), (2000.0, 500.0)], 1500.0, 500.0 => 1500.0; "no overlap keeps desired start")]
    #[test_case(&[(0.0, 1200.0), (2000.0, 800.0)], 600.0, 600.0 => 1200.0; "snaps to end of overlap")]
    #[test_case(&[(60000.0, 240000.0)], 62000.0, 11000.0 => 49000.0; "prefers earlier gap")]
    #[test_case(&[(0.0, 1000.0), (1200.0, 800.0)], 500.0, 1500.0 => 1000.0; "falls back to conflict end")]
    #[test_case(&[], 300.0, 100.0 => 300.0; "empty track")]
    #[test_case(&[(0.0, 1000.0)], -50.0, 10.0 => 1000.0; "negative drop clamps to zero first")]
    fn test_resolve_segment_start(spans: &[(f64, f64)], desired: f64, duration: f64) -> f64 {
        resolve_segment_start(&clips(spans), desired, duration)
    }

    #[test]
    fn test_earlier_gap_uses_previous_segment_end() {
        // Gap between 1000 and 2000 holds 600ms, so a drop at 1800 moves to 1400.
        let segments = clips(&[(0.0, 1000.0), (2000.0, 800.0)]);
        pretty_assertions::assert_eq!(resolve_segment_start(&segments, 1800.0, 600.0), 1400.0);

        // 1200ms does not fit the 1000ms gap; snap past the conflict instead.
        pretty_assertions::assert_eq!(resolve_segment_start(&segments, 1800.0, 1200.0), 2800.0);
    }

    #[test]
    fn test_insert_shifts_only_colliding_neighbour() {
        let segments = clips(&[(0.0, 1000.0), (1500.0, 400.0)]);
        let snapshot = segments.clone();
        let new_segment = Segment::new(
            "new",
            TrackId::from("track"),
            SourceRef::new("other.wav"),
            800.0,
            700.0,
        );

        let result = insert_segment_with_spacing(&segments, &new_segment);

        let find = |id: &str| result.iter().find(|s| s.id == id).unwrap().start_on_timeline_ms;
        pretty_assertions::assert_eq!(find("new"), 1000.0);
        pretty_assertions::assert_eq!(find("seg-0"), 0.0);
        pretty_assertions::assert_eq!(find("seg-1"), 1700.0);
        pretty_assertions::assert_eq!(result.len(), 3);
        pretty_assertions::assert_eq!(segments, snapshot);
    }

    #[test]
    fn test_insert_cascades_in_order() {
        let segments = clips(&[(0.0, 1000.0), (1200.0, 300.0), (1500.0, 100.0), (5000.0, 100.0)]);
        let new_segment = Segment::new(
            "new",
            TrackId::from("track"),
            SourceRef::new("other.wav"),
            900.0,
            500.0,
        );

        let result = insert_segment_with_spacing(&segments, &new_segment);
        let find = |id: &str| result.iter().find(|s| s.id == id).unwrap().start_on_timeline_ms;

        pretty_assertions::assert_eq!(find("new"), 1000.0);
        pretty_assertions::assert_eq!(find("seg-1"), 1500.0);
        pretty_assertions::assert_eq!(find("seg-2"), 1800.0);
        pretty_assertions::assert_eq!(find("seg-3"), 5000.0);
    }

    #[test]
    fn test_insert_keeps_start_order() {
        let segments = clips(&[(0.0, 1000.0), (1500.0, 400.0), (4000.0, 200.0)]);
        let new_segment = Segment::new(
            "new",
            TrackId::from("track"),
            SourceRef::new("other.wav"),
            800.0,
            700.0,
        );

        let result = insert_segment_with_spacing(&segments, &new_segment);
        let ids: Vec<&str> = result.iter().map(|s| s.id.as_str()).collect();
        pretty_assertions::assert_eq!(ids, vec!["seg-0", "new", "seg-1", "seg-2"]);
        assert!(result
            .windows(2)
            .all(|w| w[0].start_on_timeline_ms <= w[1].start_on_timeline_ms));
    }

    #[test]
    fn test_insert_at_end_of_track() {
        let segments = clips(&[(0.0, 1000.0)]);
        let new_segment = Segment::new(
            "new",
            TrackId::from("track"),
            SourceRef::new("other.wav"),
            3000.0,
            100.0,
        );

        let result = insert_segment_with_spacing(&segments, &new_segment);
        let ids: Vec<&str> = result.iter().map(|s| s.id.as_str()).collect();
        pretty_assertions::assert_eq!(ids, vec!["seg-0", "new"]);
    }

    #[test]
    fn test_insert_ignores_other_tracks() {
        let mut segments = clips(&[(0.0, 1000.0)]);
        segments.push(Segment::new(
            "elsewhere",
            TrackId::from("other"),
            SourceRef::new("b.wav"),
            1000.0,
            500.0,
        ));
        let new_segment = Segment::new(
            "new",
            TrackId::from("track"),
            SourceRef::new("c.wav"),
            1000.0,
            500.0,
        );

        let result = insert_segment_with_spacing(&segments, &new_segment);
        let find = |id: &str| result.iter().find(|s| s.id == id).unwrap().start_on_timeline_ms;
        pretty_assertions::assert_eq!(find("new"), 1000.0);
        pretty_assertions::assert_eq!(find("elsewhere"), 1000.0);
    }
}
