//! Transport clock for Mixdeck
//!
//! Owns the playhead and drives every clip player from one shared clock, so
//! pause, seek and loop affect all clips uniformly. The clock only moves
//! inside `advance`, which the graph manager calls once per rendered block.
//! `tick` is the UI refresh: it reports progress and detects the end of the
//! timeline.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::buffer::{db_to_linear, frames_to_ms, ms_to_frames, AudioBuffer};
use crate::engine::events::{EngineEvent, EventBus};
use crate::timeline::{Segment, TrackId};

/// Ticks per quarter note
pub const PPQ: f64 = 192.0;

/// Convert milliseconds to ticks at `bpm`
#[inline]
pub fn ms_to_ticks(ms: f64, bpm: f64) -> f64 {
    ms / 60_000.0 * bpm * PPQ
}

/// Convert ticks to milliseconds at `bpm`
#[inline]
pub fn ticks_to_ms(ticks: f64, bpm: f64) -> f64 {
    if bpm <= 0.0 {
        return 0.0;
    }
    ticks / PPQ / bpm * 60_000.0
}

// ============================================================================
// Transport State
// ============================================================================

/// Coarse playback state, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "Stopped"),
            TransportState::Playing => write!(f, "Playing"),
            TransportState::Paused => write!(f, "Paused"),
        }
    }
}

/// A contiguous run of timeline frames inside one rendered block
///
/// A block splits into several spans when it crosses the loop end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Timeline frame at the first sample of the span
    pub timeline_frame: u64,
    /// Offset of the span inside the block
    pub block_offset: usize,
    pub len: usize,
}

// ============================================================================
// Transport Scheduler
// ============================================================================

/// Shared playback clock
///
/// # Example
/// ```
/// use mixdeck::config::EngineConfig;
/// use mixdeck::engine::events::EventBus;
/// use mixdeck::engine::transport::TransportScheduler;
///
/// let mut transport = TransportScheduler::new(&EngineConfig::default(), EventBus::new(16));
/// transport.set_length_ms(10_000.0);
/// transport.seek_ms(2_500.0);
/// assert_eq!(transport.position_ms(), 2_500.0);
/// ```
#[derive(Debug, Clone)]
pub struct TransportScheduler {
    sample_rate: u32,
    bpm: f64,
    length_ms: f64,

    /// Playhead in frames at `sample_rate`
    position: u64,
    playing: bool,
    /// Set once the end of the timeline has been handled by `tick`
    ended: bool,

    /// Frames left before the clock starts moving
    start_delay: u64,
    render_ahead_frames: u64,
    jog_latency_frames: u64,

    /// Loop bounds in ticks; `None` when looping is off
    loop_ticks: Option<(f64, f64)>,

    events: EventBus,
}

impl TransportScheduler {
    pub fn new(config: &EngineConfig, events: EventBus) -> Self {
        Self {
            sample_rate: config.sample_rate,
            bpm: 120.0,
            length_ms: 0.0,
            position: 0,
            playing: false,
            ended: false,
            start_delay: 0,
            render_ahead_frames: config.render_ahead_frames(),
            jog_latency_frames: config.jog_latency_frames(),
            loop_ticks: None,
            events,
        }
    }

    // ========================================================================
    // Timeline
    // ========================================================================

    pub fn set_bpm(&mut self, bpm: f64) {
        if bpm.is_finite() && bpm > 0.0 {
            self.bpm = bpm;
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Set the timeline length; zero or non-finite means unbounded
    pub fn set_length_ms(&mut self, length_ms: f64) {
        self.length_ms = if length_ms.is_finite() && length_ms > 0.0 {
            length_ms
        } else {
            0.0
        };
    }

    pub fn length_ms(&self) -> f64 {
        self.length_ms
    }

    fn has_length(&self) -> bool {
        self.length_ms > 0.0
    }

    // ========================================================================
    // Transport Controls
    // ========================================================================

    /// Move the playhead
    ///
    /// Clamped to `[0, length]`. While playing, the clock restarts after the
    /// jog latency so clip players re-sync after the jump.
    pub fn seek_ms(&mut self, ms: f64) {
        let mut target = if ms.is_finite() { ms.max(0.0) } else { 0.0 };
        if self.has_length() {
            target = target.min(self.length_ms);
        }

        self.position = ms_to_frames(target, self.sample_rate) as u64;
        if !self.has_length() || target < self.length_ms {
            self.ended = false;
        }
        if self.playing {
            self.start_delay = self.jog_latency_frames;
        }
        debug!(
            position_ms = target,
            ticks = self.position_ticks(),
            "transport seek"
        );
    }

    /// Start playback
    ///
    /// At or past the end the playhead rewinds to zero first. The clock
    /// starts `render_ahead` frames in the future.
    pub fn play(&mut self) {
        if self.has_length() && self.position_ms() >= self.length_ms {
            self.seek_ms(0.0);
        }
        self.start_delay = self.render_ahead_frames;
        self.playing = true;
        self.ended = false;
        debug!(position_ms = self.position_ms(), "transport play");
        self.emit_transport();
    }

    /// Freeze the playhead where it is
    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.start_delay = 0;
        debug!(position_ms = self.position_ms(), "transport pause");
        self.emit_transport();
    }

    /// Pause and rewind to zero
    pub fn stop(&mut self) {
        self.playing = false;
        self.start_delay = 0;
        self.seek_ms(0.0);
        debug!("transport stop");
        self.emit_transport();
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Enable looping between two timeline positions
    ///
    /// Looping is only enabled when `end > start`; returns whether it was.
    pub fn set_loop(&mut self, start_ms: f64, end_ms: f64) -> bool {
        let start = ms_to_ticks(start_ms.max(0.0), self.bpm);
        let end = ms_to_ticks(end_ms.max(0.0), self.bpm);
        if end > start {
            self.loop_ticks = Some((start, end));
            debug!(start_ms, end_ms, "loop enabled");
            true
        } else {
            self.loop_ticks = None;
            false
        }
    }

    pub fn clear_loop(&mut self) {
        self.loop_ticks = None;
    }

    pub fn loop_ticks(&self) -> Option<(f64, f64)> {
        self.loop_ticks
    }

    /// Loop bounds in frames, if the region spans at least one frame
    fn loop_frames(&self) -> Option<(u64, u64)> {
        let (start, end) = self.loop_ticks?;
        let start = self.ticks_to_frames(start);
        let end = self.ticks_to_frames(end);
        (end > start).then_some((start, end))
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Advance the clock by one block and return the timeline spans it covers
    ///
    /// Frames spent in the start delay produce no span. Crossing the loop end
    /// wraps to the loop start inside the same block.
    pub fn advance(&mut self, frames: usize) -> Vec<Span> {
        let mut spans = Vec::new();
        if !self.playing || frames == 0 {
            return spans;
        }

        let delay = self.start_delay.min(frames as u64);
        self.start_delay -= delay;
        let mut offset = delay as usize;

        let loop_frames = self.loop_frames();
        while offset < frames {
            let remaining = frames - offset;
            let len = match loop_frames {
                Some((_, end)) if self.position < end => {
                    remaining.min((end - self.position) as usize)
                }
                _ => remaining,
            };

            spans.push(Span {
                timeline_frame: self.position,
                block_offset: offset,
                len,
            });
            self.position += len as u64;
            offset += len;

            if let Some((start, end)) = loop_frames {
                if self.position == end {
                    self.position = start;
                }
            }
        }
        spans
    }

    /// UI refresh: report progress and handle the end of the timeline
    ///
    /// Exactly one stop event is emitted per arrival at the end.
    pub fn tick(&mut self) -> f64 {
        let mut position_ms = self.position_ms();
        self.events.emit(EngineEvent::Progress { position_ms });

        if self.has_length() && position_ms >= self.length_ms {
            position_ms = self.length_ms;
            self.position = ms_to_frames(self.length_ms, self.sample_rate) as u64;
            if !self.ended {
                self.playing = false;
                self.start_delay = 0;
                self.seek_ms(self.length_ms);
                self.ended = true;
                debug!(position_ms, "reached end of timeline");
                self.emit_transport();
            }
        }
        position_ms
    }

    fn emit_transport(&self) {
        self.events.emit(EngineEvent::Transport {
            playing: self.playing,
            position_ms: self.position_ms(),
            bpm: self.bpm,
        });
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn state(&self) -> TransportState {
        if self.playing {
            TransportState::Playing
        } else if self.position == 0 {
            TransportState::Stopped
        } else {
            TransportState::Paused
        }
    }

    pub fn position_frames(&self) -> u64 {
        self.position
    }

    pub fn position_ms(&self) -> f64 {
        frames_to_ms(self.position, self.sample_rate)
    }

    pub fn position_ticks(&self) -> f64 {
        ms_to_ticks(self.position_ms(), self.bpm)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ticks_to_frames(&self, ticks: f64) -> u64 {
        ms_to_frames(ticks_to_ms(ticks, self.bpm), self.sample_rate) as u64
    }
}

// ============================================================================
// Clip Player
// ============================================================================

/// Linear fade envelope at frame `local` of a clip `length` frames long
///
/// Shared by live playback and the offline mixdown.
#[inline]
pub fn fade_envelope(local: usize, length: usize, fade_in: usize, fade_out: usize) -> f32 {
    let mut env = 1.0_f32;
    if fade_in > 0 && local < fade_in {
        env = env.min(local as f32 / fade_in as f32);
    }
    if fade_out > 0 {
        let left = length.saturating_sub(local);
        if left <= fade_out {
            env = env.min(left as f32 / fade_out as f32);
        }
    }
    env
}

/// Plays one segment of a decoded source into its track bus
#[derive(Debug, Clone)]
pub struct ClipPlayer {
    pub segment_id: String,
    pub track_id: TrackId,
    buffer: Arc<AudioBuffer>,
    /// Timeline start in ticks at the loaded bpm
    start_ticks: f64,
    offset_frames: usize,
    length_frames: usize,
    fade_in_frames: usize,
    fade_out_frames: usize,
    gain: f32,
}

impl ClipPlayer {
    pub fn new(segment: &Segment, buffer: Arc<AudioBuffer>, bpm: f64) -> Self {
        let sr = buffer.sample_rate;
        let offset_frames = ms_to_frames(segment.start_in_file_ms, sr);
        let available = buffer.len().saturating_sub(offset_frames);
        Self {
            segment_id: segment.id.clone(),
            track_id: segment.track_id.clone(),
            start_ticks: ms_to_ticks(segment.start_on_timeline_ms, bpm),
            offset_frames,
            length_frames: ms_to_frames(segment.duration_ms, sr).min(available),
            fade_in_frames: ms_to_frames(segment.fade_in_ms, sr),
            fade_out_frames: ms_to_frames(segment.fade_out_ms, sr),
            gain: db_to_linear(segment.gain_db),
            buffer,
        }
    }

    pub fn start_ticks(&self) -> f64 {
        self.start_ticks
    }

    pub fn length_frames(&self) -> usize {
        self.length_frames
    }

    /// Add this clip's contribution for one span into `out`
    pub fn render(&self, transport: &TransportScheduler, span: &Span, out: &mut AudioBuffer) {
        let start = transport.ticks_to_frames(self.start_ticks);
        let end = start + self.length_frames as u64;
        let span_end = span.timeline_frame + span.len as u64;
        if span_end <= start || span.timeline_frame >= end {
            return;
        }

        let from = span.timeline_frame.max(start);
        let to = span_end.min(end);
        for frame in from..to {
            let local = (frame - start) as usize;
            let src = self.offset_frames + local;
            let dst = span.block_offset + (frame - span.timeline_frame) as usize;
            let level = self.gain
                * fade_envelope(local, self.length_frames, self.fade_in_frames, self.fade_out_frames);
            for (ch, channel) in out.samples.iter_mut().enumerate() {
                if let Some(slot) = channel.get_mut(dst) {
                    *slot += self.buffer.sample_for_output(ch, src) * level;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;
    use crate::timeline::SourceRef;
    use approx::assert_relative_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 1000,
            render_ahead_ms: 100.0,
            jog_latency_ms: 10.0,
            ..EngineConfig::default()
        }
    }

    fn transport() -> (TransportScheduler, EventBus) {
        let bus = EventBus::new(64);
        let mut t = TransportScheduler::new(&config(), bus.clone());
        t.set_length_ms(1000.0);
        (t, bus)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        out
    }

    // ========================================================================
    // Tick conversion
    // ========================================================================

    #[test]
    fn test_tick_conversion() {
        // One beat at 120bpm is 500ms
        assert_relative_eq!(ms_to_ticks(500.0, 120.0), 192.0);
        assert_relative_eq!(ticks_to_ms(192.0, 120.0), 500.0);
        assert_relative_eq!(ticks_to_ms(ms_to_ticks(1234.5, 97.0), 97.0), 1234.5, epsilon = 1e-9);
    }

    // ========================================================================
    // Controls
    // ========================================================================

    #[test]
    fn test_default_state() {
        let (t, _) = transport();
        assert!(!t.is_playing());
        assert_eq!(t.state(), TransportState::Stopped);
        assert_eq!(t.position_ms(), 0.0);
    }

    #[test]
    fn test_seek_clamps_to_length() {
        let (mut t, _) = transport();
        t.seek_ms(5000.0);
        assert_eq!(t.position_ms(), 1000.0);
        t.seek_ms(-20.0);
        assert_eq!(t.position_ms(), 0.0);
    }

    #[test]
    fn test_play_waits_render_ahead() {
        let (mut t, _) = transport();
        t.play();
        // 100ms render-ahead at 1kHz
        let spans = t.advance(150);
        assert_eq!(
            spans,
            vec![Span {
                timeline_frame: 0,
                block_offset: 100,
                len: 50
            }]
        );
        assert_eq!(t.position_frames(), 50);
    }

    #[test]
    fn test_seek_while_playing_applies_jog_latency() {
        let (mut t, _) = transport();
        t.play();
        t.advance(200);
        t.seek_ms(500.0);
        let spans = t.advance(20);
        assert_eq!(spans[0].block_offset, 10);
        assert_eq!(spans[0].timeline_frame, 500);
    }

    #[test]
    fn test_pause_freezes_and_stop_rewinds() {
        let (mut t, _) = transport();
        t.play();
        t.advance(300);
        t.pause();
        let frozen = t.position_frames();
        assert!(t.advance(100).is_empty());
        assert_eq!(t.position_frames(), frozen);
        assert_eq!(t.state(), TransportState::Paused);

        t.stop();
        assert_eq!(t.position_ms(), 0.0);
        assert_eq!(t.state(), TransportState::Stopped);
    }

    #[test]
    fn test_play_at_end_rewinds() {
        let (mut t, _) = transport();
        t.seek_ms(1000.0);
        t.play();
        assert_eq!(t.position_ms(), 0.0);
    }

    // ========================================================================
    // Loop
    // ========================================================================

    #[test]
    fn test_loop_enabled_only_when_end_after_start() {
        let (mut t, _) = transport();
        assert!(!t.set_loop(500.0, 500.0));
        assert!(t.loop_ticks().is_none());
        assert!(!t.set_loop(600.0, 200.0));
        assert!(t.set_loop(200.0, 600.0));
        assert!(t.loop_ticks().is_some());
        t.clear_loop();
        assert!(t.loop_ticks().is_none());
    }

    #[test]
    fn test_block_wraps_at_loop_end() {
        let (mut t, _) = transport();
        t.set_loop(100.0, 200.0);
        t.seek_ms(180.0);
        t.play();
        t.advance(100); // render-ahead
        let spans = t.advance(50);
        assert_eq!(
            spans,
            vec![
                Span {
                    timeline_frame: 180,
                    block_offset: 0,
                    len: 20
                },
                Span {
                    timeline_frame: 100,
                    block_offset: 20,
                    len: 30
                },
            ]
        );
        assert_eq!(t.position_frames(), 130);
    }

    // ========================================================================
    // End of timeline
    // ========================================================================

    #[test]
    fn test_exactly_one_stop_event_at_end() {
        let (mut t, bus) = transport();
        let mut rx = bus.subscribe();
        t.play();
        t.advance(100);
        t.advance(1200);

        assert_eq!(t.tick(), 1000.0);
        assert_eq!(t.tick(), 1000.0);
        assert!(t.has_ended());
        assert!(!t.is_playing());

        let stops = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Transport { playing: false, .. }))
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_tick_emits_progress() {
        let (mut t, bus) = transport();
        let mut rx = bus.subscribe();
        t.seek_ms(250.0);
        t.tick();
        assert_eq!(
            drain(&mut rx),
            vec![EngineEvent::Progress { position_ms: 250.0 }]
        );
    }

    #[test]
    fn test_seek_before_end_clears_ended() {
        let (mut t, _) = transport();
        t.seek_ms(1000.0);
        t.tick();
        assert!(t.has_ended());
        t.seek_ms(400.0);
        assert!(!t.has_ended());
    }

    // ========================================================================
    // Clip player
    // ========================================================================

    fn clip(fade_in: f64, fade_out: f64) -> ClipPlayer {
        let source = AudioBuffer {
            samples: vec![vec![1.0; 1000]],
            sample_rate: 1000,
        };
        let segment = Segment::new("s", TrackId::from("t"), SourceRef::new("a.wav"), 100.0, 100.0)
            .with_offset(50.0)
            .with_fades(fade_in, fade_out);
        ClipPlayer::new(&segment, Arc::new(source), 120.0)
    }

    #[test]
    fn test_clip_renders_only_its_window() {
        let (mut t, _) = transport();
        t.set_bpm(120.0);
        let player = clip(0.0, 0.0);
        let mut out = AudioBuffer::new(300, ChannelLayout::Stereo, 1000);
        let span = Span {
            timeline_frame: 0,
            block_offset: 0,
            len: 300,
        };
        player.render(&t, &span, &mut out);

        assert_eq!(out.samples[0][99], 0.0);
        assert_eq!(out.samples[0][100], 1.0);
        assert_eq!(out.samples[1][199], 1.0);
        assert_eq!(out.samples[0][200], 0.0);
    }

    #[test]
    fn test_clip_fades_are_linear() {
        let (t, _) = transport();
        let player = clip(10.0, 20.0);
        let mut out = AudioBuffer::new(300, ChannelLayout::Stereo, 1000);
        let span = Span {
            timeline_frame: 0,
            block_offset: 0,
            len: 300,
        };
        player.render(&t, &span, &mut out);

        assert_relative_eq!(out.samples[0][100], 0.0);
        assert_relative_eq!(out.samples[0][105], 0.5);
        assert_relative_eq!(out.samples[0][150], 1.0);
        // 10 frames before the end of a 20-frame fade-out
        assert_relative_eq!(out.samples[0][190], 0.5);
    }
}
