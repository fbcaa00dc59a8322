//! Audio graph manager
//!
//! Owns the live processing graph for one loaded timeline: a master bus,
//! one bus per track, and a clip player per segment. Loading a new
//! `Version` rebuilds everything; mix controls (mute, solo, gain, pan,
//! effects) update the existing graph in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::Stream;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::buffer::{db_to_linear, AudioBuffer, ChannelLayout};
use crate::engine::bus::{Bus, ChainUpdate};
use crate::engine::events::{EngineEvent, EventBus};
use crate::engine::graph::{AudioGraph, NodeId, Port};
use crate::engine::solo::{resolve_audibility, target_gain};
use crate::engine::source::SourceLoader;
use crate::engine::transport::{ClipPlayer, TransportScheduler};
use crate::error::{DisposeError, MixdeckError, Result};
use crate::timeline::{EffectParameters, EnabledEffects, Track, TrackId, Version};

/// Outcome of a `load`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub generation: u64,
    /// Distinct sources that decoded
    pub decoded: usize,
    /// Sources that failed to decode, with the reason
    pub failed: Vec<(String, String)>,
    /// Segments that got a clip player
    pub clips: usize,
    /// Problems releasing the previous graph
    pub dispose_warnings: Vec<DisposeError>,
}

/// Live engine for one loaded timeline
pub struct AudioGraphManager {
    config: EngineConfig,
    graph: AudioGraph,
    master: Option<Bus>,
    master_effects: EffectParameters,
    buses: HashMap<TrackId, Bus>,
    /// Track state mirrored from the loaded version plus later control calls
    tracks: Vec<Track>,
    clips: Vec<ClipPlayer>,
    transport: TransportScheduler,
    events: EventBus,
    generation: u64,
}

impl AudioGraphManager {
    pub fn new(config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            graph: AudioGraph::new(config.sample_rate, config.block_size),
            transport: TransportScheduler::new(&config, events.clone()),
            master: None,
            master_effects: EffectParameters::default(),
            buses: HashMap::new(),
            tracks: Vec::new(),
            clips: Vec::new(),
            events,
            generation: 0,
            config,
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Replace the live graph with one built from `version`
    ///
    /// Decode failures do not fail the load; they are reported as buffer
    /// events and in the returned report. A segment pointing at a track
    /// with no bus fails the load before anything is decoded.
    pub async fn load<L: SourceLoader>(&mut self, version: &Version, loader: &L) -> Result<LoadReport> {
        version.validate()?;
        self.transport.stop();
        self.generation += 1;
        let generation = self.generation;

        let mut report = LoadReport {
            generation,
            dispose_warnings: self.teardown_buses(),
            ..LoadReport::default()
        };
        self.clips.clear();

        // Master bus
        self.master_effects = version.master_chain;
        let master = Bus::build(
            &mut self.graph,
            &self.master_effects,
            &EnabledEffects::new(),
            1.0,
            master_pan(&self.master_effects),
            Port::Destination,
        )?;
        let master_input = master.input();
        self.master = Some(master);

        // Track buses
        self.tracks = version.tracks.clone();
        let audible = resolve_audibility(&self.tracks);
        for track in &self.tracks {
            let level = bus_level(track, audible.get(&track.id).copied().unwrap_or(true));
            let bus = Bus::build(
                &mut self.graph,
                &track.effects,
                &track.enabled_effects,
                level,
                track.pan,
                Port::Node(master_input),
            )?;
            self.buses.insert(track.id.clone(), bus);
        }

        for segment in &version.segments {
            if !self.buses.contains_key(&segment.track_id) {
                return Err(MixdeckError::MissingTrackBus {
                    segment_id: segment.id.clone(),
                    track_id: segment.track_id.to_string(),
                });
            }
        }

        // Decode each distinct source once
        let mut seen = HashSet::new();
        let mut decoded: HashMap<String, Arc<AudioBuffer>> = HashMap::new();
        for segment in &version.segments {
            let url = segment.source.url.as_str();
            if !seen.insert(url.to_string()) {
                continue;
            }
            match loader.load(url).await {
                Ok(buffer) => {
                    decoded.insert(url.to_string(), buffer);
                    report.decoded += 1;
                    self.events.emit(EngineEvent::Buffer {
                        url: url.to_string(),
                        ready: true,
                        error: None,
                        generation,
                    });
                }
                Err(e) => {
                    warn!(url, error = %e, "source failed to decode");
                    report.failed.push((url.to_string(), e.to_string()));
                    self.events.emit(EngineEvent::Buffer {
                        url: url.to_string(),
                        ready: false,
                        error: Some(e.to_string()),
                        generation,
                    });
                }
            }
        }

        // Clip start ticks and the transport share one tempo
        self.transport.set_bpm(version.bpm);
        let bpm = self.transport.bpm();
        for segment in &version.segments {
            if let Some(buffer) = decoded.get(&segment.source.url) {
                self.clips
                    .push(ClipPlayer::new(segment, Arc::clone(buffer), bpm));
            }
        }
        report.clips = self.clips.len();

        // Transport
        self.transport.set_length_ms(version.length_ms);
        let region = version.loop_region;
        if region.enabled {
            self.transport.set_loop(region.start_ms, region.end_ms);
        } else {
            self.transport.clear_loop();
        }

        info!(
            generation,
            tracks = self.tracks.len(),
            clips = report.clips,
            failed = report.failed.len(),
            "timeline loaded"
        );
        Ok(report)
    }

    /// Generation of the most recent load
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ========================================================================
    // Track controls
    // ========================================================================

    fn track_mut(&mut self, id: &TrackId) -> Result<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| MixdeckError::TrackNotFound {
                track_id: id.to_string(),
            })
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| &t.id == id)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn bus(&self, id: &TrackId) -> Option<&Bus> {
        self.buses.get(id)
    }

    /// Ramp every track bus toward the level its mute/solo state implies
    fn apply_audibility(&mut self) -> Result<()> {
        let audible = resolve_audibility(&self.tracks);
        for track in &self.tracks {
            let Some(bus) = self.buses.get_mut(&track.id) else {
                continue;
            };
            let level = bus_level(track, audible.get(&track.id).copied().unwrap_or(true));
            bus.ramp_to(&mut self.graph, level)?;
        }
        Ok(())
    }

    pub fn set_track_mute(&mut self, id: &TrackId, mute: bool) -> Result<()> {
        self.track_mut(id)?.mute = mute;
        debug!(track = %id, mute, "set mute");
        self.apply_audibility()
    }

    pub fn set_track_solo(&mut self, id: &TrackId, solo: bool) -> Result<()> {
        self.track_mut(id)?.solo = solo;
        debug!(track = %id, solo, "set solo");
        self.apply_audibility()
    }

    pub fn set_track_gain_db(&mut self, id: &TrackId, gain_db: f32) -> Result<()> {
        if !gain_db.is_finite() {
            return Err(MixdeckError::InvalidParameter {
                param: "gain_db".to_string(),
                value: gain_db.to_string(),
                expected: "a finite number".to_string(),
            });
        }
        self.track_mut(id)?.gain_db = gain_db;
        self.apply_audibility()
    }

    /// Pan in percent, `-100` (left) to `100` (right)
    pub fn set_track_pan(&mut self, id: &TrackId, percent: f32) -> Result<()> {
        if !percent.is_finite() {
            return Err(MixdeckError::InvalidParameter {
                param: "pan".to_string(),
                value: percent.to_string(),
                expected: "-100..100".to_string(),
            });
        }
        let pan = (percent / 100.0).clamp(-1.0, 1.0);
        self.track_mut(id)?.pan = pan;
        let graph = &mut self.graph;
        let bus = self.buses.get_mut(id).ok_or_else(|| MixdeckError::TrackNotFound {
            track_id: id.to_string(),
        })?;
        bus.set_pan(graph, pan)
    }

    /// Replace a track's effect parameters
    ///
    /// Updates in place when the stage kinds are unchanged, otherwise
    /// rebuilds the chain between the bus gain and pan.
    pub fn set_track_effects(
        &mut self,
        id: &TrackId,
        effects: EffectParameters,
        enabled: EnabledEffects,
    ) -> Result<ChainUpdate> {
        {
            let track = self.track_mut(id)?;
            track.effects = effects;
            track.enabled_effects = enabled.clone();
        }
        let graph = &mut self.graph;
        let bus = self.buses.get_mut(id).ok_or_else(|| MixdeckError::TrackNotFound {
            track_id: id.to_string(),
        })?;
        bus.set_effects(graph, &effects, &enabled)
    }

    // ========================================================================
    // Master bus
    // ========================================================================

    pub fn master(&self) -> Option<&Bus> {
        self.master.as_ref()
    }

    pub fn master_effects(&self) -> &EffectParameters {
        &self.master_effects
    }

    /// Swap in a new master bus built from `effects`
    ///
    /// Track buses are moved onto the new master before the old one is torn
    /// down, and the old master level carries over.
    pub fn replace_master_chain(&mut self, effects: &EffectParameters) -> Result<Vec<DisposeError>> {
        let level = self.master.as_ref().map(Bus::level).unwrap_or(1.0);
        let new_master = Bus::build(
            &mut self.graph,
            effects,
            &EnabledEffects::new(),
            level,
            master_pan(effects),
            Port::Destination,
        )?;

        for bus in self.buses.values() {
            self.graph.disconnect(bus.output())?;
            self.graph.connect(bus.output(), Port::Node(new_master.input()))?;
        }

        let warnings = match self.master.replace(new_master) {
            Some(old) => old.teardown(&mut self.graph),
            None => Vec::new(),
        };
        self.master_effects = *effects;
        debug!(warnings = warnings.len(), "master chain replaced");
        Ok(warnings)
    }

    pub fn set_master_effects(&mut self, effects: EffectParameters) -> Result<Vec<DisposeError>> {
        self.replace_master_chain(&effects)
    }

    pub fn apply_effects(&mut self, effects: EffectParameters) -> Result<Vec<DisposeError>> {
        self.replace_master_chain(&effects)
    }

    /// Set the master output level (linear)
    pub fn set_master_level(&mut self, level: f32) -> Result<()> {
        let master = self.master.as_mut().ok_or_else(|| MixdeckError::Graph {
            reason: "no master bus; load a timeline first".to_string(),
        })?;
        master.ramp_to(&mut self.graph, level)
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub fn transport(&self) -> &TransportScheduler {
        &self.transport
    }

    pub fn play(&mut self) {
        self.transport.play();
    }

    pub fn pause(&mut self) {
        self.transport.pause();
    }

    pub fn stop(&mut self) {
        self.transport.stop();
    }

    pub fn seek_ms(&mut self, ms: f64) {
        self.transport.seek_ms(ms);
    }

    pub fn set_loop(&mut self, start_ms: f64, end_ms: f64) -> bool {
        self.transport.set_loop(start_ms, end_ms)
    }

    pub fn clear_loop(&mut self) {
        self.transport.clear_loop();
    }

    /// UI refresh; see `TransportScheduler::tick`
    pub fn tick(&mut self) -> f64 {
        self.transport.tick()
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> impl Stream<Item = EngineEvent> + Send + 'static {
        self.events.stream()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render one stereo block and advance the clock by `frames`
    pub fn render(&mut self, frames: usize) -> AudioBuffer {
        let spans = self.transport.advance(frames);

        let mut inputs: HashMap<NodeId, AudioBuffer> = HashMap::new();
        if !spans.is_empty() {
            for clip in &self.clips {
                let Some(bus) = self.buses.get(&clip.track_id) else {
                    continue;
                };
                let block = inputs.entry(bus.input()).or_insert_with(|| {
                    AudioBuffer::new(frames, ChannelLayout::Stereo, self.config.sample_rate)
                });
                for span in &spans {
                    clip.render(&self.transport, span, block);
                }
            }
        }

        self.graph.render(inputs, frames)
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn clips(&self) -> &[ClipPlayer] {
        &self.clips
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Tear down track buses first, then the master
    fn teardown_buses(&mut self) -> Vec<DisposeError> {
        let mut warnings = Vec::new();
        for (_, bus) in self.buses.drain() {
            warnings.extend(bus.teardown(&mut self.graph));
        }
        if let Some(master) = self.master.take() {
            warnings.extend(master.teardown(&mut self.graph));
        }
        warnings
    }

    /// Stop playback and release the whole graph
    ///
    /// Best effort: disposal problems are logged and returned.
    pub fn dispose(&mut self) -> Vec<DisposeError> {
        self.transport.stop();
        let warnings = self.teardown_buses();
        self.clips.clear();
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "graph disposed with warnings");
        }
        warnings
    }
}

impl Default for AudioGraphManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Bus gain for a track: its fader level when audible, the mute floor otherwise
fn bus_level(track: &Track, audible: bool) -> f32 {
    if audible {
        db_to_linear(track.gain_db)
    } else {
        target_gain(false)
    }
}

fn master_pan(effects: &EffectParameters) -> f32 {
    let pan = effects.pan / 100.0;
    if pan.is_finite() {
        pan.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
