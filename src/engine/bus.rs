//! Mixer buses
//!
//! A bus is `gain → chain → pan`, with the pan node feeding the next bus
//! (or the destination for the master). Track buses and the master bus
//! are built the same way.

use tracing::{debug, warn};

use crate::dsp::chain::{build_chain, effect_specs, EffectSpec};
use crate::dsp::gain::BusGain;
use crate::dsp::pan::Panner;
use crate::dsp::stage::StageKind;
use crate::engine::graph::{AudioGraph, NodeId, Port};
use crate::error::{DisposeError, Result};
use crate::timeline::{EffectParameters, EnabledEffects};

/// How a chain change was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainUpdate {
    /// Same stage kinds; parameters were pushed into the existing nodes
    InPlace,
    /// Old nodes were torn down and a new chain was built
    Rebuilt {
        skipped: Vec<StageKind>,
        dispose_warnings: Vec<DisposeError>,
    },
}

/// Handles to the nodes of one bus
#[derive(Debug, Clone)]
pub struct Bus {
    gain: NodeId,
    chain: Vec<NodeId>,
    chain_kinds: Vec<StageKind>,
    pan: NodeId,
    /// Last gain target written to the gain node
    level: f32,
}

impl Bus {
    /// Build and wire a bus whose output feeds `output`
    ///
    /// The gain node starts at `level` without a ramp.
    pub fn build(
        graph: &mut AudioGraph,
        params: &EffectParameters,
        enabled: &EnabledEffects,
        level: f32,
        pan: f32,
        output: Port,
    ) -> Result<Self> {
        let panner = Panner::new(pan)?;
        let gain = graph.add_node(Box::new(BusGain::new(level, graph.sample_rate())));
        let pan = graph.add_node(Box::new(panner));

        let mut bus = Self {
            gain,
            chain: Vec::new(),
            chain_kinds: Vec::new(),
            pan,
            level,
        };
        let specs = effect_specs(params, enabled);
        bus.install_chain(graph, &specs)?;
        graph.connect(pan, output)?;
        Ok(bus)
    }

    /// Node that receives the bus input
    pub fn input(&self) -> NodeId {
        self.gain
    }

    /// Node whose output leaves the bus
    pub fn output(&self) -> NodeId {
        self.pan
    }

    pub fn chain_kinds(&self) -> &[StageKind] {
        &self.chain_kinds
    }

    pub fn chain_nodes(&self) -> &[NodeId] {
        &self.chain
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Every node of the bus, in signal order
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = Vec::with_capacity(self.chain.len() + 2);
        nodes.push(self.gain);
        nodes.extend_from_slice(&self.chain);
        nodes.push(self.pan);
        nodes
    }

    /// Ramp the bus gain toward a level
    ///
    /// Cancels any running ramp and starts from the current value.
    pub fn ramp_to(&mut self, graph: &mut AudioGraph, level: f32) -> Result<()> {
        graph.set_parameter(self.gain, "gain", level)?;
        self.level = level;
        Ok(())
    }

    /// Pan position in `-1..=1`
    pub fn set_pan(&mut self, graph: &mut AudioGraph, pan: f32) -> Result<()> {
        graph.set_parameter(self.pan, "pan", pan)
    }

    /// Build the chain nodes and wire `gain → chain → pan`
    fn install_chain(&mut self, graph: &mut AudioGraph, specs: &[EffectSpec]) -> Result<Vec<StageKind>> {
        let built = build_chain(specs, graph.sample_rate(), graph.max_block_size());
        self.chain_kinds = built.kinds();
        self.chain = built
            .stages
            .into_iter()
            .map(|stage| graph.add_node(stage))
            .collect();

        let mut previous = self.gain;
        for &node in &self.chain {
            graph.connect(previous, Port::Node(node))?;
            previous = node;
        }
        graph.connect(previous, Port::Node(self.pan))?;
        Ok(built.skipped)
    }

    /// Apply a new effect parameter set
    ///
    /// When the resulting stage kinds match the current chain, parameters are
    /// updated in place. Otherwise the old chain is disconnected, disposed,
    /// and a fresh chain is wired between gain and pan.
    pub fn set_effects(
        &mut self,
        graph: &mut AudioGraph,
        params: &EffectParameters,
        enabled: &EnabledEffects,
    ) -> Result<ChainUpdate> {
        let specs = effect_specs(params, enabled);
        let kinds: Vec<StageKind> = specs.iter().map(EffectSpec::kind).collect();

        if kinds == self.chain_kinds {
            for (spec, &node) in specs.iter().zip(&self.chain) {
                let Some(stage) = graph.stage_mut(node) else {
                    continue;
                };
                if let Err(e) = spec.apply_to(stage) {
                    warn!(stage = %spec.kind(), error = %e, "effect parameter update rejected");
                }
            }
            debug!(stages = kinds.len(), "effect chain updated in place");
            return Ok(ChainUpdate::InPlace);
        }

        // Disconnect
        graph.disconnect(self.gain)?;
        for &node in &self.chain {
            graph.disconnect(node)?;
        }

        // Dispose
        let mut dispose_warnings = Vec::new();
        for node in self.chain.drain(..) {
            if let Err(e) = graph.dispose(node) {
                warn!(error = %e, "failed to dispose effect node");
                dispose_warnings.push(e);
            }
        }
        self.chain_kinds.clear();

        // Reconnect
        let skipped = self.install_chain(graph, &specs)?;
        debug!(stages = self.chain.len(), "effect chain rebuilt");
        Ok(ChainUpdate::Rebuilt {
            skipped,
            dispose_warnings,
        })
    }

    /// Disconnect and dispose every node of the bus
    ///
    /// Best effort: failures are returned and the remaining nodes are still
    /// released.
    pub fn teardown(self, graph: &mut AudioGraph) -> Vec<DisposeError> {
        let nodes = self.nodes();
        for &node in &nodes {
            // A node that is already gone has nothing to disconnect
            let _ = graph.disconnect(node);
        }

        let mut warnings = Vec::new();
        for node in nodes {
            if let Err(e) = graph.dispose(node) {
                warn!(error = %e, "failed to dispose bus node");
                warnings.push(e);
            }
        }
        warnings
    }
}
