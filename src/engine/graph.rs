//! Processing node arena
//!
//! Nodes own a `ProcessingStage` and at most one output port. The graph
//! enforces the teardown order disconnect → dispose → reconnect: a node
//! with any inbound or outbound link cannot be disposed, and nothing can
//! connect to a node that is missing or already disposed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::trace;

use crate::dsp::stage::ProcessingStage;
use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{DisposeError, MixdeckError, Result};

/// Handle to a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a node's output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Node(NodeId),
    /// The hardware output
    Destination,
}

struct GraphNode {
    stage: Box<dyn ProcessingStage>,
    output: Option<Port>,
}

/// Arena of processing nodes with explicit wiring
pub struct AudioGraph {
    nodes: HashMap<NodeId, GraphNode>,
    disposed: HashSet<NodeId>,
    next_id: u64,
    sample_rate: u32,
    max_block_size: usize,
}

impl fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGraph")
            .field("nodes", &self.nodes.len())
            .field("disposed", &self.disposed.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl AudioGraph {
    pub fn new(sample_rate: u32, max_block_size: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            disposed: HashSet::new(),
            next_id: 1,
            sample_rate,
            max_block_size,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add an unconnected node
    pub fn add_node(&mut self, mut stage: Box<dyn ProcessingStage>) -> NodeId {
        stage.prepare(self.sample_rate, self.max_block_size);
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, GraphNode { stage, output: None });
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_disposed(&self, id: NodeId) -> bool {
        self.disposed.contains(&id)
    }

    pub fn stage(&self, id: NodeId) -> Option<&dyn ProcessingStage> {
        self.nodes.get(&id).map(|n| n.stage.as_ref())
    }

    pub fn stage_mut(&mut self, id: NodeId) -> Option<&mut (dyn ProcessingStage + 'static)> {
        self.nodes.get_mut(&id).map(|n| n.stage.as_mut())
    }

    /// Set one parameter on a node's stage
    pub fn set_parameter(&mut self, id: NodeId, name: &str, value: f32) -> Result<()> {
        let stage = self.stage_mut(id).ok_or_else(|| MixdeckError::Graph {
            reason: format!("node {} does not exist", id),
        })?;
        stage.set_parameter(name, value)
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    pub fn output_of(&self, id: NodeId) -> Option<Port> {
        self.nodes.get(&id).and_then(|n| n.output)
    }

    /// Nodes whose output feeds `id`
    pub fn inputs_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut inputs: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.output == Some(Port::Node(id)))
            .map(|(from, _)| *from)
            .collect();
        inputs.sort();
        inputs
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.output_of(id).is_some() || !self.inputs_of(id).is_empty()
    }

    fn missing(&self, id: NodeId) -> MixdeckError {
        let state = if self.disposed.contains(&id) {
            "was disposed"
        } else {
            "does not exist"
        };
        MixdeckError::Graph {
            reason: format!("node {} {}", id, state),
        }
    }

    /// Connect `from`'s output to `to`
    ///
    /// Fails when either node is missing or disposed, when `from` already has
    /// an output, or when the link would close a cycle.
    pub fn connect(&mut self, from: NodeId, to: Port) -> Result<()> {
        if !self.nodes.contains_key(&from) {
            return Err(self.missing(from));
        }
        if let Port::Node(target) = to {
            if !self.nodes.contains_key(&target) {
                return Err(self.missing(target));
            }
            if self.reaches(target, from) {
                return Err(MixdeckError::Graph {
                    reason: format!("connecting {} to {} would create a cycle", from, target),
                });
            }
        }

        let node = self.nodes.get_mut(&from).ok_or_else(|| MixdeckError::Graph {
            reason: format!("node {} does not exist", from),
        })?;
        if let Some(existing) = node.output {
            return Err(MixdeckError::Graph {
                reason: format!("node {} is already connected to {:?}", from, existing),
            });
        }
        node.output = Some(to);
        trace!(%from, ?to, "connect");
        Ok(())
    }

    /// Remove `from`'s output link, returning where it went
    pub fn disconnect(&mut self, from: NodeId) -> Result<Option<Port>> {
        if !self.nodes.contains_key(&from) {
            return Err(self.missing(from));
        }
        let previous = self.nodes.get_mut(&from).and_then(|n| n.output.take());
        trace!(%from, ?previous, "disconnect");
        Ok(previous)
    }

    /// Follow output links from `start` and check whether `target` is hit
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut current = Some(start);
        let mut steps = 0;
        while let Some(id) = current {
            if id == target {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return true;
            }
            current = match self.output_of(id) {
                Some(Port::Node(next)) => Some(next),
                _ => None,
            };
        }
        false
    }

    /// Release a node
    ///
    /// The node must already be disconnected on both sides.
    pub fn dispose(&mut self, id: NodeId) -> std::result::Result<(), DisposeError> {
        if self.disposed.contains(&id) {
            return Err(DisposeError::AlreadyDisposed(id.0));
        }
        if !self.nodes.contains_key(&id) {
            return Err(DisposeError::NotFound(id.0));
        }
        if self.is_connected(id) {
            return Err(DisposeError::StillConnected(id.0));
        }

        let mut node = match self.nodes.remove(&id) {
            Some(node) => node,
            None => return Err(DisposeError::NotFound(id.0)),
        };
        self.disposed.insert(id);
        node.stage.dispose()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Nodes ordered so every node comes after all of its inputs
    fn processing_order(&self) -> Vec<NodeId> {
        let mut pending: HashMap<NodeId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
        for node in self.nodes.values() {
            if let Some(Port::Node(to)) = node.output {
                if let Some(count) = pending.get_mut(&to) {
                    *count += 1;
                }
            }
        }

        let mut ready: Vec<NodeId> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_by(|a, b| b.cmp(a));

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            if let Some(Port::Node(to)) = self.output_of(id) {
                if let Some(count) = pending.get_mut(&to) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(to);
                    }
                }
            }
        }
        order
    }

    /// Pull one stereo block through every node
    ///
    /// `inputs` are added at the input of the given nodes before they
    /// process. Returns the sum of everything connected to the destination.
    pub fn render(&mut self, mut inputs: HashMap<NodeId, AudioBuffer>, frames: usize) -> AudioBuffer {
        let sample_rate = self.sample_rate;
        let silent = move || AudioBuffer::new(frames, ChannelLayout::Stereo, sample_rate);
        let mut destination = silent();

        for id in self.processing_order() {
            let mut block = inputs.remove(&id).unwrap_or_else(silent);
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.stage.process(&mut block);

            let target = match node.output {
                Some(Port::Node(to)) => inputs.entry(to).or_insert_with(silent),
                Some(Port::Destination) => &mut destination,
                None => continue,
            };
            mix_into(target, &block);
        }

        destination
    }
}

/// Add `src` onto `dst` sample by sample
fn mix_into(dst: &mut AudioBuffer, src: &AudioBuffer) {
    for (ch, channel) in dst.samples.iter_mut().enumerate() {
        for (i, sample) in channel.iter_mut().enumerate() {
            *sample += src.sample_for_output(ch, i);
        }
    }
}
