//! Audio Engine Module
//!
//! Live playback side of Mixdeck:
//! - Audio buffers and level helpers
//! - Node graph, mixer buses and the graph manager
//! - Transport clock and clip players
//! - Source decoding and engine events

pub mod buffer;
pub mod bus;
pub mod events;
pub mod graph;
pub mod manager;
pub mod solo;
pub mod source;
pub mod transport;

pub use buffer::{AudioBuffer, AudioInfo, ChannelLayout};
pub use bus::{Bus, ChainUpdate};
pub use events::{EngineEvent, EventBus};
pub use graph::{AudioGraph, NodeId, Port};
pub use manager::{AudioGraphManager, LoadReport};
pub use solo::{is_audible, resolve_audibility, target_gain};
pub use source::{MemorySourceLoader, SourceLoader, WavFileLoader};
pub use transport::{fade_envelope, ClipPlayer, TransportScheduler, TransportState};
