//! Mixdeck - multi-track playback and mixdown engine
//!
//! Turns a declarative timeline (tracks, clips, effect parameters) into
//! either a live block-rendered processing graph or a deterministic offline
//! mixdown for export.
//!
//! # Architecture
//!
//! - `timeline`: serializable data model and clip placement
//! - `engine`: audio graph, buses, transport clock and source decoding
//! - `dsp`: processing stages and the effect chain builder
//! - `export`: offline mixdown, WAV encoding and the codec hand-off
//! - `cli`: argument parsing and commands behind `mixdeck-cli`

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod export;
pub mod timeline;

pub use config::EngineConfig;
pub use error::{DisposeError, MixdeckError, Result};
