//! CLI Module
//!
//! Command-line front end for offline renders and timeline tooling.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mixdeck - multi-track mixdown engine
#[derive(Parser, Debug)]
#[command(name = "mixdeck-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mix a timeline down to a file
    #[command(name = "render")]
    Render {
        /// Timeline JSON (a serialized Version)
        #[arg(short, long)]
        timeline: PathBuf,

        /// Directory that relative source URLs resolve against
        #[arg(short, long)]
        sources: PathBuf,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,

        /// Output format: wav, mp3 or ogg
        #[arg(short, long, default_value = "wav")]
        format: String,

        /// Codec bitrate for compressed formats, e.g. 192k
        #[arg(short, long)]
        bitrate: Option<String>,
    },

    /// Print metadata of a WAV file as JSON
    #[command(name = "info")]
    Info {
        /// WAV file to inspect
        path: PathBuf,
    },

    /// Resolve where a clip would land on a track
    #[command(name = "place")]
    Place {
        /// Timeline JSON (a serialized Version)
        #[arg(short, long)]
        timeline: PathBuf,

        /// Track id
        #[arg(long)]
        track: String,

        /// Desired start in milliseconds
        #[arg(long)]
        start: f64,

        /// Clip duration in milliseconds
        #[arg(long)]
        duration: f64,
    },
}
