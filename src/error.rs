//! Error handling for Mixdeck
//!
//! Graph-build and export failures surface as `MixdeckError`. Node disposal
//! failures use the separate `DisposeError`, which teardown paths collect as
//! warnings instead of propagating.

use thiserror::Error;

/// Result type alias for Mixdeck operations
pub type Result<T> = std::result::Result<T, MixdeckError>;

/// Main error type for Mixdeck operations
#[derive(Error, Debug)]
pub enum MixdeckError {
    // Timeline Errors
    #[error("Segment {segment_id} references track {track_id}, which has no bus")]
    MissingTrackBus { segment_id: String, track_id: String },

    #[error("Track not found: {track_id}")]
    TrackNotFound { track_id: String },

    #[error("Invalid segment {segment_id}: {reason}")]
    InvalidSegment { segment_id: String, reason: String },

    #[error("Invalid parameter {param}={value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // Audio Errors
    #[error("Invalid audio: {reason}")]
    InvalidAudio { reason: String },

    // Graph Errors
    #[error("Audio graph error: {reason}")]
    Graph { reason: String },

    // Source Errors
    #[error("Failed to decode source {url}: {reason}")]
    SourceDecode { url: String, reason: String },

    // Export Errors
    #[error("Export failed during {stage}: {reason}")]
    Export { stage: String, reason: String },

    #[error("Unsupported export format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Codec service unavailable: {reason}")]
    CodecUnavailable { reason: String },

    #[error("Codec service returned an error: {reason}")]
    CodecFailed { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MixdeckError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            MixdeckError::MissingTrackBus { .. } => "MISSING_TRACK_BUS",
            MixdeckError::TrackNotFound { .. } => "TRACK_NOT_FOUND",
            MixdeckError::InvalidSegment { .. } => "INVALID_SEGMENT",
            MixdeckError::InvalidParameter { .. } => "INVALID_PARAMETER",
            MixdeckError::InvalidAudio { .. } => "INVALID_AUDIO",
            MixdeckError::Graph { .. } => "GRAPH_ERROR",
            MixdeckError::SourceDecode { .. } => "SOURCE_DECODE",
            MixdeckError::Export { .. } => "EXPORT_FAILED",
            MixdeckError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            MixdeckError::CodecUnavailable { .. } => "CODEC_UNAVAILABLE",
            MixdeckError::CodecFailed { .. } => "CODEC_FAILED",
            MixdeckError::Io(_) => "IO_ERROR",
            MixdeckError::Wav(_) => "WAV_ERROR",
            MixdeckError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the engine can keep running after this error
    ///
    /// A missing track bus means the timeline itself is inconsistent, so the
    /// load that raised it cannot be retried without new input.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MixdeckError::MissingTrackBus { .. } => false,
            MixdeckError::Graph { .. } => false,
            MixdeckError::Io(_) => false,
            _ => true,
        }
    }

    /// Wrap any error as an export failure at the given stage
    pub fn export(stage: &str, err: impl std::fmt::Display) -> Self {
        MixdeckError::Export {
            stage: stage.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Failure to release a processing node
///
/// Never aborts a teardown: callers collect these and keep disposing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisposeError {
    #[error("node {0} does not exist")]
    NotFound(u64),

    #[error("node {0} is still connected")]
    StillConnected(u64),

    #[error("node {0} was already disposed")]
    AlreadyDisposed(u64),

    #[error("stage {kind} failed to release: {reason}")]
    Stage { kind: &'static str, reason: String },
}
