//! Engine configuration
//!
//! Defaults match a browser audio context at 44.1kHz. Deployment-specific
//! values (codec endpoint, timeouts) can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::env;

/// Default engine sample rate (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default codec service endpoint
pub const DEFAULT_CODEC_URL: &str = "http://localhost:5000";

/// Runtime configuration for the engine and exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Sample rate shared by the live graph and the mixdown
    pub sample_rate: u32,
    /// Frames rendered per graph pull
    pub block_size: usize,
    /// How far in the future `play()` starts the clock
    pub render_ahead_ms: f64,
    /// Re-sync delay applied when seeking during playback
    pub jog_latency_ms: f64,
    /// Capacity of the engine event broadcast channel
    pub event_capacity: usize,
    /// Base URL of the codec service
    pub codec_url: String,
    /// Request timeout for the codec service
    pub codec_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: 512,
            render_ahead_ms: 100.0,
            jog_latency_ms: 10.0,
            event_capacity: 256,
            codec_url: DEFAULT_CODEC_URL.to_string(),
            codec_timeout_ms: 120_000,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults plus `MIXDECK_*` environment overrides
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(rate) = env::var("MIXDECK_SAMPLE_RATE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.sample_rate = rate;
        }
        if let Ok(url) = env::var("MIXDECK_CODEC_URL") {
            config.codec_url = url;
        }
        if let Some(timeout) = env::var("MIXDECK_CODEC_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.codec_timeout_ms = timeout;
        }

        config
    }

    /// Render-ahead expressed in frames at the configured sample rate
    pub fn render_ahead_frames(&self) -> u64 {
        (self.render_ahead_ms / 1000.0 * self.sample_rate as f64).round() as u64
    }

    /// Jog latency expressed in frames at the configured sample rate
    pub fn jog_latency_frames(&self) -> u64 {
        (self.jog_latency_ms / 1000.0 * self.sample_rate as f64).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.render_ahead_frames(), 4410);
        assert_eq!(config.jog_latency_frames(), 441);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"sampleRate": 48000}"#).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.block_size, 512);
        assert_eq!(config.codec_url, DEFAULT_CODEC_URL);
    }
}
