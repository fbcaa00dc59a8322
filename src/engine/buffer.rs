//! Audio Buffer Management
//!
//! The engine's sample container plus level helpers. Buffers are stored
//! non-interleaved as 32-bit float, one `Vec<f32>` per channel.

use serde::{Deserialize, Serialize};

use crate::error::{MixdeckError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
///
/// `db_to_linear(0.0) == 1.0` and the mapping is strictly increasing.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns `-f32::INFINITY` for zero or negative input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Convert a millisecond position to a frame index at `sample_rate`
#[inline]
pub fn ms_to_frames(ms: f64, sample_rate: u32) -> usize {
    if ms <= 0.0 {
        return 0;
    }
    (ms / 1000.0 * sample_rate as f64).round() as usize
}

/// Convert a frame count to milliseconds at `sample_rate`
#[inline]
pub fn frames_to_ms(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 * 1000.0 / sample_rate as f64
}

/// RMS level of a buffer in dB
///
/// Returns `-f32::INFINITY` for empty or silent buffers.
pub fn calculate_rms(buffer: &AudioBuffer) -> f32 {
    let total_samples = buffer.num_channels() * buffer.num_samples();
    if total_samples == 0 {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();

    let rms = (sum_squares / total_samples as f64).sqrt() as f32;
    linear_to_db(rms)
}

/// Peak level of a buffer in dB
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    linear_to_db(buffer.peak())
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Decoded audio: one sample vector per channel
///
/// # Example
/// ```
/// use mixdeck::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// let buffer = AudioBuffer::new(44100, ChannelLayout::Stereo, 44100);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 44100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer
    pub fn new(num_samples: usize, layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; layout.num_channels()],
            sample_rate,
        }
    }

    /// Create a buffer from per-channel vectors
    ///
    /// All channels must have the same length.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if let Some(first) = samples.first() {
            let len = first.len();
            if samples.iter().any(|ch| ch.len() != len) {
                return Err(MixdeckError::InvalidAudio {
                    reason: "channels have different lengths".to_string(),
                });
            }
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create an audio buffer from interleaved sample data
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let num_channels = layout.num_channels();

        if interleaved.len() % num_channels != 0 {
            return Err(MixdeckError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
            });
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Samples in interleaved order (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.channels();
        let num_samples = self.len();

        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels()
    }

    /// Number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.len()
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn duration_ms(&self) -> f64 {
        self.duration_secs() * 1000.0
    }

    pub fn channel_layout(&self) -> Option<ChannelLayout> {
        ChannelLayout::from_count(self.channels())
    }

    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Sample for an output channel, reusing channel 0 for mono sources
    #[inline]
    pub fn sample_for_output(&self, output_channel: usize, index: usize) -> f32 {
        let channel = output_channel.min(self.channels().saturating_sub(1));
        self.samples
            .get(channel)
            .and_then(|ch| ch.get(index).copied())
            .unwrap_or(0.0)
    }

    #[inline]
    pub fn get_sample(&self, channel: usize, index: usize) -> Option<f32> {
        self.samples
            .get(channel)
            .and_then(|ch| ch.get(index).copied())
    }

    /// Largest absolute sample value (linear)
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Check that every sample is finite
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Rescale so the loudest sample sits exactly at `target`
    ///
    /// Each sample is divided by the current peak before multiplying, so the
    /// peak sample lands on `target` without rounding. Silence is untouched.
    pub fn normalize_to(&mut self, target: f32) {
        let peak = self.peak();
        if peak == 0.0 || !peak.is_finite() {
            return;
        }
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample = *sample / peak * target;
            }
        }
    }

    /// Multiply every sample by a linear factor
    pub fn scale(&mut self, factor: f32) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample *= factor;
            }
        }
    }

    /// Apply gain in decibels
    pub fn apply_gain(&mut self, gain_db: f32) {
        self.scale(db_to_linear(gain_db));
    }

    /// Fill every channel with silence, keeping the length
    pub fn clear(&mut self) {
        for channel in &mut self.samples {
            channel.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    /// Stereo copy of this buffer; mono is duplicated to both sides
    pub fn to_stereo(&self) -> AudioBuffer {
        match self.channels() {
            0 => AudioBuffer::new(0, ChannelLayout::Stereo, self.sample_rate),
            1 => AudioBuffer {
                samples: vec![self.samples[0].clone(), self.samples[0].clone()],
                sample_rate: self.sample_rate,
            },
            _ => AudioBuffer {
                samples: self.samples[..2].to_vec(),
                sample_rate: self.sample_rate,
            },
        }
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(0, ChannelLayout::Stereo, crate::config::DEFAULT_SAMPLE_RATE)
    }
}

// ============================================================================
// Audio Info
// ============================================================================

/// Summary of a decoded source, as reported by `mixdeck-cli info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub duration_ms: f64,
    pub channels: usize,
    pub sample_rate: u32,
    pub frame_count: usize,
    /// Peak level in dBFS; `None` for silence
    pub peak_dbfs: Option<f32>,
    /// RMS level in dBFS; `None` for silence
    pub rms_dbfs: Option<f32>,
}

impl AudioInfo {
    pub fn from_buffer(buffer: &AudioBuffer) -> Self {
        let finite = |db: f32| db.is_finite().then_some(db);
        Self {
            duration_ms: buffer.duration_ms(),
            channels: buffer.channels(),
            sample_rate: buffer.sample_rate,
            frame_count: buffer.len(),
            peak_dbfs: finite(calculate_peak(buffer)),
            rms_dbfs: finite(calculate_rms(buffer)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
