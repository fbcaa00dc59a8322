//! Source decoding
//!
//! Sources are referenced by URL in the timeline and decoded once per load.
//! `WavFileLoader` reads WAV files from disk on the blocking pool;
//! `MemorySourceLoader` serves pre-decoded buffers (tests, generated audio).

use std::collections::HashMap;
use std::future::Future;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hound::{SampleFormat, WavReader};
use tracing::{debug, warn};

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{MixdeckError, Result};

/// Something that can turn a source URL into decoded audio
pub trait SourceLoader: Send + Sync {
    fn load(&self, url: &str) -> impl Future<Output = Result<Arc<AudioBuffer>>> + Send;
}

fn decode_error(url: &str, reason: impl std::fmt::Display) -> MixdeckError {
    MixdeckError::SourceDecode {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// WAV decoding
// ============================================================================

/// Decode a WAV stream into a mono or stereo buffer
///
/// Integer formats of 8, 16, 24 and 32 bits and 32-bit float are accepted.
/// More than two channels is rejected.
pub fn decode_wav<R: Read>(reader: WavReader<R>, url: &str) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let layout = ChannelLayout::from_count(spec.channels as usize).ok_or_else(|| {
        decode_error(
            url,
            format!("{}-channel audio (only mono/stereo supported)", spec.channels),
        )
    })?;

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)
        .map_err(|e| decode_error(url, e))?;
    AudioBuffer::from_interleaved(&interleaved, layout, spec.sample_rate)
}

/// Decode WAV bytes held in memory
pub fn decode_wav_bytes(bytes: &[u8], url: &str) -> Result<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| decode_error(url, e))?;
    decode_wav(reader, url)
}

/// Decode a WAV file from disk
pub fn decode_wav_file(path: &Path) -> Result<AudioBuffer> {
    let url = path.display().to_string();
    let reader = WavReader::open(path).map_err(|e| decode_error(&url, e))?;
    decode_wav(reader, &url)
}

/// Read samples and scale them to `-1..1`
fn read_samples_as_f32<R: Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> std::result::Result<Vec<f32>, String> {
    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| format!("failed to read float samples: {}", e)),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8_388_608.0,
                32 => 2_147_483_648.0,
                other => return Err(format!("{}-bit integer audio is not supported", other)),
            };
            // hound widens every integer depth to i32
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| format!("failed to read {}-bit samples: {}", bits_per_sample, e))
        }
    }
}

// ============================================================================
// Loaders
// ============================================================================

/// Loads WAV files, resolving relative URLs against a root directory
#[derive(Debug, Clone)]
pub struct WavFileLoader {
    root: PathBuf,
    sample_rate: u32,
}

impl WavFileLoader {
    pub fn new(root: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            root: root.into(),
            sample_rate,
        }
    }

    /// Map a source URL onto a path under the root
    ///
    /// `file://` prefixes are stripped; absolute paths are used as-is.
    pub fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl SourceLoader for WavFileLoader {
    async fn load(&self, url: &str) -> Result<Arc<AudioBuffer>> {
        let path = self.resolve(url);
        if !path.exists() {
            return Err(decode_error(url, format!("file not found: {}", path.display())));
        }

        let buffer = tokio::task::spawn_blocking(move || decode_wav_file(&path))
            .await
            .map_err(|e| decode_error(url, e))??;

        if buffer.sample_rate != self.sample_rate {
            warn!(
                url,
                source_rate = buffer.sample_rate,
                engine_rate = self.sample_rate,
                "source sample rate differs from engine rate; playing without conversion"
            );
        }
        debug!(url, frames = buffer.len(), channels = buffer.channels(), "decoded source");
        Ok(Arc::new(buffer))
    }
}

/// Serves buffers registered in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySourceLoader {
    sources: HashMap<String, Arc<AudioBuffer>>,
}

impl MemorySourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, buffer: AudioBuffer) {
        self.sources.insert(url.into(), Arc::new(buffer));
    }

    pub fn with_source(mut self, url: impl Into<String>, buffer: AudioBuffer) -> Self {
        self.insert(url, buffer);
        self
    }

    pub fn get(&self, url: &str) -> Option<Arc<AudioBuffer>> {
        self.sources.get(url).cloned()
    }
}

impl SourceLoader for MemorySourceLoader {
    async fn load(&self, url: &str) -> Result<Arc<AudioBuffer>> {
        self.get(url)
            .ok_or_else(|| decode_error(url, "no source registered for this url"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, bits: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        let max = (1i32 << (bits - 1)) - 1;
        for i in 0..frames {
            for ch in 0..channels {
                let value = if ch == 0 { max / 2 } else { -(max / 4) };
                let value = if i % 2 == 0 { value } else { -value };
                match bits {
                    16 => writer.write_sample(value as i16).unwrap(),
                    _ => writer.write_sample(value).unwrap(),
                }
            }
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_wav_loader_decodes_stereo_16bit() {
        let dir = tempdir().unwrap();
        write_wav(&dir.path().join("clip.wav"), 2, 16, 100);

        let loader = WavFileLoader::new(dir.path(), 8000);
        let buffer = loader.load("clip.wav").await.unwrap();
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.sample_rate, 8000);
        assert!((buffer.samples[0][0] - 0.5).abs() < 1e-3);
        assert!((buffer.samples[1][0] + 0.25).abs() < 1e-3);
        assert!((buffer.samples[0][1] + 0.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_wav_loader_decodes_24bit_mono() {
        let dir = tempdir().unwrap();
        write_wav(&dir.path().join("deep.wav"), 1, 24, 10);

        let loader = WavFileLoader::new(dir.path(), 8000);
        let buffer = loader.load("file://deep.wav").await.unwrap();
        assert_eq!(buffer.channels(), 1);
        assert!((buffer.samples[0][0] - 0.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_missing_file_is_decode_error() {
        let dir = tempdir().unwrap();
        let loader = WavFileLoader::new(dir.path(), 8000);
        let err = loader.load("nope.wav").await.unwrap_err();
        assert_eq!(err.error_code(), "SOURCE_DECODE");
    }

    #[tokio::test]
    async fn test_garbage_bytes_are_decode_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.wav"), b"definitely not a wav").unwrap();
        let loader = WavFileLoader::new(dir.path(), 8000);
        assert!(loader.load("bad.wav").await.is_err());
    }

    #[test]
    fn test_multichannel_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("surround.wav");
        write_wav(&path, 4, 16, 10);
        let err = decode_wav_file(&path).unwrap_err();
        assert!(err.to_string().contains("4-channel"));
    }

    #[test]
    fn test_resolve_paths() {
        let loader = WavFileLoader::new("/data/sources", 44100);
        assert_eq!(loader.resolve("a.wav"), PathBuf::from("/data/sources/a.wav"));
        assert_eq!(loader.resolve("/abs/b.wav"), PathBuf::from("/abs/b.wav"));
        assert_eq!(loader.resolve("file:///abs/c.wav"), PathBuf::from("/abs/c.wav"));
    }

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemorySourceLoader::new().with_source(
            "mem://tone",
            AudioBuffer::new(16, ChannelLayout::Mono, 44100),
        );
        assert_eq!(loader.load("mem://tone").await.unwrap().len(), 16);
        assert!(loader.load("mem://other").await.is_err());
    }
}
