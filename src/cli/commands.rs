//! CLI Command Implementations

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::buffer::AudioInfo;
use crate::engine::source::{decode_wav_file, WavFileLoader};
use crate::export::{collect_tracks, export_audio, ExportArtifact, ExportFormat, ExportOptions, HttpCodecClient};
use crate::timeline::{resolve_segment_start, Segment, TrackId, Version};

/// Read and validate a timeline JSON file
pub fn load_version(path: &Path) -> Result<Version> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read timeline {}", path.display()))?;
    let version: Version = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse timeline {}", path.display()))?;
    version.validate()?;
    Ok(version)
}

/// Mix a timeline down and write the encoded file
pub async fn render(
    config: &EngineConfig,
    timeline: &Path,
    sources: &Path,
    out: &Path,
    format: &str,
    bitrate: Option<String>,
) -> Result<ExportArtifact> {
    let version = load_version(timeline)?;
    let format: ExportFormat = format.parse()?;
    info!(timeline = %timeline.display(), %format, "rendering timeline");

    let loader = WavFileLoader::new(sources, config.sample_rate);
    let tracks = collect_tracks(&version, &loader).await?;

    let mut options = ExportOptions::new(format, config.sample_rate);
    options.bitrate = bitrate;

    // An unset length renders up to the last clip
    let length_ms = if version.length_ms > 0.0 {
        version.length_ms
    } else {
        version.content_end_ms()
    };

    let codec = HttpCodecClient::from_config(config);
    let artifact = export_audio(&tracks, length_ms, &version.master_chain, &options, &codec).await?;

    tokio::fs::write(out, &artifact.bytes)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;

    println!("Rendered: {}", out.display());
    println!("Format: {}", artifact.format);
    println!("Bytes: {}", artifact.bytes.len());
    println!("SHA-256: {}", artifact.sha256);

    Ok(artifact)
}

/// Describe a WAV file
pub fn info(path: &Path) -> Result<AudioInfo> {
    let buffer = decode_wav_file(path)?;
    let info = AudioInfo::from_buffer(&buffer);
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(info)
}

/// Resolve the start of a clip dropped onto a track
pub fn place(timeline: &Path, track: &str, start_ms: f64, duration_ms: f64) -> Result<f64> {
    let version = load_version(timeline)?;
    let resolved = resolve_on_track(&version, track, start_ms, duration_ms)?;
    println!("{}", resolved);
    Ok(resolved)
}

fn resolve_on_track(version: &Version, track: &str, start_ms: f64, duration_ms: f64) -> Result<f64> {
    let id = TrackId::from(track);
    if version.track(&id).is_none() {
        bail!("track {} is not in the timeline", track);
    }
    if duration_ms.is_nan() || duration_ms <= 0.0 {
        bail!("duration must be positive, got {}", duration_ms);
    }
    let segments: Vec<Segment> = version.segments_for(&id).into_iter().cloned().collect();
    Ok(resolve_segment_start(&segments, start_ms.max(0.0), duration_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{SourceRef, Track};
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn version() -> Version {
        Version::new(120.0, 1000.0)
            .with_track(Track::new("t", "Track"))
            .with_segment(Segment::new("a", TrackId::from("t"), SourceRef::new("tone.wav"), 0.0, 1000.0))
            .with_segment(Segment::new("b", TrackId::from("t"), SourceRef::new("tone.wav"), 2000.0, 500.0))
    }

    #[test]
    fn test_resolve_on_track() {
        let version = version();
        assert_eq!(resolve_on_track(&version, "t", 1500.0, 500.0).unwrap(), 1500.0);
        assert!(resolve_on_track(&version, "missing", 0.0, 100.0).is_err());
        assert!(resolve_on_track(&version, "t", 0.0, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_render_writes_wav() {
        let dir = tempdir().unwrap();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(dir.path().join("tone.wav"), spec).unwrap();
        for _ in 0..8000 {
            writer.write_sample(8000i16).unwrap();
        }
        writer.finalize().unwrap();

        let timeline = dir.path().join("song.json");
        std::fs::write(&timeline, serde_json::to_string(&version()).unwrap()).unwrap();

        let config = EngineConfig {
            sample_rate: 8000,
            ..EngineConfig::default()
        };
        let out = dir.path().join("mix.wav");
        let artifact = render(&config, &timeline, dir.path(), &out, "wav", None)
            .await
            .unwrap();

        let written = std::fs::read(&out).unwrap();
        assert_eq!(written, artifact.bytes);
        let reader = hound::WavReader::open(&out).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 8000);
    }

    #[test]
    fn test_info_reports_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..(2 * 2205) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let info = info(&path).unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 22050);
        assert_eq!(info.frame_count, 2205);
        assert!((info.duration_ms - 100.0).abs() < 1e-9);
    }
}
