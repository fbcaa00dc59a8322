//! Offline mixdown and export
//!
//! Export never touches the live graph. Tracks are mixed straight from the
//! decoded sources into a stereo buffer, the master pitch/volume/reverb are
//! rendered offline, and the result is encoded as 16-bit WAV. MP3 and OGG
//! go through the codec service.

pub mod codec;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::dsp::convolution::{fft_convolve, impulse_response, IMPULSE_SECONDS};
use crate::dsp::pan::pan_gains;
use crate::dsp::pitch::{resample_by_rate, semitones_to_rate};
use crate::engine::buffer::{db_to_linear, ms_to_frames, AudioBuffer, ChannelLayout};
use crate::engine::solo::is_audible;
use crate::engine::source::SourceLoader;
use crate::engine::transport::fade_envelope;
use crate::error::{MixdeckError, Result};
use crate::timeline::{EffectParam, EffectParameters, Segment, Track, Version};

pub use codec::{CodecRequest, CodecService, HttpCodecClient};

/// Mix peak after normalization of an overloaded mix
pub const NORMALIZE_PEAK: f32 = 0.95;

// ============================================================================
// Formats and options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Wav,
    Mp3,
    Ogg,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Wav => "wav",
            ExportFormat::Mp3 => "mp3",
            ExportFormat::Ogg => "ogg",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Bitrate used when the caller does not pick one
    pub fn default_bitrate(&self) -> Option<&'static str> {
        match self {
            ExportFormat::Wav => None,
            ExportFormat::Mp3 => Some("192k"),
            ExportFormat::Ogg => Some("128k"),
        }
    }

    /// Whether encoding is delegated to the codec service
    pub fn needs_codec(&self) -> bool {
        !matches!(self, ExportFormat::Wav)
    }
}

impl FromStr for ExportFormat {
    type Err = MixdeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(ExportFormat::Wav),
            "mp3" => Ok(ExportFormat::Mp3),
            "ogg" => Ok(ExportFormat::Ogg),
            _ => Err(MixdeckError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Codec bitrate such as `320k`; the format default when `None`
    pub bitrate: Option<String>,
    pub sample_rate: u32,
}

impl ExportOptions {
    pub fn new(format: ExportFormat, sample_rate: u32) -> Self {
        Self {
            format,
            bitrate: None,
            sample_rate,
        }
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = Some(bitrate.into());
        self
    }

    fn codec_request(&self) -> CodecRequest {
        CodecRequest {
            format: self.format,
            sample_rate: self.sample_rate,
            bitrate: self
                .bitrate
                .clone()
                .or_else(|| self.format.default_bitrate().map(str::to_string))
                .unwrap_or_default(),
        }
    }
}

/// Final encoded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
    /// Lowercase hex SHA-256 of `bytes`
    pub sha256: String,
}

impl ExportArtifact {
    fn new(bytes: Vec<u8>, format: ExportFormat) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        Self {
            bytes,
            format,
            sha256,
        }
    }

    /// Suggested download name, e.g. `export.mp3`
    pub fn file_name(&self) -> String {
        format!("export.{}", self.format.extension())
    }
}

// ============================================================================
// Mixing
// ============================================================================

/// A track and its segments with decoded audio
#[derive(Debug, Clone)]
pub struct TrackMix {
    pub track: Track,
    pub segments: Vec<(Segment, Arc<AudioBuffer>)>,
}

/// Decode every source a version uses and group segments by track
///
/// Each distinct URL is decoded once. Tracks keep the version's order.
pub async fn collect_tracks<L: SourceLoader>(version: &Version, loader: &L) -> Result<Vec<TrackMix>> {
    let mut decoded: HashMap<&str, Arc<AudioBuffer>> = HashMap::new();
    for segment in &version.segments {
        let url = segment.source.url.as_str();
        if decoded.contains_key(url) {
            continue;
        }
        let buffer = loader
            .load(url)
            .await
            .map_err(|e| MixdeckError::export("decode", e))?;
        decoded.insert(url, buffer);
    }

    if let Some(orphan) = version
        .segments
        .iter()
        .find(|s| version.track(&s.track_id).is_none())
    {
        return Err(MixdeckError::export(
            "mix",
            format!(
                "segment {} references unknown track {}",
                orphan.id, orphan.track_id
            ),
        ));
    }

    Ok(version
        .tracks
        .iter()
        .map(|track| TrackMix {
            track: track.clone(),
            segments: version
                .segments_for(&track.id)
                .into_iter()
                .filter_map(|s| {
                    decoded
                        .get(s.source.url.as_str())
                        .map(|buffer| (s.clone(), Arc::clone(buffer)))
                })
                .collect(),
        })
        .collect())
}

/// Mix tracks into a stereo buffer of `total_length_ms`
///
/// Muted tracks, and unsoloed tracks while anything is soloed, are left
/// out. If the summed peak goes over 1.0 the whole mix is scaled so the
/// peak lands on [`NORMALIZE_PEAK`].
pub fn mix_tracks(tracks: &[TrackMix], total_length_ms: f64, sample_rate: u32) -> AudioBuffer {
    let total_frames = ms_to_frames(total_length_ms, sample_rate);
    let mut out = AudioBuffer::new(total_frames, ChannelLayout::Stereo, sample_rate);
    let any_solo = tracks.iter().any(|t| t.track.solo);

    for mix in tracks {
        if !is_audible(&mix.track, any_solo) {
            debug!(track = %mix.track.id, "skipping inaudible track");
            continue;
        }
        for (segment, source) in &mix.segments {
            let linear = db_to_linear(mix.track.gain_db + segment.gain_db);
            let (left, right) = pan_gains(mix.track.pan);
            mix_segment(&mut out, segment, source, [linear * left, linear * right]);
        }
    }

    let peak = out.peak();
    if peak > 1.0 {
        debug!(peak, "normalizing overloaded mix");
        out.normalize_to(NORMALIZE_PEAK);
    }
    out
}

fn mix_segment(out: &mut AudioBuffer, segment: &Segment, source: &AudioBuffer, gains: [f32; 2]) {
    let src_rate = source.sample_rate;
    let offset = ms_to_frames(segment.start_in_file_ms, src_rate);
    let length = ms_to_frames(segment.duration_ms, src_rate).min(source.len().saturating_sub(offset));
    let fade_in = ms_to_frames(segment.fade_in_ms, src_rate);
    let fade_out = ms_to_frames(segment.fade_out_ms, src_rate);
    let start = ms_to_frames(segment.start_on_timeline_ms, out.sample_rate);

    for local in 0..length {
        let dst = start + local;
        if dst >= out.len() {
            break;
        }
        let env = fade_envelope(local, length, fade_in, fade_out);
        for (ch, gain) in gains.iter().enumerate() {
            out.samples[ch][dst] += source.sample_for_output(ch, offset + local) * gain * env;
        }
    }
}

// ============================================================================
// Master render
// ============================================================================

/// Render master pitch, volume and reverb offline
///
/// Returns the input untouched when all three are at their defaults.
/// Pitch changes playback rate, so the output has `floor(len / rate)`
/// frames. The result is always stereo.
pub fn apply_master_effects<'a>(buffer: &'a AudioBuffer, effects: &EffectParameters) -> Cow<'a, AudioBuffer> {
    let pitch = effects.get(EffectParam::Pitch);
    let volume = effects.get(EffectParam::Volume);
    let reverb = effects.get(EffectParam::Reverb);

    if effects.is_default(EffectParam::Pitch)
        && effects.is_default(EffectParam::Volume)
        && effects.is_default(EffectParam::Reverb)
    {
        return Cow::Borrowed(buffer);
    }

    let mut rendered = if effects.is_default(EffectParam::Pitch) {
        buffer.clone()
    } else {
        resample_by_rate(buffer, semitones_to_rate(EffectParam::Pitch.clamp(pitch)))
    };

    if !effects.is_default(EffectParam::Volume) {
        rendered.scale(EffectParam::Volume.clamp(volume) / 100.0);
    }

    if !effects.is_default(EffectParam::Reverb) {
        let wet = EffectParam::Reverb.clamp(reverb) / 100.0;
        rendered = convolve_wet_dry(&rendered.to_stereo(), wet);
    }

    Cow::Owned(rendered.to_stereo())
}

/// Per-channel convolution, mixed `(1 - wet) * dry + wet * convolved`
fn convolve_wet_dry(buffer: &AudioBuffer, wet: f32) -> AudioBuffer {
    let samples = buffer
        .samples
        .iter()
        .enumerate()
        .map(|(ch, dry)| {
            let impulse = impulse_response(buffer.sample_rate, IMPULSE_SECONDS, ch);
            let convolved = fft_convolve(dry, &impulse, dry.len());
            dry.iter()
                .zip(&convolved)
                .map(|(&d, &c)| (1.0 - wet) * d + wet * c)
                .collect()
        })
        .collect();

    AudioBuffer {
        samples,
        sample_rate: buffer.sample_rate,
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a buffer as 16-bit PCM WAV
///
/// Samples are clamped to `-1..=1` and scaled by 32767 with truncation.
pub fn create_wav_bytes(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let channels = buffer.channels();
    if channels == 0 || channels > 2 {
        return Err(MixdeckError::InvalidAudio {
            reason: format!("cannot encode {} channels", channels),
        });
    }

    let spec = WavSpec {
        channels: channels as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + buffer.len() * channels * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for frame in 0..buffer.len() {
            for channel in &buffer.samples {
                writer.write_sample((channel[frame].clamp(-1.0, 1.0) * 32767.0) as i16)?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

// ============================================================================
// Export
// ============================================================================

/// Mix, render and encode a complete export
///
/// Every failure comes back as one `MixdeckError::Export` naming the stage;
/// no artifact is produced on error. Dropping the future abandons the
/// export.
#[instrument(skip_all, fields(format = %options.format, tracks = tracks.len()))]
pub async fn export_audio<C: CodecService>(
    tracks: &[TrackMix],
    total_length_ms: f64,
    effects: &EffectParameters,
    options: &ExportOptions,
    codec: &C,
) -> Result<ExportArtifact> {
    if total_length_ms <= 0.0 || !total_length_ms.is_finite() {
        return Err(MixdeckError::export(
            "mix",
            format!("invalid length {}ms", total_length_ms),
        ));
    }

    let mixed = mix_tracks(tracks, total_length_ms, options.sample_rate);
    let rendered = apply_master_effects(&mixed, effects);
    if !rendered.is_finite() {
        return Err(MixdeckError::export("render", "master render produced non-finite samples"));
    }

    let wav = create_wav_bytes(&rendered).map_err(|e| MixdeckError::export("encode", e))?;
    debug!(bytes = wav.len(), frames = rendered.len(), "encoded mixdown");

    let bytes = if options.format.needs_codec() {
        codec
            .encode(wav, &options.codec_request())
            .await
            .map_err(|e| MixdeckError::export("codec", e))?
    } else {
        wav
    };

    let artifact = ExportArtifact::new(bytes, options.format);
    info!(
        bytes = artifact.bytes.len(),
        sha256 = %artifact.sha256,
        "export complete"
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{SourceRef, TrackId};
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const SR: u32 = 1000;

    fn constant(value: f32, frames: usize) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::from_channels(vec![vec![value; frames]], SR).unwrap())
    }

    fn track_mix(id: &str, value: f32, start_ms: f64) -> TrackMix {
        let track = Track::new(id, id);
        let segment = Segment::new(
            format!("{}-seg", id),
            TrackId::from(id),
            SourceRef::new("mem://tone"),
            start_ms,
            500.0,
        );
        TrackMix {
            track,
            segments: vec![(segment, constant(value, 500))],
        }
    }

    /// Records requests and echoes a marker instead of encoding
    struct FakeCodec {
        requests: std::sync::Mutex<Vec<CodecRequest>>,
    }

    impl CodecService for FakeCodec {
        async fn encode(&self, wav: Vec<u8>, request: &CodecRequest) -> Result<Vec<u8>> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(format!("encoded:{}", wav.len()).into_bytes())
        }
    }

    struct DownCodec;

    impl CodecService for DownCodec {
        async fn encode(&self, _wav: Vec<u8>, _request: &CodecRequest) -> Result<Vec<u8>> {
            Err(MixdeckError::CodecUnavailable {
                reason: "connection refused".to_string(),
            })
        }
    }

    #[test]
    fn test_quiet_mix_is_not_normalized() {
        let mixed = mix_tracks(&[track_mix("a", 0.4, 0.0), track_mix("b", 0.3, 0.0)], 1000.0, SR);
        assert_eq!(mixed.channels(), 2);
        assert_eq!(mixed.len(), 1000);
        assert_relative_eq!(mixed.samples[0][10], 0.7, epsilon = 1e-6);
        assert_relative_eq!(mixed.samples[1][10], 0.7, epsilon = 1e-6);
        assert_eq!(mixed.samples[0][600], 0.0);
    }

    #[test]
    fn test_overloaded_mix_peaks_at_095() {
        let mixed = mix_tracks(&[track_mix("a", 0.8, 0.0), track_mix("b", 0.8, 200.0)], 1000.0, SR);
        assert_eq!(mixed.peak(), NORMALIZE_PEAK);
        // Non-overlapping part keeps its proportion to the peak
        assert_relative_eq!(mixed.samples[0][100], NORMALIZE_PEAK / 2.0, epsilon = 1e-6);
    }

    #[test_case(1.0137 ; "barely over")]
    #[test_case(1.0822 ; "slightly over")]
    #[test_case(2.5 ; "well over")]
    #[test_case(28.4 ; "far over")]
    fn test_normalized_peak_is_exact(level: f32) {
        let mixed = mix_tracks(&[track_mix("a", level, 0.0)], 1000.0, SR);
        assert_eq!(mixed.peak(), NORMALIZE_PEAK);

        let mut inverted = track_mix("a", -level, 0.0);
        inverted.track.pan = 0.3;
        let mixed = mix_tracks(&[inverted], 1000.0, SR);
        assert_eq!(mixed.peak(), NORMALIZE_PEAK);
    }

    #[test]
    fn test_mute_and_solo_respected() {
        let mut muted = track_mix("a", 0.5, 0.0);
        muted.track.mute = true;
        let mixed = mix_tracks(&[muted, track_mix("b", 0.25, 0.0)], 500.0, SR);
        assert_relative_eq!(mixed.samples[0][0], 0.25, epsilon = 1e-6);

        let mut soloed = track_mix("a", 0.5, 0.0);
        soloed.track.solo = true;
        let mixed = mix_tracks(&[soloed, track_mix("b", 0.25, 0.0)], 500.0, SR);
        assert_relative_eq!(mixed.samples[0][0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_gain_and_pan() {
        let mut mix = track_mix("a", 0.5, 0.0);
        mix.track.gain_db = -6.0;
        mix.track.pan = 0.5;
        mix.segments[0].0.gain_db = 6.0;
        let mixed = mix_tracks(&[mix], 500.0, SR);
        assert_relative_eq!(mixed.samples[0][0], 0.25, epsilon = 1e-6);
        assert_relative_eq!(mixed.samples[1][0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_segment_offset_and_timeline_position() {
        let ramp: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let source = Arc::new(AudioBuffer::from_channels(vec![ramp], SR).unwrap());
        let segment = Segment::new("s", TrackId::from("a"), SourceRef::new("mem://ramp"), 100.0, 200.0)
            .with_offset(300.0);
        let mix = TrackMix {
            track: Track::new("a", "a"),
            segments: vec![(segment, source)],
        };
        let mixed = mix_tracks(&[mix], 1000.0, SR);
        assert_eq!(mixed.samples[0][99], 0.0);
        assert_relative_eq!(mixed.samples[0][100], 0.3, epsilon = 1e-6);
        assert_relative_eq!(mixed.samples[0][299], 0.499, epsilon = 1e-6);
        assert_eq!(mixed.samples[0][300], 0.0);
    }

    #[test]
    fn test_defaults_return_borrowed_buffer() {
        let buffer = AudioBuffer::new(100, ChannelLayout::Stereo, SR);
        let result = apply_master_effects(&buffer, &EffectParameters::default());
        assert!(matches!(result, Cow::Borrowed(b) if std::ptr::eq(b, &buffer)));

        // Effects the offline render does not realize still take the cheap path
        let params = EffectParameters::default().with(EffectParam::Chorus, 50.0);
        assert!(matches!(apply_master_effects(&buffer, &params), Cow::Borrowed(_)));
    }

    #[test_case(12.0, 500 ; "octave up halves length")]
    #[test_case(-12.0, 2000 ; "octave down doubles length")]
    #[test_case(7.0, 667 ; "fifth up")]
    fn test_pitch_length_law(semitones: f32, expected: usize) {
        let buffer = AudioBuffer::new(1000, ChannelLayout::Stereo, SR);
        let params = EffectParameters::default().with(EffectParam::Pitch, semitones);
        let rendered = apply_master_effects(&buffer, &params);
        let rate = semitones_to_rate(semitones);
        assert_eq!(rendered.len(), (1000.0 / rate).floor() as usize);
        assert_eq!(rendered.len(), expected);
    }

    #[test]
    fn test_volume_render_and_mono_to_stereo() {
        let buffer = AudioBuffer::from_channels(vec![vec![0.5; 10]], SR).unwrap();
        let params = EffectParameters::default().with(EffectParam::Volume, 50.0);
        let rendered = apply_master_effects(&buffer, &params);
        assert_eq!(rendered.channels(), 2);
        assert_relative_eq!(rendered.samples[0][3], 0.25, epsilon = 1e-6);
        assert_relative_eq!(rendered.samples[1][3], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_reverb_render_is_reproducible() {
        let mut buffer = AudioBuffer::new(2000, ChannelLayout::Stereo, SR);
        buffer.samples[0][0] = 1.0;
        buffer.samples[1][0] = 1.0;
        let params = EffectParameters::default().with(EffectParam::Reverb, 50.0);

        let first = apply_master_effects(&buffer, &params).into_owned();
        let second = apply_master_effects(&buffer, &params).into_owned();
        assert_eq!(first.len(), 2000);
        assert_eq!(first.samples, second.samples);
        // The tail carries energy after the impulse
        assert!(first.samples[0][500..].iter().any(|s| s.abs() > 0.0));
        // Channels use different impulse responses
        assert_ne!(first.samples[0], first.samples[1]);
    }

    #[test]
    fn test_wav_header_bytes() {
        let buffer = AudioBuffer::from_channels(vec![vec![0.0, 1.0], vec![-1.0, 0.5]], 44100).unwrap();
        let bytes = create_wav_bytes(&buffer).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"RIFF");
        expected.extend_from_slice(&(36u32 + 8).to_le_bytes());
        expected.extend_from_slice(b"WAVE");
        expected.extend_from_slice(b"fmt ");
        expected.extend_from_slice(&16u32.to_le_bytes());
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.extend_from_slice(&2u16.to_le_bytes());
        expected.extend_from_slice(&44100u32.to_le_bytes());
        expected.extend_from_slice(&(44100u32 * 4).to_le_bytes());
        expected.extend_from_slice(&4u16.to_le_bytes());
        expected.extend_from_slice(&16u16.to_le_bytes());
        expected.extend_from_slice(b"data");
        expected.extend_from_slice(&8u32.to_le_bytes());
        for sample in [0i16, -32767, 32767, 16383] {
            expected.extend_from_slice(&sample.to_le_bytes());
        }
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_wav_round_trip_within_one_step() {
        let left: Vec<f32> = (0..256).map(|i| ((i as f32) * 0.1).sin() * 0.9).collect();
        let right: Vec<f32> = left.iter().map(|s| -s * 0.5).collect();
        let buffer = AudioBuffer::from_channels(vec![left, right], 22050).unwrap();

        let bytes = create_wav_bytes(&buffer).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        let decoded: Vec<f32> = reader
            .samples::<i16>()
            .map(|s| s.unwrap() as f32 / 32767.0)
            .collect();

        for (original, restored) in buffer.to_interleaved().iter().zip(&decoded) {
            assert!((original - restored).abs() <= 1.0 / 32767.0);
        }
    }

    #[test_case("wav", ExportFormat::Wav)]
    #[test_case("MP3", ExportFormat::Mp3)]
    #[test_case(" ogg ", ExportFormat::Ogg)]
    fn test_format_parsing(input: &str, expected: ExportFormat) {
        assert_eq!(input.parse::<ExportFormat>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = "flac".parse::<ExportFormat>().unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn test_wav_export_skips_codec() {
        let codec = FakeCodec {
            requests: Default::default(),
        };
        let options = ExportOptions::new(ExportFormat::Wav, SR);
        let artifact = export_audio(
            &[track_mix("a", 0.5, 0.0)],
            1000.0,
            &EffectParameters::default(),
            &options,
            &codec,
        )
        .await
        .unwrap();

        assert_eq!(&artifact.bytes[..4], b"RIFF");
        assert_eq!(artifact.bytes.len(), 44 + 1000 * 2 * 2);
        assert_eq!(artifact.sha256.len(), 64);
        assert_eq!(artifact.file_name(), "export.wav");
        assert!(codec.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mp3_export_uses_default_bitrate() {
        let codec = FakeCodec {
            requests: Default::default(),
        };
        let options = ExportOptions::new(ExportFormat::Mp3, SR);
        let artifact = export_audio(
            &[track_mix("a", 0.5, 0.0)],
            1000.0,
            &EffectParameters::default(),
            &options,
            &codec,
        )
        .await
        .unwrap();

        assert_eq!(artifact.bytes, b"encoded:4044".to_vec());
        let requests = codec.requests.lock().unwrap();
        assert_eq!(
            *requests,
            vec![CodecRequest {
                format: ExportFormat::Mp3,
                sample_rate: SR,
                bitrate: "192k".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_codec_failure_is_single_export_error() {
        let options = ExportOptions::new(ExportFormat::Ogg, SR).with_bitrate("96k");
        let err = export_audio(
            &[track_mix("a", 0.5, 0.0)],
            1000.0,
            &EffectParameters::default(),
            &options,
            &DownCodec,
        )
        .await
        .unwrap_err();

        assert_eq!(err.error_code(), "EXPORT_FAILED");
        assert!(err.to_string().contains("codec"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_collect_tracks_decodes_and_groups() {
        use crate::engine::source::MemorySourceLoader;

        let loader = MemorySourceLoader::new().with_source(
            "mem://tone",
            AudioBuffer::from_channels(vec![vec![0.5; 500]], SR).unwrap(),
        );
        let version = Version::new(120.0, 1000.0)
            .with_track(Track::new("a", "A"))
            .with_track(Track::new("b", "B"))
            .with_segment(Segment::new("s1", TrackId::from("a"), SourceRef::new("mem://tone"), 0.0, 250.0))
            .with_segment(Segment::new("s2", TrackId::from("a"), SourceRef::new("mem://tone"), 500.0, 250.0));

        let tracks = collect_tracks(&version, &loader).await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].segments.len(), 2);
        assert!(tracks[1].segments.is_empty());
        assert!(Arc::ptr_eq(&tracks[0].segments[0].1, &tracks[0].segments[1].1));

        let missing = version.with_segment(Segment::new(
            "s3",
            TrackId::from("b"),
            SourceRef::new("mem://missing"),
            0.0,
            100.0,
        ));
        let err = collect_tracks(&missing, &loader).await.unwrap_err();
        assert!(err.to_string().contains("decode"));
    }
}
