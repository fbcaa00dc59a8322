//! Compressed-format encoding through the codec service
//!
//! MP3 and OGG are not encoded in-process. The mixdown is rendered to WAV
//! and posted to an HTTP service that returns the encoded bytes.

use std::future::Future;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{MixdeckError, Result};
use crate::export::ExportFormat;

/// Parameters sent along with the WAV payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecRequest {
    pub format: ExportFormat,
    pub sample_rate: u32,
    /// Bitrate in the service's notation, e.g. `192k`
    pub bitrate: String,
}

/// Encodes WAV bytes into a compressed format
pub trait CodecService: Send + Sync {
    fn encode(
        &self,
        wav: Vec<u8>,
        request: &CodecRequest,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Client for the codec HTTP service
///
/// Posts multipart `file`, `format`, `bitrate` and `sample_rate` fields to
/// `{base}/export`.
#[derive(Debug, Clone)]
pub struct HttpCodecClient {
    base_url: String,
    timeout: Duration,
}

impl HttpCodecClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.codec_url.clone(),
            Duration::from_millis(config.codec_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check whether the service answers on `/health`
    #[cfg(feature = "remote-codec")]
    pub async fn health(&self) -> Result<bool> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| MixdeckError::CodecUnavailable {
                reason: e.to_string(),
            })?;

        let url = format!("{}/health", self.base_url);
        match client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    #[cfg(not(feature = "remote-codec"))]
    pub async fn health(&self) -> Result<bool> {
        Ok(false)
    }

    #[cfg(feature = "remote-codec")]
    async fn post_export(&self, wav: Vec<u8>, request: &CodecRequest) -> Result<Vec<u8>> {
        use reqwest::multipart::{Form, Part};

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| MixdeckError::CodecUnavailable {
                reason: e.to_string(),
            })?;

        let file = Part::bytes(wav)
            .file_name("mixdown.wav")
            .mime_str("audio/wav")
            .map_err(|e| MixdeckError::CodecFailed {
                reason: e.to_string(),
            })?;
        let form = Form::new()
            .part("file", file)
            .text("format", request.format.as_str().to_string())
            .text("bitrate", request.bitrate.clone())
            .text("sample_rate", request.sample_rate.to_string());

        let url = format!("{}/export", self.base_url);
        let response = client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MixdeckError::CodecUnavailable {
                        reason: format!("timed out after {}ms", self.timeout.as_millis()),
                    }
                } else if e.is_connect() {
                    MixdeckError::CodecUnavailable {
                        reason: format!("cannot connect to {}: {}", self.base_url, e),
                    }
                } else {
                    MixdeckError::CodecFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MixdeckError::CodecFailed {
                reason: service_error(status.as_u16(), &body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MixdeckError::CodecFailed {
                reason: format!("failed to read response body: {}", e),
            })?;
        Ok(bytes.to_vec())
    }

    #[cfg(not(feature = "remote-codec"))]
    async fn post_export(&self, _wav: Vec<u8>, _request: &CodecRequest) -> Result<Vec<u8>> {
        Err(MixdeckError::CodecUnavailable {
            reason: "codec support not compiled. Build with --features remote-codec".to_string(),
        })
    }
}

impl Default for HttpCodecClient {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl CodecService for HttpCodecClient {
    async fn encode(&self, wav: Vec<u8>, request: &CodecRequest) -> Result<Vec<u8>> {
        tracing::debug!(
            url = %self.base_url,
            format = %request.format,
            bitrate = %request.bitrate,
            bytes = wav.len(),
            "sending mixdown to codec service"
        );
        self.post_export(wav, request).await
    }
}

/// Human-readable reason from an error response
///
/// The service answers failures with `{"error": "..."}`; anything else is
/// reported with the raw body.
pub fn service_error(status: u16, body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        format!("status {}", status)
    } else {
        format!("status {}: {}", status, message)
    }
}
