use async_trait::async_trait;
use log::debug;
use reqwest::{ multipart, Client as HttpClient };
use serde::Deserialize;
use std::error::Error as StdError;
use std::path::Path;
use std::sync::Arc;

use super::non_empty;
use crate::cli::Args;

/// Audio-in, text-out collaborator reading a file on disk.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<String, Box<dyn StdError + Send + Sync>>;

    fn get_model(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl TranscriptionConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            base_url: args.transcription_base_url.clone(),
            model: args.transcription_model.clone(),
            api_key: non_empty(&args.transcription_api_key),
        }
    }
}

pub fn new_transcriber(
    config: &TranscriptionConfig
) -> Result<Arc<dyn Transcriber>, Box<dyn StdError + Send + Sync>> {
    Ok(Arc::new(WhisperClient::from_config(config)?))
}

/// OpenAI-compatible `/v1/audio/transcriptions` server (OpenAI,
/// faster-whisper-server, whisper.cpp server).
pub struct WhisperClient {
    http: HttpClient,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct Segment {
    text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptionResponse {
    Segmented {
        segments: Vec<Segment>,
    },
    Plain {
        text: String,
    },
}

impl TranscriptionResponse {
    /// Multi-segment output is joined with single spaces.
    fn into_text(self) -> String {
        match self {
            TranscriptionResponse::Segmented { segments } =>
                segments
                    .iter()
                    .map(|s| s.text.trim())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" "),
            TranscriptionResponse::Plain { text } => text.trim().to_string(),
        }
    }
}

impl WhisperClient {
    pub fn from_config(config: &TranscriptionConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.base_url.trim().is_empty() {
            return Err("Transcription base URL is required".into());
        }
        let base = config.base_url.trim_end_matches('/');
        let endpoint = if base.ends_with("/audio/transcriptions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/audio/transcriptions", base)
        } else {
            format!("{}/v1/audio/transcriptions", base)
        };
        Ok(Self {
            http: HttpClient::new(),
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, path: &Path) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        debug!("Transcribing {} ({} bytes) with {}", file_name, bytes.len(), self.model);

        let form = multipart::Form
            ::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let mut req = self.http.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?.error_for_status()?;
        let body = resp.json::<TranscriptionResponse>().await?;
        Ok(body.into_text())
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_join_with_single_spaces() {
        let body: TranscriptionResponse = serde_json::from_str(
            r#"{"text": "ignored", "segments": [{"text": " Hello there."}, {"text": "General Kenobi. "}]}"#
        ).unwrap();
        assert_eq!(body.into_text(), "Hello there. General Kenobi.");
    }

    #[test]
    fn plain_text_response_is_trimmed() {
        let body: TranscriptionResponse = serde_json::from_str(r#"{"text": " hi "}"#).unwrap();
        assert_eq!(body.into_text(), "hi");
    }

    #[test]
    fn endpoint_is_derived_from_base_url() {
        let config = TranscriptionConfig {
            base_url: "http://localhost:8000/".into(),
            model: "whisper-1".into(),
            api_key: None,
        };
        let client = WhisperClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8000/v1/audio/transcriptions");
    }
}
