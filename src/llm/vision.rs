use async_trait::async_trait;
use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use log::debug;
use reqwest::{ header::{ AUTHORIZATION, CONTENT_TYPE }, Client as HttpClient };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::non_empty;
use crate::cli::Args;

/// Image-in, text-out collaborator. Input is a PNG-encoded RGB image.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, png: &[u8]) -> Result<String, Box<dyn StdError + Send + Sync>>;

    fn get_model(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionBackend {
    Ollama,
    HuggingFace,
}

impl fmt::Display for CaptionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptionBackend::Ollama => write!(f, "ollama"),
            CaptionBackend::HuggingFace => write!(f, "huggingface"),
        }
    }
}

impl FromStr for CaptionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(CaptionBackend::Ollama),
            "huggingface" | "hf" => Ok(CaptionBackend::HuggingFace),
            _ => Err(format!("Unsupported caption backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptionConfig {
    pub backend: CaptionBackend,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub prompt: String,
}

impl CaptionConfig {
    pub fn from_args(args: &Args) -> Result<Self, String> {
        Ok(Self {
            backend: CaptionBackend::from_str(&args.caption_backend)?,
            base_url: args.caption_base_url.clone(),
            model: args.caption_model.clone(),
            api_key: non_empty(&args.caption_api_key),
            prompt: args.caption_prompt.clone(),
        })
    }
}

pub fn new_captioner(
    config: &CaptionConfig
) -> Result<Arc<dyn Captioner>, Box<dyn StdError + Send + Sync>> {
    let captioner: Arc<dyn Captioner> = match config.backend {
        CaptionBackend::Ollama => Arc::new(OllamaCaptioner::from_config(config)),
        CaptionBackend::HuggingFace => Arc::new(HuggingFaceCaptioner::from_config(config)?),
    };
    Ok(captioner)
}

/// Multimodal Ollama model (llava, moondream, bakllava) via `/api/generate`.
pub struct OllamaCaptioner {
    http: HttpClient,
    base_url: String,
    model: String,
    prompt: String,
}

#[derive(Serialize)]
struct OllamaImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaImageResponse {
    response: String,
}

impl OllamaCaptioner {
    pub fn from_config(config: &CaptionConfig) -> Self {
        let base_url = config.base_url.clone().unwrap_or_else(|| "http://localhost:11434".into());
        Self {
            http: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone().unwrap_or_else(|| "llava".to_string()),
            prompt: config.prompt.clone(),
        }
    }
}

#[async_trait]
impl Captioner for OllamaCaptioner {
    async fn caption(&self, png: &[u8]) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/api/generate", self.base_url);
        let req = OllamaImageRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![STANDARD.encode(png)],
            stream: false,
        };
        debug!("Captioning {} bytes with Ollama model {}", png.len(), self.model);
        let resp = self.http.post(&url).json(&req).send().await?.error_for_status()?;
        let data = resp.json::<OllamaImageResponse>().await?;
        Ok(data.response.trim().to_string())
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

/// Hugging Face image-to-text inference endpoint (BLIP and friends).
pub struct HuggingFaceCaptioner {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

impl HuggingFaceCaptioner {
    pub fn from_config(config: &CaptionConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let model = config.model
            .clone()
            .unwrap_or_else(|| "Salesforce/blip-image-captioning-large".to_string());
        let endpoint = match &config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                if config.api_key.is_none() {
                    return Err("Hugging Face API key is required for the hosted inference API".into());
                }
                format!("https://api-inference.huggingface.co/models/{}", model)
            }
        };
        Ok(Self {
            http: HttpClient::new(),
            endpoint,
            api_key: config.api_key.clone(),
            model,
        })
    }
}

#[async_trait]
impl Captioner for HuggingFaceCaptioner {
    async fn caption(&self, png: &[u8]) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let mut req = self.http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/png")
            .body(png.to_vec());
        if let Some(key) = &self.api_key {
            req = req.header(AUTHORIZATION, format!("Bearer {}", key));
        }
        let resp = req.send().await?.error_for_status()?;
        let results = resp.json::<Vec<GeneratedText>>().await?;
        let caption = results
            .into_iter()
            .next()
            .map(|r| r.generated_text.trim().to_string())
            .ok_or("captioning endpoint returned no text")?;
        Ok(caption)
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
