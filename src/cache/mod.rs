//! Accelerator-memory reclamation hook fired after heavy inference.

use async_trait::async_trait;
use log::{ error, info };
use reqwest::Client as HttpClient;
use std::sync::Arc;

use crate::cli::Args;

#[async_trait]
pub trait CacheReclaimer: Send + Sync {
    /// Best effort; failures are logged, never returned.
    async fn reclaim(&self);
}

/// In-process inference has nothing to free; the call is only logged.
pub struct NoopReclaimer;

#[async_trait]
impl CacheReclaimer for NoopReclaimer {
    async fn reclaim(&self) {
        info!("Clearing inference cache (no-op).");
    }
}

/// POSTs to a model server endpoint that drops cached allocations.
pub struct HttpReclaimer {
    http: HttpClient,
    url: String,
}

impl HttpReclaimer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { http: HttpClient::new(), url: url.into() }
    }
}

#[async_trait]
impl CacheReclaimer for HttpReclaimer {
    async fn reclaim(&self) {
        info!("Clearing inference cache via {}", self.url);
        match self.http.post(&self.url).send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => info!("Inference cache cleared successfully."),
            Err(e) => error!("Cache reclaim request to {} failed: {}", self.url, e),
        }
    }
}

pub fn init(args: &Args) -> Arc<dyn CacheReclaimer> {
    match args.reclaim_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Arc::new(HttpReclaimer::new(url)),
        None => Arc::new(NoopReclaimer),
    }
}
