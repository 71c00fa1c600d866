//! Query-in, URLs-out web search. Failures degrade to an empty result list.

use async_trait::async_trait;
use log::{ error, info, warn };
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::error::Error as StdError;
use std::sync::Arc;
use url::Url;

use crate::cli::Args;
use crate::llm::non_empty;

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        num_results: usize
    ) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>>;
}

/// Runs `search` and absorbs every failure into an empty list.
pub async fn search_or_empty(engine: &dyn WebSearch, query: &str, num_results: usize) -> Vec<String> {
    if query.trim().is_empty() {
        warn!("Web search called with empty query.");
        return Vec::new();
    }
    info!("Performing web search for query: {}", query);
    match engine.search(query, num_results).await {
        Ok(results) => {
            info!("Web search returned {} results.", results.len());
            results
        }
        Err(e) => {
            error!("Web search failed: {}", e);
            Vec::new()
        }
    }
}

pub fn new_search(args: &Args) -> Result<Arc<dyn WebSearch>, Box<dyn StdError + Send + Sync>> {
    match (non_empty(&args.search_api_key), non_empty(&args.search_engine_id)) {
        (Some(api_key), Some(engine_id)) => {
            let endpoint = Url::parse(&args.search_base_url).map_err(|e|
                format!("Invalid search base URL '{}': {}", args.search_base_url, e)
            )?;
            Ok(Arc::new(GoogleSearch::new(endpoint, api_key, engine_id)))
        }
        _ => {
            warn!("SEARCH_API_KEY or SEARCH_ENGINE_ID not set; web search disabled.");
            Ok(Arc::new(DisabledSearch))
        }
    }
}

/// Google Programmable Search (Custom Search JSON API).
pub struct GoogleSearch {
    http: HttpClient,
    endpoint: Url,
    api_key: String,
    engine_id: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    link: String,
}

impl GoogleSearch {
    pub fn new(endpoint: Url, api_key: String, engine_id: String) -> Self {
        Self {
            http: HttpClient::new(),
            endpoint,
            api_key,
            engine_id,
        }
    }

    fn request_url(&self, query: &str, num_results: usize) -> Url {
        // The API caps `num` at 10.
        let num = num_results.clamp(1, 10).to_string();
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("cx", &self.engine_id)
            .append_pair("q", query)
            .append_pair("num", &num);
        url
    }
}

#[async_trait]
impl WebSearch for GoogleSearch {
    async fn search(
        &self,
        query: &str,
        num_results: usize
    ) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>> {
        let url = self.request_url(query, num_results);
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let body = resp.json::<SearchResponse>().await?;
        Ok(
            body.items
                .into_iter()
                .map(|item| item.link)
                .take(num_results)
                .collect()
        )
    }
}

pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    async fn search(
        &self,
        _query: &str,
        _num_results: usize
    ) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl WebSearch for Failing {
        async fn search(
            &self,
            _query: &str,
            _num_results: usize
        ) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>> {
            Err("quota exceeded".into())
        }
    }

    struct Fixed;

    #[async_trait]
    impl WebSearch for Fixed {
        async fn search(
            &self,
            query: &str,
            num_results: usize
        ) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>> {
            Ok((0..num_results).map(|i| format!("https://example.com/{}/{}", query, i)).collect())
        }
    }

    #[tokio::test]
    async fn failures_and_blank_queries_yield_nothing() {
        assert!(search_or_empty(&Failing, "rust", 5).await.is_empty());
        assert!(search_or_empty(&Fixed, "   ", 5).await.is_empty());
        assert!(search_or_empty(&DisabledSearch, "rust", 5).await.is_empty());
    }

    #[tokio::test]
    async fn results_pass_through() {
        let results = search_or_empty(&Fixed, "rust", 2).await;
        assert_eq!(results, vec!["https://example.com/rust/0", "https://example.com/rust/1"]);
    }

    #[test]
    fn request_url_encodes_query() {
        let engine = GoogleSearch::new(
            Url::parse("https://www.googleapis.com/customsearch/v1").unwrap(),
            "k".into(),
            "cx1".into()
        );
        let url = engine.request_url("rust & tokio", 50);
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/customsearch/v1?key=k&cx=cx1&q=rust+%26+tokio&num=10"
        );
    }
}
