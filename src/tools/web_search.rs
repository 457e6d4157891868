//! Web search for the `web_search` tool, backed by SerpAPI's Google engine.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How many organic results are passed back to the model.
pub const MAX_RESULTS: usize = 3;

/// Transport-level ceiling; the executor applies the tighter tool timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw provider answer: every organic result plus the optional answer box.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub organic_results: Vec<SearchHit>,
    #[serde(default)]
    pub answer_box: Option<serde_json::Value>,
}

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// The bounded payload fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub results: Vec<SearchHit>,
    pub answer_box: Option<serde_json::Value>,
}

impl From<SearchResponse> for SearchSummary {
    fn from(response: SearchResponse) -> Self {
        let mut results = response.organic_results;
        results.truncate(MAX_RESULTS);
        Self {
            results,
            answer_box: response.answer_box,
        }
    }
}

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, credential: &str) -> anyhow::Result<SearchResponse>;
}

/// SerpAPI client (`GET /search.json?engine=google&q=…&api_key=…`).
pub struct SerpApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl SerpApiClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl SearchProvider for SerpApiClient {
    async fn search(&self, query: &str, credential: &str) -> anyhow::Result<SearchResponse> {
        if credential.trim().is_empty() {
            bail!("search API key is not set");
        }

        let response = self
            .http
            .get(&self.base_url)
            .query(&[("engine", "google"), ("q", query), ("api_key", credential)])
            .send()
            .await
            .context("search request failed")?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("invalid search response (HTTP {status})"))?;

        // SerpAPI reports failures as `{"error": "..."}`, sometimes with 200.
        if let Some(message) = body.get("error").and_then(|e| e.as_str()) {
            bail!("{message}");
        }
        if !status.is_success() {
            bail!("search provider returned HTTP {status}");
        }

        serde_json::from_value(body).context("unexpected search response shape")
    }
}
