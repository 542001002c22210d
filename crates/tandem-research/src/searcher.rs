use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// A raw hit returned by a search provider, before it is turned into a
/// scored `Citation` by the orchestrator (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Error kinds the orchestrator must be able to recognize (`spec.md` §4.4,
/// §7): a missing API key disables grounding entirely, a rate-limit status
/// triggers the single-retry policy.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("search provider returned status {0}")]
    Status(u16),
    #[error("search request failed: {0}")]
    Other(String),
}

impl SearchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SearchError::Status(429))
    }

    pub fn is_missing_api_key(&self) -> bool {
        matches!(self, SearchError::MissingApiKey)
    }
}

/// Thin adapter over a web search provider (`spec.md` §4.4).
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, query: &str, count: u32) -> anyhow::Result<Vec<SearchHit>>;
}

const MAX_QUERY_TOKENS: usize = 50;

/// Trims the query, clamps its token count, and deduplicates results by raw
/// URL, per the adapter contract in `spec.md` §4.4. Implementations should
/// call this before issuing the provider request.
pub fn prepare_query(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let clamped: Vec<&str> = trimmed.split_whitespace().take(MAX_QUERY_TOKENS).collect();
    Some(clamped.join(" "))
}

pub fn dedupe_by_url(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.url.clone()))
        .collect()
}

/// Adapter over a generic web-search HTTP API authenticated with a
/// subscription-token header (the convention most search providers use,
/// rather than `Authorization: Bearer`, per `spec.md` §4.4).
pub struct HttpSearcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSearcher {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        HttpSearcher {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    results: Vec<ProviderResult>,
}

#[derive(Debug, Deserialize)]
struct ProviderResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    extra_snippets: Vec<String>,
}

#[async_trait]
impl Searcher for HttpSearcher {
    async fn search(&self, query: &str, count: u32) -> anyhow::Result<Vec<SearchHit>> {
        let Some(query) = prepare_query(query) else {
            return Ok(Vec::new());
        };
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(SearchError::MissingApiKey.into());
        };

        let response = self
            .client
            .get(&self.base_url)
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query.as_str()), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| SearchError::Other(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()).into());
        }

        let parsed: ProviderResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Other(e.to_string()))?;

        let hits = parsed
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title.clone().unwrap_or_else(|| r.url.clone()),
                snippet: r
                    .description
                    .or(r.snippet)
                    .or_else(|| r.extra_snippets.into_iter().next())
                    .unwrap_or_default(),
                url: r.url,
            })
            .collect();

        Ok(dedupe_by_url(hits))
    }
}

/// Returned when no search provider is configured, so the orchestrator's
/// "searcher absent/unusable" path is always exercised by construction
/// rather than by special-casing `Option<Searcher>` (grounded in the
/// teacher's `ProviderRegistry` falling back to `LocalEchoProvider` rather
/// than special-casing an empty provider list).
pub struct NullSearcher;

#[async_trait]
impl Searcher for NullSearcher {
    async fn search(&self, _query: &str, _count: u32) -> anyhow::Result<Vec<SearchHit>> {
        Err(SearchError::MissingApiKey.into())
    }
}
