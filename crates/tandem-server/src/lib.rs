use std::collections::HashMap;
use std::sync::Arc;

use tandem_providers::ProviderRegistry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

mod http;

pub use http::serve;

/// Search-provider wiring read from the process environment at startup
/// (`spec.md` §4.4, SPEC_FULL.md §12 "Deterministic offline Searcher/Provider
/// stand-ins"). When no key is configured the server wires a `NullSearcher`
/// so the orchestrator's "searcher absent/unusable" path is exercised by
/// construction rather than by special-casing an absent adapter.
#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        SearchConfig {
            base_url: std::env::var("TANDEM_SEARCH_BASE_URL").ok(),
            api_key: std::env::var("TANDEM_SEARCH_API_KEY").ok(),
        }
    }
}

/// Tracks in-flight research runs so a client disconnect (or an explicit
/// cancel request) can stop the orchestrator loop promptly (`spec.md` §5
/// "Cancellation"; SPEC_FULL.md §12 "Cancellation registry").
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, run_id: String) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(run_id, token.clone());
        token
    }

    pub async fn cancel(&self, run_id: &str) -> bool {
        if let Some(token) = self.tokens.read().await.get(run_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn forget(&self, run_id: &str) {
        self.tokens.write().await.remove(run_id);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub providers: ProviderRegistry,
    pub search: SearchConfig,
    pub cancellations: CancellationRegistry,
}

impl AppState {
    pub fn new(providers: ProviderRegistry, search: SearchConfig) -> Self {
        AppState {
            providers,
            search,
            cancellations: CancellationRegistry::new(),
        }
    }
}
