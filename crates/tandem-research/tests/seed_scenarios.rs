//! End-to-end coverage for the orchestrator loop using fake collaborators
//! (no network I/O), one test per seed scenario table entry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tandem_research::{Orchestrator, Planner, Reader, ResearchProfile, SearchHit, Searcher};
use tandem_types::{
    FetchStatus, NextAction, PlannerDecision, PlannerInput, ReadResult, StopReason,
};
use tokio_util::sync::CancellationToken;

struct QueryCountingSearcher {
    hits_per_query: Vec<SearchHit>,
}

#[async_trait]
impl Searcher for QueryCountingSearcher {
    async fn search(&self, _query: &str, _count: u32) -> anyhow::Result<Vec<SearchHit>> {
        Ok(self.hits_per_query.clone())
    }
}

struct NeverFinalizePlanner;

#[async_trait]
impl Planner for NeverFinalizePlanner {
    async fn initial_plan(&self, _input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        Ok(PlannerDecision {
            next_action: NextAction::SearchMore,
            queries: vec![
                "query one".to_string(),
                "query two".to_string(),
                "query three".to_string(),
            ],
            coverage_gaps: Vec::new(),
            target_source_types: Vec::new(),
            confidence: 0.5,
            reason: "scripted: keep searching".to_string(),
        })
    }

    async fn evaluate_evidence(&self, _input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        Ok(PlannerDecision {
            next_action: NextAction::SearchMore,
            queries: vec![
                "query four".to_string(),
                "query five".to_string(),
                "query six".to_string(),
            ],
            coverage_gaps: Vec::new(),
            target_source_types: Vec::new(),
            confidence: 0.5,
            reason: "scripted: keep searching".to_string(),
        })
    }
}

struct AcceptingReader;

#[async_trait]
impl Reader for AcceptingReader {
    async fn read(&self, url: &str) -> ReadResult {
        ReadResult {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            title: "Title".to_string(),
            content_type: "text/html".to_string(),
            text: "Body text with enough depth to read cleanly.".to_string(),
            snippet: "Body text".to_string(),
            truncated: false,
            fetched_at: chrono::Utc::now(),
            status: FetchStatus::Ok,
        }
    }
}

#[tokio::test]
async fn budget_enforcement_caps_queries_and_reads() {
    let mut profile = ResearchProfile::chat();
    profile.max_loops = 3;
    profile.max_search_queries = 2;
    profile.max_sources_read = 1;

    let searcher = QueryCountingSearcher {
        hits_per_query: vec![SearchHit {
            url: "https://example.com/budget".to_string(),
            title: "Budget".to_string(),
            snippet: "about the topic".to_string(),
        }],
    };

    let orchestrator = Orchestrator::new(
        Some(Arc::new(searcher)),
        Arc::new(AcceptingReader),
        Arc::new(NeverFinalizePlanner),
        profile.clone(),
    );

    let (result, outcome) = orchestrator
        .run("what happened", false, CancellationToken::new(), |_| {})
        .await;

    assert!(outcome.is_ok());
    assert!(result.queries_used <= profile.max_search_queries);
    assert!(result.sources_read <= profile.max_sources_read);
    assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
}

struct MixedFailureReader;

#[async_trait]
impl Reader for MixedFailureReader {
    async fn read(&self, url: &str) -> ReadResult {
        let status = if url.ends_with("/a") {
            FetchStatus::Blocked
        } else {
            FetchStatus::HttpError(403)
        };
        ReadResult {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            title: String::new(),
            content_type: String::new(),
            text: String::new(),
            snippet: String::new(),
            truncated: false,
            fetched_at: chrono::Utc::now(),
            status,
        }
    }
}

struct OneShotPlanner;

#[async_trait]
impl Planner for OneShotPlanner {
    async fn initial_plan(&self, _input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        Ok(PlannerDecision {
            next_action: NextAction::SearchMore,
            queries: vec!["query".to_string()],
            coverage_gaps: Vec::new(),
            target_source_types: Vec::new(),
            confidence: 0.5,
            reason: "scripted: single pass".to_string(),
        })
    }

    async fn evaluate_evidence(&self, _input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        Ok(PlannerDecision {
            next_action: NextAction::Finalize,
            queries: Vec::new(),
            coverage_gaps: Vec::new(),
            target_source_types: Vec::new(),
            confidence: 0.8,
            reason: "scripted: finalize".to_string(),
        })
    }
}

#[tokio::test]
async fn all_reads_fail_with_mixed_reasons() {
    let mut profile = ResearchProfile::chat();
    profile.max_sources_read = 2;
    profile.max_search_queries = 3;

    let searcher = QueryCountingSearcher {
        hits_per_query: vec![
            SearchHit {
                url: "https://example.com/a".to_string(),
                title: "A".to_string(),
                snippet: "blocked host".to_string(),
            },
            SearchHit {
                url: "https://example.com/b".to_string(),
                title: "B".to_string(),
                snippet: "forbidden".to_string(),
            },
        ],
    };

    let orchestrator = Orchestrator::new(
        Some(Arc::new(searcher)),
        Arc::new(MixedFailureReader),
        Arc::new(OneShotPlanner),
        profile,
    );

    let (result, outcome) = orchestrator
        .run("what happened", false, CancellationToken::new(), |_| {})
        .await;

    assert!(outcome.is_ok());
    assert_eq!(result.read_attempts, 2);
    assert_eq!(result.read_failures, 2);
    assert_eq!(result.sources_read, 0);

    let reasons: std::collections::HashMap<_, _> = result.read_failure_reasons.into_iter().collect();
    assert_eq!(
        reasons.get(&tandem_types::ReadFailureReason::BlockedUrl),
        Some(&1)
    );
    assert_eq!(
        reasons.get(&tandem_types::ReadFailureReason::HttpStatus),
        Some(&1)
    );

    let snippet_warnings = result
        .warnings
        .iter()
        .filter(|w| w.to_lowercase().contains("search snippets"))
        .count();
    assert_eq!(snippet_warnings, 1);
}

#[tokio::test]
async fn timeout_with_blocking_searcher_reports_timeout() {
    let mut profile = ResearchProfile::chat();
    profile.timeout = Duration::from_millis(20);

    struct BlockingSearcher;

    #[async_trait]
    impl Searcher for BlockingSearcher {
        async fn search(&self, _query: &str, _count: u32) -> anyhow::Result<Vec<SearchHit>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    let orchestrator = Orchestrator::new(
        Some(Arc::new(BlockingSearcher)),
        Arc::new(AcceptingReader),
        Arc::new(NeverFinalizePlanner),
        profile,
    );

    let (result, outcome) = orchestrator
        .run("what happened", false, CancellationToken::new(), |_| {})
        .await;

    assert!(outcome.is_err());
    assert_eq!(result.stop_reason, StopReason::Timeout);
}

struct TimingOutReader;

#[async_trait]
impl Reader for TimingOutReader {
    async fn read(&self, url: &str) -> ReadResult {
        ReadResult {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            title: String::new(),
            content_type: String::new(),
            text: String::new(),
            snippet: String::new(),
            truncated: false,
            fetched_at: chrono::Utc::now(),
            status: FetchStatus::Timeout,
        }
    }
}

#[tokio::test]
async fn per_url_fetch_timeout_is_counted_as_timeout_reason() {
    let mut profile = ResearchProfile::chat();
    profile.max_sources_read = 1;

    let searcher = QueryCountingSearcher {
        hits_per_query: vec![SearchHit {
            url: "https://example.com/slow".to_string(),
            title: "Slow".to_string(),
            snippet: "a page that never responds in time".to_string(),
        }],
    };

    let orchestrator = Orchestrator::new(
        Some(Arc::new(searcher)),
        Arc::new(TimingOutReader),
        Arc::new(OneShotPlanner),
        profile,
    );

    let (result, outcome) = orchestrator
        .run("what happened", false, CancellationToken::new(), |_| {})
        .await;

    assert!(outcome.is_ok());
    assert_eq!(result.read_attempts, 1);
    assert_eq!(result.read_failures, 1);
    assert_eq!(result.sources_read, 0);

    let reasons: std::collections::HashMap<_, _> = result.read_failure_reasons.into_iter().collect();
    assert_eq!(
        reasons.get(&tandem_types::ReadFailureReason::Timeout),
        Some(&1)
    );
}
