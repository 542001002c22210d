use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A search-provider hit, before it becomes evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source_provider: String,
    pub query: String,
    pub pass: u32,
    pub score: f64,
}

/// One read-failure bucket. Kept as a closed taxonomy so counters never grow
/// an unbounded key set (`spec.md` §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFailureReason {
    Timeout,
    BlockedUrl,
    UnsupportedContentType,
    HttpStatus,
    FetchFailed,
}

impl ReadFailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadFailureReason::Timeout => "timeout",
            ReadFailureReason::BlockedUrl => "blocked_url",
            ReadFailureReason::UnsupportedContentType => "unsupported_content_type",
            ReadFailureReason::HttpStatus => "http_status",
            ReadFailureReason::FetchFailed => "fetch_failed",
        }
    }
}

/// The reader's terminal fetch-status token (`spec.md` §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    HttpError(u16),
    UnsupportedContentType,
    EmptyContent,
    FetchFailed,
    RequestFailed,
    Timeout,
    Blocked,
}

impl FetchStatus {
    pub fn as_token(&self) -> String {
        match self {
            FetchStatus::Ok => "ok".to_string(),
            FetchStatus::HttpError(code) => format!("http_{code}"),
            FetchStatus::UnsupportedContentType => "unsupported_content_type".to_string(),
            FetchStatus::EmptyContent => "empty_content".to_string(),
            FetchStatus::FetchFailed => "fetch_failed".to_string(),
            FetchStatus::RequestFailed => "request_failed".to_string(),
            FetchStatus::Timeout => "timeout".to_string(),
            FetchStatus::Blocked => "blocked".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, FetchStatus::Ok)
    }

    pub fn failure_reason(&self) -> Option<ReadFailureReason> {
        match self {
            FetchStatus::Ok => None,
            FetchStatus::HttpError(_) => Some(ReadFailureReason::HttpStatus),
            FetchStatus::UnsupportedContentType => Some(ReadFailureReason::UnsupportedContentType),
            FetchStatus::EmptyContent => Some(ReadFailureReason::FetchFailed),
            FetchStatus::FetchFailed => Some(ReadFailureReason::FetchFailed),
            FetchStatus::RequestFailed => Some(ReadFailureReason::FetchFailed),
            FetchStatus::Timeout => Some(ReadFailureReason::Timeout),
            FetchStatus::Blocked => Some(ReadFailureReason::BlockedUrl),
        }
    }
}

impl Serialize for FetchStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_token())
    }
}

impl<'de> Deserialize<'de> for FetchStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        Ok(match token.as_str() {
            "ok" => FetchStatus::Ok,
            "unsupported_content_type" => FetchStatus::UnsupportedContentType,
            "empty_content" => FetchStatus::EmptyContent,
            "fetch_failed" => FetchStatus::FetchFailed,
            "request_failed" => FetchStatus::RequestFailed,
            "timeout" => FetchStatus::Timeout,
            "blocked" => FetchStatus::Blocked,
            other => other
                .strip_prefix("http_")
                .and_then(|code| code.parse::<u16>().ok())
                .map(FetchStatus::HttpError)
                .unwrap_or(FetchStatus::FetchFailed),
        })
    }
}

/// Output of a single Reader fetch (`spec.md` §3, §4.3). Immutable after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub requested_url: String,
    pub final_url: String,
    pub title: String,
    pub content_type: String,
    pub text: String,
    pub snippet: String,
    pub truncated: bool,
    pub fetched_at: DateTime<Utc>,
    pub status: FetchStatus,
}

/// Per-request evidence row, keyed by canonical URL (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub canonical_url: String,
    pub citation: Citation,
    pub content_type: Option<String>,
    pub excerpt: String,
    pub source_quality: f64,
    pub freshness: f64,
    pub completeness: f64,
    pub corroboration: f64,
    pub contradiction: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub has_full_text: bool,
    pub score: f64,
}

/// `nextAction` token (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    SearchMore,
    Finalize,
}

/// Built by the orchestrator before every planner call; immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerInput {
    pub question: String,
    pub time_sensitive: bool,
    pub loop_index: u32,
    pub queries_remaining: u32,
    pub sources_remaining: u32,
    pub loops_remaining: u32,
    pub coverage_gaps: Vec<String>,
    pub prior_queries: Vec<String>,
    pub ranked_evidence: Vec<Evidence>,
    pub recent_candidates: Vec<Citation>,
}

/// Returned by the planner; validated and normalized by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerDecision {
    pub next_action: NextAction,
    pub queries: Vec<String>,
    pub coverage_gaps: Vec<String>,
    pub target_source_types: Vec<String>,
    pub confidence: f64,
    pub reason: String,
}

/// Orchestrator phases (`spec.md` §4.1, §6). Closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Searching,
    Reading,
    Evaluating,
    Iterating,
    Synthesizing,
    Finalizing,
}

/// Terminal classification of a run (`spec.md` §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Sufficient,
    BudgetExhausted,
    Timeout,
    Error,
}

/// `decision` hint carried on a progress event (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionHint {
    SearchMore,
    Finalize,
    Fallback,
}

/// Produced at phase boundaries; never retained (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    pub message: Option<String>,
    pub loop_index: u32,
    pub max_loops: u32,
    pub pass: Option<u32>,
    pub total_passes: Option<u32>,
    pub sources_read: u32,
    pub sources_considered: u32,
    pub title: Option<String>,
    pub detail: Option<String>,
    pub is_quick_step: bool,
    pub decision: Option<DecisionHint>,
}

/// Returned at the end of `Orchestrator::run` (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub loops_executed: u32,
    pub queries_used: u32,
    pub sources_considered: u32,
    pub sources_read: u32,
    pub read_attempts: u32,
    pub read_failures: u32,
    pub read_failure_reasons: Vec<(ReadFailureReason, u32)>,
    pub citations: Vec<Citation>,
    pub evidence: Vec<Evidence>,
    pub warnings: Vec<String>,
    pub warning: Option<String>,
    pub stop_reason: StopReason,
}

impl OrchestratorResult {
    pub fn read_failure_count(&self, reason: ReadFailureReason) -> u32 {
        self.read_failure_reasons
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_status_maps_to_timeout_failure_reason() {
        assert_eq!(FetchStatus::Timeout.as_token(), "timeout");
        assert_eq!(
            FetchStatus::Timeout.failure_reason(),
            Some(ReadFailureReason::Timeout)
        );
    }

    #[test]
    fn timeout_token_round_trips_through_serde() {
        let value = serde_json::to_value(FetchStatus::Timeout).unwrap();
        assert_eq!(value, "timeout");
        let status: FetchStatus = serde_json::from_value(value).unwrap();
        assert_eq!(status, FetchStatus::Timeout);
    }
}
