//! Wire-format projections of `tandem-types` for the SSE boundary described in
//! `spec.md` §6. Kept separate from the internal types the way the teacher's
//! `tandem-wire` decouples `Message` from `WireSessionMessage`: internal
//! representations are free to change shape without breaking clients.

use serde::{Deserialize, Serialize};
use tandem_types::{Citation, DecisionHint, NextAction, OrchestratorResult, Phase, Progress};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Metadata(WireMetadata),
    Progress(WireProgress),
    Warning(WireWarning),
    Citations(WireCitations),
    Token(WireToken),
    Reasoning(WireReasoning),
    Usage(WireUsage),
    Error(WireError),
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMetadata {
    pub grounding: bool,
    pub deep_research: bool,
    pub model_id: Option<String>,
    pub reasoning_effort: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireProgress {
    pub phase: Phase,
    pub message: Option<String>,
    #[serde(rename = "loop")]
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

impl From<&Progress> for WireProgress {
    fn from(p: &Progress) -> Self {
        WireProgress {
            phase: p.phase,
            message: p.message.clone(),
            loop_index: p.loop_index,
            max_loops: p.max_loops,
            pass: p.pass,
            total_passes: p.total_passes,
            sources_read: p.sources_read,
            sources_considered: p.sources_considered,
            title: p.title.clone(),
            detail: p.detail.clone(),
            is_quick_step: p.is_quick_step,
            decision: p.decision,
        }
    }
}

impl From<Progress> for WireEvent {
    fn from(p: Progress) -> Self {
        WireEvent::Progress(WireProgress::from(&p))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireWarning {
    pub scope: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCitation {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub source_provider: String,
    pub query: String,
}

impl From<&Citation> for WireCitation {
    fn from(c: &Citation) -> Self {
        WireCitation {
            url: c.url.clone(),
            title: c.title.clone(),
            snippet: c.snippet.clone(),
            score: c.score,
            source_provider: c.source_provider.clone(),
            query: c.query.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCitations {
    pub citations: Vec<WireCitation>,
}

impl From<&[Citation]> for WireCitations {
    fn from(citations: &[Citation]) -> Self {
        WireCitations {
            citations: citations.iter().map(WireCitation::from).collect(),
        }
    }
}

impl From<&OrchestratorResult> for WireCitations {
    fn from(result: &OrchestratorResult) -> Self {
        WireCitations::from(result.citations.as_slice())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToken {
    pub delta: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireReasoning {
    pub delta: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WireUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
}

/// Maps a planner decision token onto the progress event's decision hint;
/// `fallback` is only ever produced by the orchestrator itself, never by a
/// raw planner decision.
pub fn decision_hint_for(next_action: NextAction) -> DecisionHint {
    match next_action {
        NextAction::SearchMore => DecisionHint::SearchMore,
        NextAction::Finalize => DecisionHint::Finalize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_wire_uses_loop_key() {
        let progress = Progress {
            phase: Phase::Planning,
            message: None,
            loop_index: 2,
            max_loops: 6,
            pass: None,
            total_passes: None,
            sources_read: 0,
            sources_considered: 0,
            title: None,
            detail: None,
            is_quick_step: false,
            decision: None,
        };
        let wire = WireEvent::from(progress);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["loop"], 2);
    }
}
