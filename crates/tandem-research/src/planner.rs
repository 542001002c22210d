use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tandem_providers::ProviderRegistry;
use tandem_types::{Evidence, NextAction, PlannerDecision, PlannerInput};

/// Loop 1 vs. subsequent loops (`spec.md` §4.2).
#[async_trait]
pub trait Planner: Send + Sync {
    async fn initial_plan(&self, input: &PlannerInput) -> anyhow::Result<PlannerDecision>;
    async fn evaluate_evidence(&self, input: &PlannerInput) -> anyhow::Result<PlannerDecision>;
}

/// Dedupes case-insensitively and whitespace-collapses a list of free-text
/// strings (`spec.md` §4.2 normalization, applied to queries, coverage gaps
/// and target source types alike).
pub fn dedupe_case_insensitive(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let collapsed = item.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        let key = collapsed.to_ascii_lowercase();
        if seen.insert(key) {
            out.push(collapsed);
        }
    }
    out
}

/// Applied to any planner output, JSON or heuristic (`spec.md` §4.2
/// "Normalization").
pub fn normalize_decision(mut decision: PlannerDecision, query_budget_remaining: u32) -> PlannerDecision {
    decision.confidence = decision.confidence.clamp(0.0, 1.0);
    decision.queries = dedupe_case_insensitive(decision.queries);
    decision.queries.truncate(query_budget_remaining as usize);
    decision.coverage_gaps = dedupe_case_insensitive(decision.coverage_gaps);
    decision.target_source_types = dedupe_case_insensitive(decision.target_source_types);
    decision
}

/// One fallback query synthesized straight from the question, used whenever
/// a planner (JSON or heuristic) ends up with zero usable queries
/// (`spec.md` §4.1 step 6, §4.2).
pub fn synthesize_fallback_queries(question: &str, count: u32) -> Vec<String> {
    let trimmed = question.trim();
    if trimmed.is_empty() || count == 0 {
        return Vec::new();
    }
    let mut queries = vec![trimmed.to_string()];
    if count > 1 {
        queries.push(format!("{trimmed} overview"));
    }
    if count > 2 {
        queries.push(format!("{trimmed} latest"));
    }
    queries.truncate(count as usize);
    queries
}

fn has_recency_signal(evidence: &[Evidence]) -> bool {
    evidence.iter().any(|e| e.freshness > 0.0)
}

/// Deterministic fallback used whenever the LLM is offline or returns
/// unusable output (`spec.md` §4.2).
pub struct HeuristicPlanner;

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn initial_plan(&self, input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        let queries = synthesize_fallback_queries(&input.question, input.queries_remaining.max(1));
        Ok(PlannerDecision {
            next_action: NextAction::SearchMore,
            queries,
            coverage_gaps: Vec::new(),
            target_source_types: Vec::new(),
            confidence: 0.3,
            reason: "heuristic fallback: initial search".to_string(),
        })
    }

    async fn evaluate_evidence(&self, input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        let has_full_text = input.ranked_evidence.iter().any(|e| e.has_full_text);
        let no_contradiction = !input.ranked_evidence.iter().any(|e| e.contradiction);
        let recency_ok = !input.time_sensitive || has_recency_signal(&input.ranked_evidence);
        let budget_exhausted = input.queries_remaining == 0
            || input.sources_remaining == 0
            || input.loops_remaining == 0;

        if input.ranked_evidence.len() >= 3 && has_full_text && recency_ok && no_contradiction {
            return Ok(PlannerDecision {
                next_action: NextAction::Finalize,
                queries: Vec::new(),
                coverage_gaps: Vec::new(),
                target_source_types: Vec::new(),
                confidence: 0.6,
                reason: "heuristic fallback: sufficient corroborated evidence".to_string(),
            });
        }

        if budget_exhausted {
            return Ok(PlannerDecision {
                next_action: NextAction::Finalize,
                queries: Vec::new(),
                coverage_gaps: Vec::new(),
                target_source_types: Vec::new(),
                confidence: 0.2,
                reason: "heuristic fallback: budget exhausted".to_string(),
            });
        }

        let queries = synthesize_fallback_queries(&input.question, input.queries_remaining.max(1));
        Ok(PlannerDecision {
            next_action: NextAction::SearchMore,
            queries,
            coverage_gaps: input.coverage_gaps.clone(),
            target_source_types: Vec::new(),
            confidence: 0.3,
            reason: "heuristic fallback: evidence still thin".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawPlannerDecision {
    next_action: String,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    coverage_gaps: Vec<String>,
    #[serde(default)]
    target_source_types: Vec<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// Extracts the outermost `{...}` block from a free-text LLM response and
/// decodes it strictly, rejecting unknown fields (`spec.md` §4.2).
fn parse_decision(raw_text: &str) -> Option<PlannerDecision> {
    let start = raw_text.find('{')?;
    let end = raw_text.rfind('}')?;
    if end < start {
        return None;
    }
    let candidate = &raw_text[start..=end];
    let raw: RawPlannerDecision = serde_json::from_str(candidate).ok()?;
    let next_action = match raw.next_action.as_str() {
        "search_more" => NextAction::SearchMore,
        "finalize" => NextAction::Finalize,
        _ => return None,
    };
    Some(PlannerDecision {
        next_action,
        queries: raw.queries,
        coverage_gaps: raw.coverage_gaps,
        target_source_types: raw.target_source_types,
        confidence: raw.confidence,
        reason: raw.reason,
    })
}

fn budget_summary(input: &PlannerInput) -> String {
    format!(
        "queries remaining: {}, sources remaining: {}, loops remaining: {}",
        input.queries_remaining, input.sources_remaining, input.loops_remaining
    )
}

fn evidence_summary(input: &PlannerInput) -> String {
    input
        .ranked_evidence
        .iter()
        .take(12)
        .enumerate()
        .map(|(i, e)| {
            let snippet: String = e.excerpt.chars().take(160).collect();
            format!(
                "[{}] {} | score={:.2} | full_text={} | contradiction={} | {}",
                i + 1,
                e.citation.title,
                e.score,
                e.has_full_text,
                e.contradiction,
                snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const SCHEMA_HINT: &str = r#"Respond with exactly one JSON object matching this schema and nothing else:
{"nextAction":"search_more"|"finalize","queries":[string],"coverageGaps":[string],"targetSourceTypes":[string],"confidence":number between 0 and 1,"reason":string}"#;

fn initial_plan_prompt(input: &PlannerInput) -> String {
    format!(
        "You are planning web research.\n{SCHEMA_HINT}\n\nQuestion: {}\nTime-sensitive: {}\n{}\n",
        input.question,
        input.time_sensitive,
        budget_summary(input),
    )
}

fn evaluate_prompt(input: &PlannerInput) -> String {
    format!(
        "You are evaluating gathered web research evidence.\n{SCHEMA_HINT}\n\nQuestion: {}\nTime-sensitive: {}\n{}\nPrior queries: {}\nKnown coverage gaps: {}\n\nEvidence so far:\n{}\n",
        input.question,
        input.time_sensitive,
        budget_summary(input),
        input.prior_queries.join("; "),
        input.coverage_gaps.join("; "),
        evidence_summary(input),
    )
}

/// LLM-backed planner with a strict JSON contract; falls through to
/// `HeuristicPlanner` on any parse/validation failure (`spec.md` §4.2).
pub struct JsonPlanner {
    providers: ProviderRegistry,
    heuristic: HeuristicPlanner,
}

impl JsonPlanner {
    pub fn new(providers: ProviderRegistry) -> Self {
        JsonPlanner {
            providers,
            heuristic: HeuristicPlanner,
        }
    }

    async fn decide(&self, prompt: &str, input: &PlannerInput, fallback_initial: bool) -> PlannerDecision {
        let response = match self.providers.default_complete(prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "planner completion failed, using heuristic fallback");
                return self.run_heuristic(input, fallback_initial).await;
            }
        };

        match parse_decision(&response) {
            Some(mut decision) => {
                if decision.next_action == NextAction::SearchMore && decision.queries.is_empty() {
                    decision.queries =
                        synthesize_fallback_queries(&input.question, input.queries_remaining.max(1));
                }
                decision
            }
            None => {
                tracing::warn!("planner returned unparsable decision, using heuristic fallback");
                self.run_heuristic(input, fallback_initial).await
            }
        }
    }

    async fn run_heuristic(&self, input: &PlannerInput, initial: bool) -> PlannerDecision {
        let result = if initial {
            self.heuristic.initial_plan(input).await
        } else {
            self.heuristic.evaluate_evidence(input).await
        };
        result.unwrap_or(PlannerDecision {
            next_action: NextAction::Finalize,
            queries: Vec::new(),
            coverage_gaps: Vec::new(),
            target_source_types: Vec::new(),
            confidence: 0.0,
            reason: "heuristic fallback unavailable".to_string(),
        })
    }
}

#[async_trait]
impl Planner for JsonPlanner {
    async fn initial_plan(&self, input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        Ok(self.decide(&initial_plan_prompt(input), input, true).await)
    }

    async fn evaluate_evidence(&self, input: &PlannerInput) -> anyhow::Result<PlannerDecision> {
        Ok(self.decide(&evaluate_prompt(input), input, false).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> PlannerInput {
        PlannerInput {
            question: "What changed in Rust 2024?".to_string(),
            time_sensitive: false,
            loop_index: 1,
            queries_remaining: 4,
            sources_remaining: 4,
            loops_remaining: 2,
            coverage_gaps: Vec::new(),
            prior_queries: Vec::new(),
            ranked_evidence: Vec::new(),
            recent_candidates: Vec::new(),
        }
    }

    #[tokio::test]
    async fn heuristic_initial_plan_is_search_more() {
        let planner = HeuristicPlanner;
        let decision = planner.initial_plan(&base_input()).await.unwrap();
        assert_eq!(decision.next_action, NextAction::SearchMore);
        assert!(!decision.queries.is_empty());
    }

    #[tokio::test]
    async fn heuristic_finalizes_when_budget_exhausted() {
        let planner = HeuristicPlanner;
        let mut input = base_input();
        input.queries_remaining = 0;
        let decision = planner.evaluate_evidence(&input).await.unwrap();
        assert_eq!(decision.next_action, NextAction::Finalize);
    }

    #[test]
    fn parse_decision_extracts_outer_json_block() {
        let text = "Here is my answer:\n```json\n{\"nextAction\":\"finalize\",\"queries\":[],\"coverageGaps\":[],\"targetSourceTypes\":[],\"confidence\":0.9,\"reason\":\"done\"}\n```";
        let decision = parse_decision(text).unwrap();
        assert_eq!(decision.next_action, NextAction::Finalize);
        assert_eq!(decision.confidence, 0.9);
    }

    #[test]
    fn parse_decision_rejects_unknown_fields() {
        let text = r#"{"nextAction":"finalize","queries":[],"coverageGaps":[],"targetSourceTypes":[],"confidence":0.5,"reason":"x","extra":true}"#;
        assert!(parse_decision(text).is_none());
    }

    #[test]
    fn normalize_decision_dedupes_and_clamps() {
        let decision = PlannerDecision {
            next_action: NextAction::SearchMore,
            queries: vec!["Rust async".to_string(), "rust   async".to_string(), "tokio".to_string()],
            coverage_gaps: Vec::new(),
            target_source_types: Vec::new(),
            confidence: 1.5,
            reason: String::new(),
        };
        let normalized = normalize_decision(decision, 1);
        assert_eq!(normalized.queries.len(), 1);
        assert_eq!(normalized.confidence, 1.0);
    }
}
