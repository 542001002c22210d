use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tandem_types::{
    Citation, DecisionHint, NextAction, OrchestratorResult, Phase, PlannerInput, Progress,
    ReadFailureReason, StopReason,
};

use crate::error::ResearchError;
use crate::evidence::EvidencePool;
use crate::planner::{normalize_decision, synthesize_fallback_queries, Planner};
use crate::profile::{default_rate_limit_delay, ResearchProfile};
use crate::reader::Reader;
use crate::searcher::{SearchError, SearchHit, Searcher};

const SEARCH_SCORE_BASE: f64 = 0.5;
const SEARCH_SCORE_STEP: f64 = 0.05;
const SEARCH_SCORE_FLOOR: f64 = 0.05;

const WARN_NO_GROUNDING: &str = "Grounding is unavailable";
const WARN_PLANNER_FALLBACK: &str = "Planner failed; continuing with bounded fallback strategy";
const WARN_RATE_LIMITED: &str = "Search provider rate limited";
const WARN_MISSING_KEY: &str = "Grounding is unavailable";
const WARN_SEARCH_FAILED: &str = "Search request failed; continuing without this query";
const WARN_SEARCH_SNIPPETS: &str = "Sources could not be read; continuing with search snippets";

struct RunState {
    pool: EvidencePool,
    loops_executed: u32,
    used_queries: u32,
    sources_considered: u32,
    sources_read: u32,
    read_attempts: u32,
    read_failures: u32,
    read_failure_reasons: BTreeMap<ReadFailureReason, u32>,
    warnings: Vec<String>,
    warnings_seen: HashSet<String>,
    prior_queries: Vec<String>,
    coverage_gaps: Vec<String>,
    recent_candidates: Vec<Citation>,
    last_search_at: Option<Instant>,
    fallback_warned: bool,
}

impl RunState {
    fn new() -> Self {
        RunState {
            pool: EvidencePool::new(),
            loops_executed: 0,
            used_queries: 0,
            sources_considered: 0,
            sources_read: 0,
            read_attempts: 0,
            read_failures: 0,
            read_failure_reasons: BTreeMap::new(),
            warnings: Vec::new(),
            warnings_seen: HashSet::new(),
            prior_queries: Vec::new(),
            coverage_gaps: Vec::new(),
            recent_candidates: Vec::new(),
            last_search_at: None,
            fallback_warned: false,
        }
    }

    fn add_warning(&mut self, message: &str) {
        let key = message.to_ascii_lowercase();
        if self.warnings_seen.insert(key) {
            self.warnings.push(message.to_string());
        }
    }

    fn record_read_failure(&mut self, reason: ReadFailureReason) {
        self.read_failures += 1;
        *self.read_failure_reasons.entry(reason).or_insert(0) += 1;
    }

    fn into_result(mut self, stop_reason: StopReason, max_citations: u32) -> OrchestratorResult {
        let ranked = self.pool.rank();
        let citations = ranked
            .iter()
            .take(max_citations as usize)
            .map(|e| e.citation.clone())
            .collect();
        let warning = self.warnings.first().cloned();
        OrchestratorResult {
            loops_executed: self.loops_executed,
            queries_used: self.used_queries,
            sources_considered: self.sources_considered,
            sources_read: self.sources_read,
            read_attempts: self.read_attempts,
            read_failures: self.read_failures,
            read_failure_reasons: self.read_failure_reasons.into_iter().collect(),
            citations,
            evidence: ranked,
            warnings: self.warnings,
            warning,
            stop_reason,
        }
    }
}

fn citation_from_hit(hit: SearchHit, query: &str, loop_index: u32, rank: usize) -> Citation {
    let score = (SEARCH_SCORE_BASE - (rank as f64) * SEARCH_SCORE_STEP).max(SEARCH_SCORE_FLOOR);
    Citation {
        url: hit.url,
        title: hit.title,
        snippet: hit.snippet,
        source_provider: "web_search".to_string(),
        query: query.to_string(),
        pass: loop_index,
        score,
    }
}

fn decision_hint(next_action: NextAction, is_fallback: bool) -> DecisionHint {
    if is_fallback {
        DecisionHint::Fallback
    } else {
        match next_action {
            NextAction::SearchMore => DecisionHint::SearchMore,
            NextAction::Finalize => DecisionHint::Finalize,
        }
    }
}

fn is_fallback_reason(reason: &str) -> bool {
    reason.starts_with("heuristic fallback")
}

/// Runs the bounded research loop (`spec.md` §4.1): plan, search, read,
/// evaluate, iterate, until the planner finalizes or a budget is exhausted.
pub struct Orchestrator {
    searcher: Option<Arc<dyn Searcher>>,
    reader: Arc<dyn Reader>,
    planner: Arc<dyn Planner>,
    profile: ResearchProfile,
}

impl Orchestrator {
    pub fn new(
        searcher: Option<Arc<dyn Searcher>>,
        reader: Arc<dyn Reader>,
        planner: Arc<dyn Planner>,
        profile: ResearchProfile,
    ) -> Self {
        Orchestrator {
            searcher,
            reader,
            planner,
            profile: profile.clamped(),
        }
    }

    pub async fn run(
        &self,
        question: &str,
        time_sensitive: bool,
        cancel: CancellationToken,
        mut on_progress: impl FnMut(Progress) + Send,
    ) -> (OrchestratorResult, Result<(), ResearchError>) {
        let profile = &self.profile;

        if question.trim().is_empty() {
            let state = RunState::new();
            return (state.into_result(StopReason::Sufficient, profile.max_citations), Ok(()));
        }

        let Some(searcher) = self.searcher.clone() else {
            let mut state = RunState::new();
            state.add_warning(WARN_NO_GROUNDING);
            return (state.into_result(StopReason::Error, profile.max_citations), Ok(()));
        };

        let deadline = Instant::now() + profile.timeout;
        let mut state = RunState::new();

        macro_rules! race {
            ($fut:expr) => {{
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return (
                            state.into_result(StopReason::Timeout, profile.max_citations),
                            Err(ResearchError::Timeout),
                        );
                    }
                    _ = sleep_until(deadline) => {
                        return (
                            state.into_result(StopReason::Timeout, profile.max_citations),
                            Err(ResearchError::Timeout),
                        );
                    }
                    res = $fut => res,
                }
            }};
        }

        let stop_reason;

        'loops: loop {
            if state.loops_executed >= profile.max_loops {
                stop_reason = StopReason::BudgetExhausted;
                break 'loops;
            }
            let loop_index = state.loops_executed + 1;

            if cancel.is_cancelled() || Instant::now() >= deadline {
                return (
                    state.into_result(StopReason::Timeout, profile.max_citations),
                    Err(ResearchError::Timeout),
                );
            }

            self.emit(
                &mut on_progress,
                Phase::Planning,
                &state,
                loop_index,
                None,
                None,
            );

            let ranked_evidence = state.pool.rank();
            let planner_input = PlannerInput {
                question: question.to_string(),
                time_sensitive,
                loop_index,
                queries_remaining: profile.max_search_queries.saturating_sub(state.used_queries),
                sources_remaining: profile.max_sources_read.saturating_sub(state.sources_read),
                loops_remaining: profile.max_loops.saturating_sub(state.loops_executed),
                coverage_gaps: state.coverage_gaps.clone(),
                prior_queries: state.prior_queries.clone(),
                ranked_evidence,
                recent_candidates: state.recent_candidates.clone(),
            };

            let decision = if loop_index == 1 {
                race!(self.planner.initial_plan(&planner_input))
            } else {
                race!(self.planner.evaluate_evidence(&planner_input))
            };
            let decision = decision.unwrap_or_else(|err| {
                tracing::warn!(error = %err, "planner call errored, falling back to heuristic reason tag");
                tandem_types::PlannerDecision {
                    next_action: NextAction::SearchMore,
                    queries: synthesize_fallback_queries(question, planner_input.queries_remaining.max(1)),
                    coverage_gaps: Vec::new(),
                    target_source_types: Vec::new(),
                    confidence: 0.3,
                    reason: "heuristic fallback: planner error".to_string(),
                }
            });
            let is_fallback = is_fallback_reason(&decision.reason);
            if is_fallback && !state.fallback_warned {
                state.add_warning(WARN_PLANNER_FALLBACK);
                state.fallback_warned = true;
            }
            let remaining_budget = profile.max_search_queries.saturating_sub(state.used_queries);
            let decision = normalize_decision(decision, remaining_budget);

            if decision.next_action == NextAction::Finalize && !state.pool.is_empty() {
                stop_reason = StopReason::Sufficient;
                break 'loops;
            }

            if state.used_queries >= profile.max_search_queries {
                stop_reason = StopReason::BudgetExhausted;
                break 'loops;
            }

            let mut queries = decision.queries;
            if queries.is_empty() {
                queries = synthesize_fallback_queries(question, 1);
            }

            self.emit(
                &mut on_progress,
                Phase::Searching,
                &state,
                loop_index,
                None,
                None,
            );

            let mut touched_this_loop: HashSet<String> = HashSet::new();
            for query in queries {
                if state.used_queries >= profile.max_search_queries {
                    break;
                }
                if let Some(last) = state.last_search_at {
                    let elapsed = last.elapsed();
                    if elapsed < profile.min_search_interval {
                        race!(sleep(profile.min_search_interval - elapsed));
                    }
                }

                let result = race!(searcher.search(&query, profile.search_results_per_query));
                state.used_queries += 1;
                state.prior_queries.push(query.clone());
                state.last_search_at = Some(Instant::now());

                let hits = match result {
                    Ok(hits) => Some(hits),
                    Err(err) => {
                        if let Some(search_err) = err.downcast_ref::<SearchError>() {
                            if search_err.is_missing_api_key() {
                                state.add_warning(WARN_MISSING_KEY);
                                stop_reason = StopReason::Error;
                                break 'loops;
                            }
                            if search_err.is_rate_limited() {
                                let delay = profile.min_search_interval.max(default_rate_limit_delay());
                                race!(sleep(delay));
                                let retry = race!(searcher.search(&query, profile.search_results_per_query));
                                match retry {
                                    Ok(hits) => Some(hits),
                                    Err(retry_err) => {
                                        if retry_err
                                            .downcast_ref::<SearchError>()
                                            .map(|e| e.is_missing_api_key())
                                            .unwrap_or(false)
                                        {
                                            state.add_warning(WARN_MISSING_KEY);
                                            stop_reason = StopReason::Error;
                                            break 'loops;
                                        }
                                        state.add_warning(WARN_RATE_LIMITED);
                                        None
                                    }
                                }
                            } else {
                                state.add_warning(WARN_SEARCH_FAILED);
                                None
                            }
                        } else {
                            state.add_warning(WARN_SEARCH_FAILED);
                            None
                        }
                    }
                };

                let Some(hits) = hits else { continue };
                for (rank, hit) in hits.into_iter().enumerate() {
                    let citation = citation_from_hit(hit, &query, loop_index, rank);
                    let key = state.pool.add_search_candidate(citation.clone(), time_sensitive);
                    touched_this_loop.insert(key);
                    state.recent_candidates.push(citation);
                }
                if state.recent_candidates.len() > 50 {
                    let overflow = state.recent_candidates.len() - 50;
                    state.recent_candidates.drain(0..overflow);
                }
            }

            if state.sources_read >= profile.max_sources_read {
                stop_reason = StopReason::BudgetExhausted;
                break 'loops;
            }

            let remaining_reads = profile.max_sources_read.saturating_sub(state.sources_read) as usize;
            let ranked_now = state.pool.rank();
            let to_read: Vec<Citation> = ranked_now
                .into_iter()
                .filter(|e| touched_this_loop.contains(&e.canonical_url) && !state.pool.has_read(&e.citation.url))
                .take(remaining_reads)
                .map(|e| e.citation)
                .collect();

            if to_read.is_empty() {
                if !state.pool.is_empty() {
                    stop_reason = StopReason::Sufficient;
                    break 'loops;
                }
                state.loops_executed += 1;
                continue 'loops;
            }

            self.emit(
                &mut on_progress,
                Phase::Reading,
                &state,
                loop_index,
                None,
                None,
            );

            for citation in to_read {
                if state.sources_read >= profile.max_sources_read {
                    break;
                }
                state.sources_considered += 1;
                let read_result = race!(self.reader.read(&citation.url));
                state.read_attempts += 1;
                if read_result.status.is_ok() {
                    state.pool.add_read_result(citation, &read_result, time_sensitive);
                    state.sources_read += 1;
                } else if let Some(reason) = read_result.status.failure_reason() {
                    state.record_read_failure(reason);
                } else {
                    state.record_read_failure(ReadFailureReason::FetchFailed);
                }
            }

            self.emit(
                &mut on_progress,
                Phase::Evaluating,
                &state,
                loop_index,
                None,
                None,
            );

            let ranked_evidence = state.pool.rank();
            let planner_input = PlannerInput {
                question: question.to_string(),
                time_sensitive,
                loop_index,
                queries_remaining: profile.max_search_queries.saturating_sub(state.used_queries),
                sources_remaining: profile.max_sources_read.saturating_sub(state.sources_read),
                loops_remaining: profile.max_loops.saturating_sub(state.loops_executed),
                coverage_gaps: state.coverage_gaps.clone(),
                prior_queries: state.prior_queries.clone(),
                ranked_evidence,
                recent_candidates: state.recent_candidates.clone(),
            };
            let eval_decision = race!(self.planner.evaluate_evidence(&planner_input));
            let eval_decision = eval_decision.unwrap_or_else(|err| {
                tracing::warn!(error = %err, "evaluation call errored, falling back to heuristic reason tag");
                tandem_types::PlannerDecision {
                    next_action: NextAction::SearchMore,
                    queries: Vec::new(),
                    coverage_gaps: Vec::new(),
                    target_source_types: Vec::new(),
                    confidence: 0.2,
                    reason: "heuristic fallback: planner error".to_string(),
                }
            });
            let is_fallback = is_fallback_reason(&eval_decision.reason);
            if is_fallback && !state.fallback_warned {
                state.add_warning(WARN_PLANNER_FALLBACK);
                state.fallback_warned = true;
            }
            let remaining_budget = profile.max_search_queries.saturating_sub(state.used_queries);
            let eval_decision = normalize_decision(eval_decision, remaining_budget);
            state.coverage_gaps = eval_decision.coverage_gaps.clone();

            if eval_decision.next_action == NextAction::Finalize {
                stop_reason = StopReason::Sufficient;
                break 'loops;
            }

            self.emit(
                &mut on_progress,
                Phase::Iterating,
                &state,
                loop_index,
                Some(decision_hint(eval_decision.next_action, is_fallback)),
                None,
            );
            state.loops_executed += 1;
        }

        if state.sources_read == 0 && state.read_attempts > 0 && state.read_failures == state.read_attempts {
            state.add_warning(WARN_SEARCH_SNIPPETS);
        }

        self.emit(
            &mut on_progress,
            Phase::Finalizing,
            &state,
            state.loops_executed.max(1),
            None,
            None,
        );

        (state.into_result(stop_reason, profile.max_citations), Ok(()))
    }

    fn emit(
        &self,
        on_progress: &mut impl FnMut(Progress),
        phase: Phase,
        state: &RunState,
        loop_index: u32,
        decision: Option<DecisionHint>,
        message: Option<String>,
    ) {
        tracing::info!(
            target: "tandem.obs",
            phase = ?phase,
            loop_index,
            sources_read = state.sources_read,
            sources_considered = state.sources_considered,
            "research phase transition"
        );
        on_progress(Progress {
            phase,
            message,
            loop_index,
            max_loops: self.profile.max_loops,
            pass: None,
            total_passes: None,
            sources_read: state.sources_read,
            sources_considered: state.sources_considered,
            title: None,
            detail: None,
            is_quick_step: false,
            decision,
        });
    }
}
