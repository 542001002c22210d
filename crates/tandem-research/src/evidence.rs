use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Utc;
use tandem_types::{Citation, Evidence, ReadResult};
use url::Url;

const READ_BONUS: f64 = 0.22;
const CONTRADICTION_PENALTY: f64 = 0.05;
const TIME_SENSITIVE_STALE_PENALTY: f64 = 0.08;
const MAX_EXCERPT_RUNES_SEARCH: usize = 900;
const MAX_EXCERPT_RUNES_READ: usize = 6000;
const CORROBORATION_STEP: f64 = 0.03;
const CORROBORATION_CAP: f64 = 0.15;
const MIN_SHARED_TOKENS: usize = 3;

/// Small, explicitly tunable hostname-quality table (`spec.md` §9 open
/// question 2, resolved in SPEC_FULL.md §13.2).
const AUTHORITATIVE_SUFFIXES: &[(&str, f64)] = &[
    (".gov", 0.10),
    (".mil", 0.10),
    (".edu", 0.10),
    ("wikipedia.org", 0.08),
    ("developer.mozilla.org", 0.08),
    ("rfc-editor.org", 0.08),
    (".gov.uk", 0.08),
];

const LOW_AUTHORITY_HOSTS: &[&str] = &["medium.com", "blogspot.com", "tumblr.com", "pinterest.com"];

const RECENCY_SIGNALS: &[&str] = &["updated", "latest", "today", "this week", "breaking"];

const CONTRADICTION_SIGNALS: &[&str] = &[
    "contradict",
    "conflict",
    "disputed",
    "unclear",
    "not confirmed",
    "however",
    "on the other hand",
];

/// Tracking-parameter prefixes stripped during canonicalization.
const TRACKING_PARAM_PREFIXES: &[&str] = &["utm_", "ref", "fbclid", "gclid", "mc_cid", "mc_eid"];

pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Normalizes a raw URL into the dedup key used by the pool (`spec.md` §4.5,
/// GLOSSARY "Canonical URL"): lowercased host, stripped tracking params,
/// default ports removed, trailing path slash preserved. Falls back to the
/// trimmed raw URL when parsing fails.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    if let Some(host) = url.host_str() {
        let lowered = host.to_ascii_lowercase();
        let _ = url.set_host(Some(&lowered));
    }

    match (url.scheme(), url.port()) {
        ("http", Some(80)) | ("https", Some(443)) => {
            let _ = url.set_port(None);
        }
        _ => {}
    }

    let retained_pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if retained_pairs.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &retained_pairs {
            pairs.append_pair(k, v);
        }
    }
    let result = url.to_string();
    if result.is_empty() {
        trimmed.to_string()
    } else {
        result
    }
}

fn is_tracking_param(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    TRACKING_PARAM_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

fn truncate_runes(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn has_recency_signal(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    let current_year = Utc::now().format("%Y").to_string();
    lowered.contains(&current_year) || RECENCY_SIGNALS.iter().any(|s| lowered.contains(s))
}

fn has_contradiction_signal(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    CONTRADICTION_SIGNALS.iter().any(|s| lowered.contains(s))
}

/// True iff `host` is `domain` itself or a subdomain of it (a `.`-bounded
/// suffix match), so `evilwikipedia.org` does not match `wikipedia.org`.
fn host_matches_domain(host: &str, domain: &str) -> bool {
    let bare = domain.trim_start_matches('.');
    host == bare || host.ends_with(&format!(".{bare}"))
}

fn source_quality_for(url: &str) -> f64 {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default();
    for (suffix, bonus) in AUTHORITATIVE_SUFFIXES {
        if host_matches_domain(&host, suffix) {
            return *bonus;
        }
    }
    for low in LOW_AUTHORITY_HOSTS {
        if host_matches_domain(&host, low) {
            return -0.05;
        }
    }
    0.0
}

fn completeness_for(snippet_len: usize) -> f64 {
    if snippet_len >= 1200 {
        0.12
    } else if snippet_len >= 500 {
        0.08
    } else if snippet_len >= 180 {
        0.04
    } else {
        0.0
    }
}

/// Per-request in-memory evidence store. Single-owner; never shared or
/// persisted across requests (`spec.md` §4.5, §5).
#[derive(Default)]
pub struct EvidencePool {
    rows: HashMap<String, Evidence>,
    read_urls: std::collections::HashSet<String>,
}

impl EvidencePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_read(&self, raw_url: &str) -> bool {
        self.read_urls.contains(&canonical_url(raw_url))
    }

    /// Merges a search-provider hit into the pool (`spec.md` §4.5).
    pub fn add_search_candidate(&mut self, citation: Citation, time_sensitive: bool) -> String {
        let key = canonical_url(&citation.url);
        let entry = self.rows.entry(key.clone()).or_insert_with(|| Evidence {
            canonical_url: key.clone(),
            citation: citation.clone(),
            content_type: None,
            excerpt: String::new(),
            source_quality: 0.0,
            freshness: 0.0,
            completeness: 0.0,
            corroboration: 0.0,
            contradiction: false,
            fetched_at: None,
            has_full_text: false,
            score: 0.0,
        });

        merge_citation(&mut entry.citation, &citation);

        if entry.excerpt.is_empty() {
            entry.excerpt = truncate_runes(&citation.snippet, MAX_EXCERPT_RUNES_SEARCH);
        }

        let combined_text = format!("{} {}", entry.citation.title, entry.excerpt);
        entry.source_quality = source_quality_for(&entry.citation.url);
        entry.freshness = if has_recency_signal(&combined_text) {
            0.08
        } else {
            0.0
        };
        entry.completeness = completeness_for(entry.excerpt.chars().count());

        let mut score = entry.citation.score
            + entry.source_quality
            + entry.freshness
            + entry.completeness
            + entry.corroboration;
        if time_sensitive && entry.freshness == 0.0 {
            score -= TIME_SENSITIVE_STALE_PENALTY;
        }
        entry.score = clamp01(score);
        key
    }

    /// Upgrades a candidate to a fully-read source (`spec.md` §4.5).
    pub fn add_read_result(
        &mut self,
        base_citation: Citation,
        read_result: &ReadResult,
        time_sensitive: bool,
    ) -> String {
        let key = canonical_url(&read_result.final_url);
        let entry = self.rows.entry(key.clone()).or_insert_with(|| Evidence {
            canonical_url: key.clone(),
            citation: base_citation.clone(),
            content_type: None,
            excerpt: String::new(),
            source_quality: 0.0,
            freshness: 0.0,
            completeness: 0.0,
            corroboration: 0.0,
            contradiction: false,
            fetched_at: None,
            has_full_text: false,
            score: 0.0,
        });

        merge_citation(&mut entry.citation, &base_citation);
        if !read_result.title.trim().is_empty() && entry.citation.title.trim().is_empty() {
            entry.citation.title = read_result.title.clone();
        }

        entry.content_type = Some(read_result.content_type.clone());
        entry.excerpt = truncate_runes(&read_result.text, MAX_EXCERPT_RUNES_READ);
        entry.has_full_text = true;
        entry.fetched_at = Some(read_result.fetched_at);

        let combined_text = format!("{} {}", entry.citation.title, entry.excerpt);
        entry.source_quality = source_quality_for(&entry.canonical_url);
        entry.freshness = if has_recency_signal(&combined_text) {
            0.08
        } else {
            0.0
        };
        entry.completeness = completeness_for(entry.excerpt.chars().count());
        entry.contradiction = has_contradiction_signal(&entry.excerpt);

        let mut score = entry.citation.score
            + entry.source_quality
            + entry.freshness
            + entry.completeness
            + entry.corroboration
            + READ_BONUS;
        if time_sensitive && entry.freshness == 0.0 {
            score -= TIME_SENSITIVE_STALE_PENALTY;
        }
        if entry.contradiction {
            score -= CONTRADICTION_PENALTY;
        }
        entry.score = clamp01(score);

        self.read_urls.insert(key.clone());
        key
    }

    /// Applies the corroboration pass and returns a deterministically sorted
    /// snapshot (`spec.md` §4.5, §9 "Cycles in corroboration").
    pub fn rank(&mut self) -> Vec<Evidence> {
        self.apply_corroboration();
        let mut rows: Vec<Evidence> = self.rows.values().cloned().collect();
        rows.sort_by(|a, b| compare_evidence(a, b));
        rows
    }

    pub fn top_citations(&mut self, limit: usize) -> Vec<Citation> {
        self.rank()
            .into_iter()
            .take(limit)
            .map(|e| e.citation)
            .collect()
    }

    fn apply_corroboration(&mut self) {
        let keys: Vec<String> = self.rows.keys().cloned().collect();
        let mut bumps: HashMap<String, f64> = HashMap::new();

        for i in 0..keys.len() {
            for j in 0..keys.len() {
                if i == j {
                    continue;
                }
                let (Some(a), Some(b)) = (self.rows.get(&keys[i]), self.rows.get(&keys[j])) else {
                    continue;
                };
                if host_of(&a.citation.url) == host_of(&b.citation.url) {
                    continue;
                }
                if shared_token_count(a, b) >= MIN_SHARED_TOKENS {
                    *bumps.entry(keys[i].clone()).or_insert(0.0) += CORROBORATION_STEP;
                }
            }
        }

        for key in keys {
            if let Some(entry) = self.rows.get_mut(&key) {
                let capped = bumps.get(&key).copied().unwrap_or(0.0).min(CORROBORATION_CAP);
                let baseline = clamp01(entry.score - entry.corroboration);
                entry.corroboration = capped;
                entry.score = clamp01(baseline + capped);
            }
        }
    }
}

fn merge_citation(existing: &mut Citation, incoming: &Citation) {
    if incoming.title.len() > existing.title.len() {
        existing.title = incoming.title.clone();
    }
    if incoming.snippet.len() > existing.snippet.len() {
        existing.snippet = incoming.snippet.clone();
    }
    if incoming.pass >= existing.pass {
        existing.pass = incoming.pass;
        existing.query = incoming.query.clone();
    }
    if incoming.score > existing.score {
        existing.score = incoming.score;
        existing.url = incoming.url.clone();
    } else if existing.url.is_empty() {
        existing.url = incoming.url.clone();
    }
    if !incoming.source_provider.is_empty() {
        existing.source_provider = incoming.source_provider.clone();
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "to", "in", "on", "and", "or", "for", "is", "are", "with", "by", "at",
    "from", "this", "that", "it", "as", "be", "was", "were",
];

fn token_set(evidence: &Evidence) -> std::collections::HashSet<String> {
    let text = format!(
        "{} {} {}",
        evidence.citation.title, evidence.citation.snippet, evidence.excerpt
    )
    .to_ascii_lowercase();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

fn shared_token_count(a: &Evidence, b: &Evidence) -> usize {
    let ta = token_set(a);
    let tb = token_set(b);
    ta.intersection(&tb).count()
}

fn compare_evidence(a: &Evidence, b: &Evidence) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.has_full_text.cmp(&a.has_full_text))
        .then_with(|| a.citation.pass.cmp(&b.citation.pass))
        .then_with(|| a.canonical_url.cmp(&b.canonical_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(url: &str, score: f64) -> Citation {
        Citation {
            url: url.to_string(),
            title: "Title".to_string(),
            snippet: "A snippet".to_string(),
            source_provider: "test".to_string(),
            query: "q".to_string(),
            pass: 1,
            score,
        }
    }

    #[test]
    fn dedups_by_canonical_url() {
        let mut pool = EvidencePool::new();
        pool.add_search_candidate(citation("https://example.com/page?ref=1", 0.4), false);
        pool.add_search_candidate(citation("https://example.com/page?ref=2", 0.5), false);
        let ranked = pool.rank();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].canonical_url, "https://example.com/page");
        assert_eq!(ranked[0].citation.url, "https://example.com/page?ref=2");
    }

    #[test]
    fn read_bonus_upgrades_score_and_full_text() {
        let mut pool = EvidencePool::new();
        let c = citation("https://example.com/a", 0.3);
        pool.add_search_candidate(c.clone(), false);
        let read = ReadResult {
            requested_url: c.url.clone(),
            final_url: c.url.clone(),
            title: "Title".to_string(),
            content_type: "text/html".to_string(),
            text: "Some extracted text about the topic.".to_string(),
            snippet: "Some extracted text".to_string(),
            truncated: false,
            fetched_at: Utc::now(),
            status: tandem_types::FetchStatus::Ok,
        };
        pool.add_read_result(c, &read, false);
        let ranked = pool.rank();
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].has_full_text);
        assert!(ranked[0].score >= 0.3);
    }

    #[test]
    fn contradiction_signal_is_flagged() {
        let mut pool = EvidencePool::new();
        let c = citation("https://example.com/a", 0.6);
        pool.add_search_candidate(c.clone(), false);
        let read = ReadResult {
            requested_url: c.url.clone(),
            final_url: c.url.clone(),
            title: "Report".to_string(),
            content_type: "text/html".to_string(),
            text: "The report is disputed and contains conflicting measurements.".to_string(),
            snippet: "disputed".to_string(),
            truncated: false,
            fetched_at: Utc::now(),
            status: tandem_types::FetchStatus::Ok,
        };
        pool.add_read_result(c, &read, false);
        let ranked = pool.rank();
        assert!(ranked[0].contradiction);
    }

    #[test]
    fn rank_is_idempotent() {
        let mut pool = EvidencePool::new();
        pool.add_search_candidate(citation("https://a.example.com/1", 0.5), false);
        pool.add_search_candidate(citation("https://b.example.com/2", 0.4), false);
        let first = pool.rank();
        let second = pool.rank();
        let first_urls: Vec<_> = first.iter().map(|e| e.canonical_url.clone()).collect();
        let second_urls: Vec<_> = second.iter().map(|e| e.canonical_url.clone()).collect();
        assert_eq!(first_urls, second_urls);
    }

    #[test]
    fn corroboration_bump_does_not_compound_across_repeated_rank_calls() {
        let mut pool = EvidencePool::new();
        let mut corroborating = citation("https://a.example.com/1", 0.3);
        corroborating.title = "Shared Topic Report".to_string();
        corroborating.snippet = "alpha bravo charlie delta".to_string();
        pool.add_search_candidate(corroborating, false);

        let mut other = citation("https://b.example.com/2", 0.3);
        other.title = "Shared Topic Report".to_string();
        other.snippet = "alpha bravo charlie delta".to_string();
        pool.add_search_candidate(other, false);

        let first = pool.rank();
        let second = pool.rank();
        let third = pool.rank();

        let first_score = first.iter().find(|e| e.canonical_url.contains("a.example.com")).unwrap().score;
        let second_score = second.iter().find(|e| e.canonical_url.contains("a.example.com")).unwrap().score;
        let third_score = third.iter().find(|e| e.canonical_url.contains("a.example.com")).unwrap().score;

        assert_eq!(first_score, second_score);
        assert_eq!(second_score, third_score);
        assert!(first.iter().find(|e| e.canonical_url.contains("a.example.com")).unwrap().corroboration <= CORROBORATION_CAP);
    }

    #[test]
    fn canonical_url_strips_tracking_params_and_lowercases_host() {
        let canon = canonical_url("https://Example.com:443/Path/?utm_source=x&id=7");
        assert_eq!(canon, "https://example.com/Path/?id=7");
    }

    #[test]
    fn source_quality_requires_domain_boundary_match() {
        assert_eq!(source_quality_for("https://wikipedia.org/wiki/Rust"), 0.08);
        assert_eq!(source_quality_for("https://en.wikipedia.org/wiki/Rust"), 0.08);
        assert_eq!(source_quality_for("https://evilwikipedia.org/scam"), 0.0);
        assert_eq!(source_quality_for("https://state.gov/page"), 0.10);
        assert_eq!(source_quality_for("https://notrfc-editor.org/fake"), 0.0);
        assert_eq!(source_quality_for("https://medium.com/@author/post"), -0.05);
        assert_eq!(source_quality_for("https://fakemedium.com/post"), 0.0);
    }

    #[test]
    fn higher_scoring_duplicate_wins_reported_citation_url() {
        let mut pool = EvidencePool::new();
        pool.add_search_candidate(citation("https://example.com/page?ref=1", 0.4), false);
        pool.add_search_candidate(citation("https://example.com/page?ref=2", 0.5), false);
        let ranked = pool.rank();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].citation.url, "https://example.com/page?ref=2");

        let mut pool_reverse = EvidencePool::new();
        pool_reverse.add_search_candidate(citation("https://example.com/page?ref=2", 0.5), false);
        pool_reverse.add_search_candidate(citation("https://example.com/page?ref=1", 0.4), false);
        let ranked_reverse = pool_reverse.rank();
        assert_eq!(ranked_reverse[0].citation.url, "https://example.com/page?ref=2");
    }
}
