use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mode selection; the spec's Non-goals exclude per-request budget
/// configuration beyond choosing one of these two profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Chat,
    DeepResearch,
}

/// Recognized options and their bounds (`spec.md` §6). Invalid (zero or
/// unparsable) values clamp to the mode default at construction; nothing here
/// ever panics on bad input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchProfile {
    pub mode: Mode,
    pub max_loops: u32,
    pub max_sources_read: u32,
    pub max_search_queries: u32,
    pub max_citations: u32,
    pub search_results_per_query: u32,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    #[serde(with = "duration_millis")]
    pub min_search_interval: Duration,
    #[serde(with = "duration_millis")]
    pub source_fetch_timeout: Duration,
    pub source_max_bytes: usize,
}

impl Default for ResearchProfile {
    fn default() -> Self {
        ResearchProfile::chat()
    }
}

impl ResearchProfile {
    pub fn chat() -> Self {
        ResearchProfile {
            mode: Mode::Chat,
            max_loops: 2,
            max_sources_read: 4,
            max_search_queries: 4,
            max_citations: 8,
            search_results_per_query: 6,
            timeout: Duration::from_secs(20),
            min_search_interval: Duration::ZERO,
            source_fetch_timeout: Duration::from_secs(12),
            source_max_bytes: 1_500_000,
        }
    }

    pub fn deep_research() -> Self {
        ResearchProfile {
            mode: Mode::DeepResearch,
            max_loops: 6,
            max_sources_read: 16,
            max_search_queries: 18,
            max_citations: 12,
            search_results_per_query: 6,
            timeout: Duration::from_secs(150),
            min_search_interval: default_rate_limit_delay(),
            source_fetch_timeout: Duration::from_secs(12),
            source_max_bytes: 1_500_000,
        }
    }

    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Chat => ResearchProfile::chat(),
            Mode::DeepResearch => ResearchProfile::deep_research(),
        }
    }

    /// Clamps every budget field to at least 1 (and every duration to at
    /// least 1ms), falling back to the mode's default for anything that
    /// would otherwise be zero. Constructors must call this; it is the only
    /// place invalid configuration is repaired.
    pub fn clamped(mut self) -> Self {
        let default = ResearchProfile::for_mode(self.mode);
        self.max_loops = clamp_u32(self.max_loops, default.max_loops);
        self.max_sources_read = clamp_u32(self.max_sources_read, default.max_sources_read);
        self.max_search_queries = clamp_u32(self.max_search_queries, default.max_search_queries);
        self.max_citations = clamp_u32(self.max_citations, default.max_citations);
        self.search_results_per_query =
            clamp_u32(self.search_results_per_query, default.search_results_per_query);
        if self.timeout.is_zero() {
            self.timeout = default.timeout;
        }
        if self.source_fetch_timeout.is_zero() {
            self.source_fetch_timeout = default.source_fetch_timeout;
        }
        if self.source_max_bytes == 0 {
            self.source_max_bytes = default.source_max_bytes;
        }
        self
    }
}

fn clamp_u32(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

/// Default pacing delay applied after a rate-limit response (§4.1, §9 open
/// question 1 — see DESIGN.md).
pub fn default_rate_limit_delay() -> Duration {
    Duration::from_millis(1500)
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
