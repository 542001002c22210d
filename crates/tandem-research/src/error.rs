use thiserror::Error;

/// The one error kind the orchestrator boundary must let callers match on
/// (`spec.md` §7: "Error is non-nil only for cancellation/deadline"). Every
/// other fault — planner, searcher, reader — is converted into a warning and
/// a counter before it ever reaches here.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("research run cancelled or exceeded its deadline")]
    Timeout,
}
