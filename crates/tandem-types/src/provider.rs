use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool-call schema threaded through `Provider::stream` for the final-answer
/// synthesis collaborator (`spec.md` §1 "external collaborators"). The
/// research core itself never calls tools; this exists only so the provider
/// boundary can still forward tool definitions when a synthesis stage wants
/// one, the way the teacher's `tandem-tools::Tool::schema` produces them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(alias = "providerID", alias = "providerId")]
    pub provider_id: String,
    #[serde(alias = "modelID", alias = "modelId")]
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider_id: String,
    pub display_name: String,
    pub context_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}
