use serde::{Deserialize, Serialize};

use crate::models::experiment::ActiveExperimentSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIntent {
    pub intent: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    pub active_intents: Vec<String>,
    pub active_experiments: Vec<ActiveExperimentSummary>,
    pub blocked_intents: Vec<BlockedIntent>,
    /// All catalog intents minus the blocked set.
    pub allowed_intents: Vec<String>,
}
