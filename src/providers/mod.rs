use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Per-metric statistics observed over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBaseline {
    /// Data-source identifier, e.g. "healthkit_hrv".
    pub metric_type: String,
    pub mean_value: Option<f64>,
    pub std_dev: Option<f64>,
    pub sample_count: i64,
}

/// External collaborator that aggregates passive-sensor health data.
///
/// The contract only supports trailing-N-day windows from "now", not
/// explicit date ranges. The analysis service therefore approximates the
/// historical baseline phase with a trailing window of the same length,
/// a known precision limitation.
#[async_trait]
pub trait BaselineStatsProvider: Send + Sync {
    async fn calculate_baselines(
        &self,
        user_id: &str,
        window_days: i64,
    ) -> AppResult<Vec<MetricBaseline>>;
}
