use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Pending,
    Baseline,
    Active,
    Washout,
    Completed,
    Paused,
    Cancelled,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Pending => "pending",
            ExperimentStatus::Baseline => "baseline",
            ExperimentStatus::Active => "active",
            ExperimentStatus::Washout => "washout",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Cancelled)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ExperimentStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(ExperimentStatus::Pending),
            "baseline" => Ok(ExperimentStatus::Baseline),
            "active" => Ok(ExperimentStatus::Active),
            "washout" => Ok(ExperimentStatus::Washout),
            "completed" => Ok(ExperimentStatus::Completed),
            "paused" => Ok(ExperimentStatus::Paused),
            "cancelled" => Ok(ExperimentStatus::Cancelled),
            other => Err(format!("unsupported experiment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Objective,
    Subjective,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Objective => "objective",
            MetricKind::Subjective => "subjective",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MetricKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "objective" => Ok(MetricKind::Objective),
            "subjective" => Ok(MetricKind::Subjective),
            other => Err(format!("unsupported metric kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRecord {
    pub id: String,
    pub user_id: String,
    pub supplement_type: String,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
    /// External supplement-catalog identifier (NIH DSLD).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsld_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dose_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dose_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dose_frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dose_timing: Option<String>,
    pub intent: String,
    pub status: ExperimentStatus,
    pub baseline_days: i64,
    pub experiment_days: i64,
    pub washout_days: i64,
    pub noise_filters: Vec<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentCreateInput {
    pub user_id: String,
    pub supplement_type: String,
    pub product_name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub strength: Option<String>,
    #[serde(default)]
    pub serving_size: Option<String>,
    #[serde(default)]
    pub dsld_id: Option<String>,
    #[serde(default)]
    pub dose_amount: Option<f64>,
    #[serde(default)]
    pub dose_unit: Option<String>,
    #[serde(default)]
    pub dose_frequency: Option<String>,
    #[serde(default)]
    pub dose_timing: Option<String>,
    /// Falls back to the catalog's primary intent for the supplement type.
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub duration_override_days: Option<i64>,
    /// Metric names to track; defaults to every metric the catalog lists.
    #[serde(default)]
    pub metric_selection: Option<Vec<String>>,
}

/// Snapshot of a catalog metric config, attached to the experiment at
/// creation time. Immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentMetricRecord {
    pub id: String,
    pub experiment_id: String,
    pub metric_name: String,
    pub kind: MetricKind,
    pub data_source: String,
    pub baseline_days: i64,
    pub expected_onset_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    /// Loaded from the catalog but not consulted by the verdict classifier,
    /// which applies the global thresholds. Kept available pending product
    /// clarification.
    pub minimum_effect: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_max: Option<f64>,
    pub requires_checkin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveExperimentSummary {
    pub intent: String,
    pub product_name: String,
    pub supplement_type: String,
}
