use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::experiment::MetricKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    StrongSuccess,
    ModerateBenefit,
    NoEffect,
    MildNegative,
    NegativeEffect,
    InsufficientData,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::StrongSuccess => "strong_success",
            Verdict::ModerateBenefit => "moderate_benefit",
            Verdict::NoEffect => "no_effect",
            Verdict::MildNegative => "mild_negative",
            Verdict::NegativeEffect => "negative_effect",
            Verdict::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Verdict {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "strong_success" => Ok(Verdict::StrongSuccess),
            "moderate_benefit" => Ok(Verdict::ModerateBenefit),
            "no_effect" => Ok(Verdict::NoEffect),
            "mild_negative" => Ok(Verdict::MildNegative),
            "negative_effect" => Ok(Verdict::NegativeEffect),
            "insufficient_data" => Ok(Verdict::InsufficientData),
            other => Err(format!("unsupported verdict: {other}")),
        }
    }
}

/// Per-metric outcome embedded in an experiment result. Metrics skipped for
/// insufficient data or a zero-variance baseline do not appear at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub metric_name: String,
    pub kind: MetricKind,
    /// Cohen's d: (experiment mean − baseline mean) / baseline stddev.
    pub effect_size: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    pub experiment_mean: f64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub baseline_samples: i64,
    pub experiment_samples: i64,
}

/// Immutable outcome snapshot. Recomputation appends a new row; the most
/// recent row is authoritative for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResultRecord {
    pub id: String,
    pub experiment_id: String,
    pub computed_at: String,
    pub baseline_days_used: i64,
    pub experiment_days_used: i64,
    /// Reserved: noise-flagged days are not excluded from the math yet.
    pub noisy_days_excluded: i64,
    pub metric_results: Vec<MetricResult>,
    pub overall_verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_effect_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSufficiency {
    pub metric_name: String,
    pub kind: MetricKind,
    pub required_days: i64,
    pub available_days: i64,
    pub sufficient: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineValidation {
    /// True iff at least one objective metric is individually sufficient.
    /// Subjective metrics cannot exist retroactively, so an AND policy
    /// would make retroactive baselines unreachable.
    pub has_enough_data: bool,
    pub metrics: Vec<MetricSufficiency>,
}
