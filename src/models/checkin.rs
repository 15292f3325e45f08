use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckinPhase {
    Baseline,
    Active,
    Washout,
}

impl CheckinPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckinPhase::Baseline => "baseline",
            CheckinPhase::Active => "active",
            CheckinPhase::Washout => "washout",
        }
    }
}

impl fmt::Display for CheckinPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for CheckinPhase {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "baseline" => Ok(CheckinPhase::Baseline),
            "active" => Ok(CheckinPhase::Active),
            "washout" => Ok(CheckinPhase::Washout),
            other => Err(format!("unsupported checkin phase: {other}")),
        }
    }
}

/// One self-reported record per (experiment, calendar day). Re-submitting
/// the same day overwrites the earlier record (upsert semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCheckinRecord {
    pub id: String,
    pub experiment_id: String,
    pub user_id: String,
    /// Calendar date, `%Y-%m-%d`. Natural key together with the experiment.
    pub checkin_date: String,
    pub submitted_at: String,
    pub phase: CheckinPhase,
    /// 1-indexed offset from the experiment start date.
    pub day_number: i64,
    /// Open metric-name → rating mapping. Ratings are only meaningful for
    /// the experiment's declared subjective metrics, but extra keys are
    /// stored as submitted.
    pub ratings: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub noise_flags: Vec<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCheckinInput {
    pub ratings: HashMap<String, f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub noise_flags: Vec<String>,
    /// How the check-in was triggered ("manual", "reminder", ...).
    #[serde(default)]
    pub source: Option<String>,
}
