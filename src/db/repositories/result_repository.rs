use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::analysis::{ExperimentResultRecord, MetricResult, Verdict};

const RESULT_COLUMNS: &str = r#"
    id,
    experiment_id,
    computed_at,
    baseline_days_used,
    experiment_days_used,
    noisy_days_excluded,
    metric_results,
    overall_verdict,
    overall_effect_size,
    summary,
    recommendations,
    confidence
"#;

#[derive(Debug, Clone)]
pub struct ExperimentResultRow {
    pub id: String,
    pub experiment_id: String,
    pub computed_at: String,
    pub baseline_days_used: i64,
    pub experiment_days_used: i64,
    pub noisy_days_excluded: i64,
    pub metric_results: String,
    pub overall_verdict: String,
    pub overall_effect_size: Option<f64>,
    pub summary: Option<String>,
    pub recommendations: String,
    pub confidence: f64,
}

impl ExperimentResultRow {
    pub fn into_record(self) -> AppResult<ExperimentResultRecord> {
        let overall_verdict =
            Verdict::try_from(self.overall_verdict.as_str()).map_err(AppError::validation)?;
        let metric_results: Vec<MetricResult> = serde_json::from_str(&self.metric_results)?;
        let recommendations: Vec<String> = serde_json::from_str(&self.recommendations)?;

        Ok(ExperimentResultRecord {
            id: self.id,
            experiment_id: self.experiment_id,
            computed_at: self.computed_at,
            baseline_days_used: self.baseline_days_used,
            experiment_days_used: self.experiment_days_used,
            noisy_days_excluded: self.noisy_days_excluded,
            metric_results,
            overall_verdict,
            overall_effect_size: self.overall_effect_size,
            summary: self.summary,
            recommendations,
            confidence: self.confidence,
        })
    }
}

impl TryFrom<&Row<'_>> for ExperimentResultRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            experiment_id: row.get("experiment_id")?,
            computed_at: row.get("computed_at")?,
            baseline_days_used: row.get("baseline_days_used")?,
            experiment_days_used: row.get("experiment_days_used")?,
            noisy_days_excluded: row.get("noisy_days_excluded")?,
            metric_results: row.get("metric_results")?,
            overall_verdict: row.get("overall_verdict")?,
            overall_effect_size: row.get("overall_effect_size")?,
            summary: row.get("summary")?,
            recommendations: row.get("recommendations")?,
            confidence: row.get("confidence")?,
        })
    }
}

pub struct ResultRepository;

impl ResultRepository {
    /// Result rows are append-only; recomputation inserts a new row rather
    /// than mutating a prior one.
    pub fn insert(conn: &Connection, record: &ExperimentResultRecord) -> AppResult<()> {
        let metric_results = serde_json::to_string(&record.metric_results)?;
        let recommendations = serde_json::to_string(&record.recommendations)?;

        conn.execute(
            r#"
                INSERT INTO experiment_results (
                    id, experiment_id, computed_at, baseline_days_used,
                    experiment_days_used, noisy_days_excluded, metric_results,
                    overall_verdict, overall_effect_size, summary,
                    recommendations, confidence
                ) VALUES (
                    :id, :experiment_id, :computed_at, :baseline_days_used,
                    :experiment_days_used, :noisy_days_excluded, :metric_results,
                    :overall_verdict, :overall_effect_size, :summary,
                    :recommendations, :confidence
                )
            "#,
            named_params! {
                ":id": &record.id,
                ":experiment_id": &record.experiment_id,
                ":computed_at": &record.computed_at,
                ":baseline_days_used": &record.baseline_days_used,
                ":experiment_days_used": &record.experiment_days_used,
                ":noisy_days_excluded": &record.noisy_days_excluded,
                ":metric_results": &metric_results,
                ":overall_verdict": record.overall_verdict.as_str(),
                ":overall_effect_size": &record.overall_effect_size,
                ":summary": &record.summary,
                ":recommendations": &recommendations,
                ":confidence": &record.confidence,
            },
        )?;

        Ok(())
    }

    /// The most recent row is the authoritative one for display.
    pub fn find_latest(
        conn: &Connection,
        experiment_id: &str,
    ) -> AppResult<Option<ExperimentResultRecord>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM experiment_results
             WHERE experiment_id = :experiment_id
             ORDER BY computed_at DESC, id DESC
             LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;

        let row = stmt
            .query_row(named_params! {":experiment_id": experiment_id}, |row| {
                ExperimentResultRow::try_from(row)
            })
            .optional()?;

        match row {
            Some(row) => Ok(Some(row.into_record()?)),
            None => Ok(None),
        }
    }

    pub fn count_for_experiment(conn: &Connection, experiment_id: &str) -> AppResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM experiment_results WHERE experiment_id = :experiment_id",
            named_params! {":experiment_id": experiment_id},
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
