use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::experiment::{
    ActiveExperimentSummary, ExperimentMetricRecord, ExperimentRecord, ExperimentStatus, MetricKind,
};

const EXPERIMENT_COLUMNS: &str = r#"
    id,
    user_id,
    supplement_type,
    product_name,
    brand,
    barcode,
    image_url,
    strength,
    serving_size,
    dsld_id,
    dose_amount,
    dose_unit,
    dose_frequency,
    dose_timing,
    intent,
    status,
    baseline_days,
    experiment_days,
    washout_days,
    noise_filters,
    created_at,
    baseline_start_date,
    experiment_start_date,
    experiment_end_date,
    completed_at
"#;

#[derive(Debug, Clone)]
pub struct ExperimentRow {
    pub id: String,
    pub user_id: String,
    pub supplement_type: String,
    pub product_name: String,
    pub brand: Option<String>,
    pub barcode: Option<String>,
    pub image_url: Option<String>,
    pub strength: Option<String>,
    pub serving_size: Option<String>,
    pub dsld_id: Option<String>,
    pub dose_amount: Option<f64>,
    pub dose_unit: Option<String>,
    pub dose_frequency: Option<String>,
    pub dose_timing: Option<String>,
    pub intent: String,
    pub status: String,
    pub baseline_days: i64,
    pub experiment_days: i64,
    pub washout_days: i64,
    pub noise_filters: String,
    pub created_at: String,
    pub baseline_start_date: Option<String>,
    pub experiment_start_date: Option<String>,
    pub experiment_end_date: Option<String>,
    pub completed_at: Option<String>,
}

impl ExperimentRow {
    pub fn into_record(self) -> AppResult<ExperimentRecord> {
        let status =
            ExperimentStatus::try_from(self.status.as_str()).map_err(AppError::validation)?;
        let noise_filters: Vec<String> = serde_json::from_str(&self.noise_filters)?;

        Ok(ExperimentRecord {
            id: self.id,
            user_id: self.user_id,
            supplement_type: self.supplement_type,
            product_name: self.product_name,
            brand: self.brand,
            barcode: self.barcode,
            image_url: self.image_url,
            strength: self.strength,
            serving_size: self.serving_size,
            dsld_id: self.dsld_id,
            dose_amount: self.dose_amount,
            dose_unit: self.dose_unit,
            dose_frequency: self.dose_frequency,
            dose_timing: self.dose_timing,
            intent: self.intent,
            status,
            baseline_days: self.baseline_days,
            experiment_days: self.experiment_days,
            washout_days: self.washout_days,
            noise_filters,
            created_at: self.created_at,
            baseline_start_date: self.baseline_start_date,
            experiment_start_date: self.experiment_start_date,
            experiment_end_date: self.experiment_end_date,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentMetricRow {
    pub id: String,
    pub experiment_id: String,
    pub metric_name: String,
    pub metric_kind: String,
    pub data_source: String,
    pub baseline_days: i64,
    pub expected_onset_days: i64,
    pub success_criteria: Option<String>,
    pub minimum_effect: f64,
    pub scale_min: Option<f64>,
    pub scale_max: Option<f64>,
    pub requires_checkin: bool,
}

impl ExperimentMetricRow {
    pub fn into_record(self) -> AppResult<ExperimentMetricRecord> {
        let kind = MetricKind::try_from(self.metric_kind.as_str()).map_err(AppError::validation)?;

        Ok(ExperimentMetricRecord {
            id: self.id,
            experiment_id: self.experiment_id,
            metric_name: self.metric_name,
            kind,
            data_source: self.data_source,
            baseline_days: self.baseline_days,
            expected_onset_days: self.expected_onset_days,
            success_criteria: self.success_criteria,
            minimum_effect: self.minimum_effect,
            scale_min: self.scale_min,
            scale_max: self.scale_max,
            requires_checkin: self.requires_checkin,
        })
    }
}

impl TryFrom<&Row<'_>> for ExperimentMetricRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            experiment_id: row.get("experiment_id")?,
            metric_name: row.get("metric_name")?,
            metric_kind: row.get("metric_kind")?,
            data_source: row.get("data_source")?,
            baseline_days: row.get("baseline_days")?,
            expected_onset_days: row.get("expected_onset_days")?,
            success_criteria: row.get("success_criteria")?,
            minimum_effect: row.get("minimum_effect")?,
            scale_min: row.get("scale_min")?,
            scale_max: row.get("scale_max")?,
            requires_checkin: row.get("requires_checkin")?,
        })
    }
}

impl TryFrom<&Row<'_>> for ExperimentRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            supplement_type: row.get("supplement_type")?,
            product_name: row.get("product_name")?,
            brand: row.get("brand")?,
            barcode: row.get("barcode")?,
            image_url: row.get("image_url")?,
            strength: row.get("strength")?,
            serving_size: row.get("serving_size")?,
            dsld_id: row.get("dsld_id")?,
            dose_amount: row.get("dose_amount")?,
            dose_unit: row.get("dose_unit")?,
            dose_frequency: row.get("dose_frequency")?,
            dose_timing: row.get("dose_timing")?,
            intent: row.get("intent")?,
            status: row.get("status")?,
            baseline_days: row.get("baseline_days")?,
            experiment_days: row.get("experiment_days")?,
            washout_days: row.get("washout_days")?,
            noise_filters: row.get("noise_filters")?,
            created_at: row.get("created_at")?,
            baseline_start_date: row.get("baseline_start_date")?,
            experiment_start_date: row.get("experiment_start_date")?,
            experiment_end_date: row.get("experiment_end_date")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

pub struct ExperimentRepository;

impl ExperimentRepository {
    pub fn insert(conn: &Connection, record: &ExperimentRecord) -> AppResult<()> {
        let noise_filters = serde_json::to_string(&record.noise_filters)?;

        conn.execute(
            r#"
                INSERT INTO experiments (
                    id, user_id, supplement_type, product_name, brand, barcode,
                    image_url, strength, serving_size, dsld_id,
                    dose_amount, dose_unit, dose_frequency, dose_timing,
                    intent, status, baseline_days, experiment_days, washout_days,
                    noise_filters, created_at
                ) VALUES (
                    :id, :user_id, :supplement_type, :product_name, :brand, :barcode,
                    :image_url, :strength, :serving_size, :dsld_id,
                    :dose_amount, :dose_unit, :dose_frequency, :dose_timing,
                    :intent, :status, :baseline_days, :experiment_days, :washout_days,
                    :noise_filters, :created_at
                )
            "#,
            named_params! {
                ":id": &record.id,
                ":user_id": &record.user_id,
                ":supplement_type": &record.supplement_type,
                ":product_name": &record.product_name,
                ":brand": &record.brand,
                ":barcode": &record.barcode,
                ":image_url": &record.image_url,
                ":strength": &record.strength,
                ":serving_size": &record.serving_size,
                ":dsld_id": &record.dsld_id,
                ":dose_amount": &record.dose_amount,
                ":dose_unit": &record.dose_unit,
                ":dose_frequency": &record.dose_frequency,
                ":dose_timing": &record.dose_timing,
                ":intent": &record.intent,
                ":status": record.status.as_str(),
                ":baseline_days": &record.baseline_days,
                ":experiment_days": &record.experiment_days,
                ":washout_days": &record.washout_days,
                ":noise_filters": &noise_filters,
                ":created_at": &record.created_at,
            },
        )?;

        Ok(())
    }

    pub fn insert_metric(conn: &Connection, metric: &ExperimentMetricRecord) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO experiment_metrics (
                    id, experiment_id, metric_name, metric_kind, data_source,
                    baseline_days, expected_onset_days, success_criteria,
                    minimum_effect, scale_min, scale_max, requires_checkin
                ) VALUES (
                    :id, :experiment_id, :metric_name, :metric_kind, :data_source,
                    :baseline_days, :expected_onset_days, :success_criteria,
                    :minimum_effect, :scale_min, :scale_max, :requires_checkin
                )
            "#,
            named_params! {
                ":id": &metric.id,
                ":experiment_id": &metric.experiment_id,
                ":metric_name": &metric.metric_name,
                ":metric_kind": metric.kind.as_str(),
                ":data_source": &metric.data_source,
                ":baseline_days": &metric.baseline_days,
                ":expected_onset_days": &metric.expected_onset_days,
                ":success_criteria": &metric.success_criteria,
                ":minimum_effect": &metric.minimum_effect,
                ":scale_min": &metric.scale_min,
                ":scale_max": &metric.scale_max,
                ":requires_checkin": &metric.requires_checkin,
            },
        )?;

        Ok(())
    }

    /// Ownership-scoped lookup: a wrong subject sees not-found, the same as
    /// a missing id.
    pub fn find_for_user(
        conn: &Connection,
        id: &str,
        user_id: &str,
    ) -> AppResult<Option<ExperimentRecord>> {
        let sql = format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = :id AND user_id = :user_id"
        );
        let mut stmt = conn.prepare(&sql)?;

        let row = stmt
            .query_row(
                named_params! {":id": id, ":user_id": user_id},
                |row| ExperimentRow::try_from(row),
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(row.into_record()?)),
            None => Ok(None),
        }
    }

    pub fn list_for_user(conn: &Connection, user_id: &str) -> AppResult<Vec<ExperimentRecord>> {
        let sql = format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments
             WHERE user_id = :user_id
             ORDER BY created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(named_params! {":user_id": user_id}, |row| {
                ExperimentRow::try_from(row)
            })?
            .map(|row| row.map_err(AppError::from).and_then(|row| row.into_record()))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(records)
    }

    /// Experiments that count as "running" for compatibility purposes.
    pub fn list_active_for_user(
        conn: &Connection,
        user_id: &str,
    ) -> AppResult<Vec<ExperimentRecord>> {
        let sql = format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments
             WHERE user_id = :user_id AND status IN ('pending', 'baseline', 'active')
             ORDER BY created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(named_params! {":user_id": user_id}, |row| {
                ExperimentRow::try_from(row)
            })?
            .map(|row| row.map_err(AppError::from).and_then(|row| row.into_record()))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(records)
    }

    pub fn list_metrics(
        conn: &Connection,
        experiment_id: &str,
    ) -> AppResult<Vec<ExperimentMetricRecord>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT
                    id,
                    experiment_id,
                    metric_name,
                    metric_kind,
                    data_source,
                    baseline_days,
                    expected_onset_days,
                    success_criteria,
                    minimum_effect,
                    scale_min,
                    scale_max,
                    requires_checkin
                FROM experiment_metrics
                WHERE experiment_id = :experiment_id
                ORDER BY metric_kind, metric_name
            "#,
        )?;

        let metrics = stmt
            .query_map(named_params! {":experiment_id": experiment_id}, |row| {
                ExperimentMetricRow::try_from(row)
            })?
            .map(|row| row.map_err(AppError::from).and_then(|row| row.into_record()))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(metrics)
    }

    pub fn update_start(
        conn: &Connection,
        id: &str,
        status: ExperimentStatus,
        baseline_start_date: &str,
        experiment_start_date: Option<&str>,
        experiment_end_date: &str,
    ) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE experiments SET
                    status = :status,
                    baseline_start_date = :baseline_start_date,
                    experiment_start_date = :experiment_start_date,
                    experiment_end_date = :experiment_end_date
                WHERE id = :id
            "#,
            named_params! {
                ":id": id,
                ":status": status.as_str(),
                ":baseline_start_date": baseline_start_date,
                ":experiment_start_date": experiment_start_date,
                ":experiment_end_date": experiment_end_date,
            },
        )?;

        if affected == 0 {
            return Err(AppError::not_found());
        }

        Ok(())
    }

    pub fn update_status(conn: &Connection, id: &str, status: ExperimentStatus) -> AppResult<()> {
        let affected = conn.execute(
            "UPDATE experiments SET status = :status WHERE id = :id",
            named_params! {":id": id, ":status": status.as_str()},
        )?;

        if affected == 0 {
            return Err(AppError::not_found());
        }

        Ok(())
    }

    /// First entry into `active` via a status update stamps the timeline.
    pub fn update_status_with_dates(
        conn: &Connection,
        id: &str,
        status: ExperimentStatus,
        experiment_start_date: &str,
        experiment_end_date: &str,
    ) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE experiments SET
                    status = :status,
                    experiment_start_date = :experiment_start_date,
                    experiment_end_date = :experiment_end_date
                WHERE id = :id
            "#,
            named_params! {
                ":id": id,
                ":status": status.as_str(),
                ":experiment_start_date": experiment_start_date,
                ":experiment_end_date": experiment_end_date,
            },
        )?;

        if affected == 0 {
            return Err(AppError::not_found());
        }

        Ok(())
    }

    pub fn mark_completed(conn: &Connection, id: &str, completed_at: &str) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE experiments SET
                    status = 'completed',
                    completed_at = :completed_at
                WHERE id = :id
            "#,
            named_params! {":id": id, ":completed_at": completed_at},
        )?;

        if affected == 0 {
            return Err(AppError::not_found());
        }

        Ok(())
    }
}

impl From<&ExperimentRecord> for ActiveExperimentSummary {
    fn from(record: &ExperimentRecord) -> Self {
        Self {
            intent: record.intent.clone(),
            product_name: record.product_name.clone(),
            supplement_type: record.supplement_type.clone(),
        }
    }
}
