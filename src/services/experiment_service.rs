use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{MetricConfig, SupplementCatalog};
use crate::db::repositories::checkin_repository::CheckinRepository;
use crate::db::repositories::experiment_repository::ExperimentRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::checkin::{CheckinPhase, DailyCheckinInput, DailyCheckinRecord};
use crate::models::experiment::{
    ActiveExperimentSummary, ExperimentCreateInput, ExperimentMetricRecord, ExperimentRecord,
    ExperimentStatus,
};

const DEFAULT_CHECKIN_SOURCE: &str = "manual";

/// Owns the experiment lifecycle: creation, start, status transitions and
/// the daily check-in ledger. Completion is not reachable from here; it is
/// a side effect of result calculation in the analysis service.
pub struct ExperimentService {
    db: DbPool,
    catalog: Arc<SupplementCatalog>,
}

impl ExperimentService {
    pub fn new(db: DbPool, catalog: Arc<SupplementCatalog>) -> Self {
        Self { db, catalog }
    }

    /// Creates the experiment in `pending` together with its metric
    /// snapshot. Both inserts run in one transaction so a metric failure
    /// cannot leave a metric-less experiment behind.
    pub async fn create_experiment(
        &self,
        input: ExperimentCreateInput,
    ) -> AppResult<ExperimentRecord> {
        let config = self
            .catalog
            .get_config(&input.supplement_type)
            .ok_or_else(|| {
                AppError::configuration(format!("未知的补充剂类型: {}", input.supplement_type))
            })?;

        let selected: Vec<&MetricConfig> = match &input.metric_selection {
            Some(names) => {
                let selected: Vec<&MetricConfig> = config
                    .all_metrics()
                    .filter(|metric| names.contains(&metric.name))
                    .collect();
                if selected.len() != names.len() {
                    return Err(AppError::validation(format!(
                        "所选指标中包含 {} 不支持的条目",
                        config.display_name
                    )));
                }
                selected
            }
            None => config.all_metrics().collect(),
        };

        if selected.is_empty() {
            return Err(AppError::validation("实验必须至少跟踪一个指标"));
        }

        let baseline_days = selected
            .iter()
            .map(|metric| metric.baseline_days)
            .max()
            .unwrap_or(0);
        let experiment_days = input
            .duration_override_days
            .unwrap_or(config.recommended_duration_days);
        let intent = input
            .intent
            .clone()
            .unwrap_or_else(|| config.primary_intent.clone());

        let experiment_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let record = ExperimentRecord {
            id: experiment_id.clone(),
            user_id: input.user_id,
            supplement_type: input.supplement_type,
            product_name: input.product_name,
            brand: input.brand,
            barcode: input.barcode,
            image_url: input.image_url,
            strength: input.strength,
            serving_size: input.serving_size,
            dsld_id: input.dsld_id,
            dose_amount: input.dose_amount,
            dose_unit: input.dose_unit,
            dose_frequency: input.dose_frequency,
            dose_timing: input.dose_timing,
            intent,
            status: ExperimentStatus::Pending,
            baseline_days,
            experiment_days,
            washout_days: config.washout_days,
            noise_filters: config.noise_filters.clone(),
            created_at: now,
            baseline_start_date: None,
            experiment_start_date: None,
            experiment_end_date: None,
            completed_at: None,
        };

        let metrics: Vec<ExperimentMetricRecord> = selected
            .iter()
            .map(|metric| ExperimentMetricRecord {
                id: Uuid::new_v4().to_string(),
                experiment_id: experiment_id.clone(),
                metric_name: metric.name.clone(),
                kind: metric.kind,
                data_source: metric.data_source.clone(),
                baseline_days: metric.baseline_days,
                expected_onset_days: metric.expected_onset_days,
                success_criteria: metric.success_criteria.clone(),
                minimum_effect: metric.minimum_effect,
                scale_min: metric.scale_min,
                scale_max: metric.scale_max,
                requires_checkin: metric.requires_checkin,
            })
            .collect();

        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;
        ExperimentRepository::insert(&tx, &record)?;
        for metric in &metrics {
            ExperimentRepository::insert_metric(&tx, metric)?;
        }
        tx.commit()?;

        info!(
            target: "app::experiment",
            experiment_id = %record.id,
            supplement_type = %record.supplement_type,
            metric_count = metrics.len(),
            "created experiment"
        );

        Ok(record)
    }

    /// Newest first.
    pub async fn get_user_experiments(&self, user_id: &str) -> AppResult<Vec<ExperimentRecord>> {
        let conn = self.db.get_connection()?;
        ExperimentRepository::list_for_user(&conn, user_id)
    }

    pub async fn get_experiment(
        &self,
        id: &str,
        user_id: &str,
    ) -> AppResult<(ExperimentRecord, Vec<ExperimentMetricRecord>)> {
        let conn = self.db.get_connection()?;
        let record = Self::require_experiment(&conn, id, user_id)?;
        let metrics = ExperimentRepository::list_metrics(&conn, id)?;
        Ok((record, metrics))
    }

    /// Starts a `pending` experiment. The retroactive choice is made exactly
    /// once, here, and is irreversible: a retroactive baseline reuses
    /// historical data and goes straight to `active`, otherwise the
    /// experiment collects fresh baseline data first.
    pub async fn start_experiment(
        &self,
        id: &str,
        user_id: &str,
        use_retroactive_baseline: bool,
    ) -> AppResult<ExperimentRecord> {
        let conn = self.db.get_connection()?;
        let record = Self::require_experiment(&conn, id, user_id)?;

        if record.status != ExperimentStatus::Pending {
            return Err(AppError::invalid_state(format!(
                "只能启动待开始的实验（当前状态: {}）",
                record.status
            )));
        }

        let now = Utc::now();
        let experiment_end = (now + Duration::days(record.experiment_days)).to_rfc3339();

        if use_retroactive_baseline {
            let baseline_start = (now - Duration::days(record.baseline_days)).to_rfc3339();
            let experiment_start = now.to_rfc3339();
            ExperimentRepository::update_start(
                &conn,
                id,
                ExperimentStatus::Active,
                &baseline_start,
                Some(&experiment_start),
                &experiment_end,
            )?;
        } else {
            let baseline_start = now.to_rfc3339();
            ExperimentRepository::update_start(
                &conn,
                id,
                ExperimentStatus::Baseline,
                &baseline_start,
                None,
                &experiment_end,
            )?;
        }

        info!(
            target: "app::experiment",
            experiment_id = %id,
            retroactive = use_retroactive_baseline,
            "started experiment"
        );

        Self::require_experiment(&conn, id, user_id)
    }

    /// Subject-facing status updates: pause, resume, cancel. `completed` is
    /// only reachable through result calculation.
    pub async fn update_experiment_status(
        &self,
        id: &str,
        user_id: &str,
        target: ExperimentStatus,
    ) -> AppResult<ExperimentRecord> {
        let conn = self.db.get_connection()?;
        let record = Self::require_experiment(&conn, id, user_id)?;

        if record.status.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "实验已结束（{}），不能再变更状态",
                record.status
            )));
        }

        match target {
            ExperimentStatus::Active => {
                if !matches!(
                    record.status,
                    ExperimentStatus::Baseline | ExperimentStatus::Paused
                ) {
                    return Err(AppError::invalid_state(format!(
                        "不能从 {} 切换到 active",
                        record.status
                    )));
                }

                if record.experiment_start_date.is_none() {
                    let now = Utc::now();
                    let experiment_start = now.to_rfc3339();
                    let experiment_end =
                        (now + Duration::days(record.experiment_days)).to_rfc3339();
                    ExperimentRepository::update_status_with_dates(
                        &conn,
                        id,
                        ExperimentStatus::Active,
                        &experiment_start,
                        &experiment_end,
                    )?;
                } else {
                    ExperimentRepository::update_status(&conn, id, ExperimentStatus::Active)?;
                }
            }
            ExperimentStatus::Paused => {
                if !matches!(
                    record.status,
                    ExperimentStatus::Active | ExperimentStatus::Baseline
                ) {
                    return Err(AppError::invalid_state(format!(
                        "不能从 {} 切换到 paused",
                        record.status
                    )));
                }
                ExperimentRepository::update_status(&conn, id, ExperimentStatus::Paused)?;
            }
            ExperimentStatus::Cancelled => {
                ExperimentRepository::update_status(&conn, id, ExperimentStatus::Cancelled)?;
            }
            other => {
                return Err(AppError::invalid_state(format!(
                    "不支持通过状态更新切换到 {other}"
                )));
            }
        }

        info!(
            target: "app::experiment",
            experiment_id = %id,
            from = %record.status,
            to = %target,
            "updated experiment status"
        );

        Self::require_experiment(&conn, id, user_id)
    }

    /// Records today's check-in. Keyed on (experiment, calendar date):
    /// re-submitting the same day overwrites the earlier ratings.
    pub async fn record_daily_checkin(
        &self,
        id: &str,
        user_id: &str,
        input: DailyCheckinInput,
    ) -> AppResult<DailyCheckinRecord> {
        let conn = self.db.get_connection()?;
        let record = Self::require_experiment(&conn, id, user_id)?;

        let metrics = ExperimentRepository::list_metrics(&conn, id)?;
        for name in input.ratings.keys() {
            if !metrics.iter().any(|metric| metric.metric_name == *name) {
                // Accepted and stored as submitted; rejecting would change
                // externally observable behavior.
                debug!(
                    target: "app::experiment",
                    experiment_id = %id,
                    metric = %name,
                    "check-in rating for undeclared metric"
                );
            }
        }

        let now = Utc::now();
        let today = now.date_naive();

        let phase = match record.status {
            ExperimentStatus::Baseline => CheckinPhase::Baseline,
            ExperimentStatus::Washout => CheckinPhase::Washout,
            _ => CheckinPhase::Active,
        };

        let day_number = record
            .experiment_start_date
            .as_deref()
            .and_then(|start| DateTime::parse_from_rfc3339(start).ok())
            .map(|start| (today - start.date_naive()).num_days() + 1)
            .unwrap_or(1)
            .max(1);

        let checkin = DailyCheckinRecord {
            id: Uuid::new_v4().to_string(),
            experiment_id: id.to_string(),
            user_id: user_id.to_string(),
            checkin_date: today.format("%Y-%m-%d").to_string(),
            submitted_at: now.to_rfc3339(),
            phase,
            day_number,
            ratings: input.ratings,
            notes: input.notes,
            noise_flags: input.noise_flags,
            source: input
                .source
                .unwrap_or_else(|| DEFAULT_CHECKIN_SOURCE.to_string()),
        };

        CheckinRepository::upsert(&conn, &checkin)?;

        info!(
            target: "app::experiment",
            experiment_id = %id,
            date = %checkin.checkin_date,
            phase = %checkin.phase,
            day_number = checkin.day_number,
            "recorded daily check-in"
        );

        // The stored row keeps its original id when the upsert hit an
        // existing (experiment, date) pair.
        CheckinRepository::find_by_date(&conn, id, &checkin.checkin_date)?
            .ok_or_else(AppError::not_found)
    }

    /// Chronological.
    pub async fn get_experiment_checkins(
        &self,
        id: &str,
        user_id: &str,
    ) -> AppResult<Vec<DailyCheckinRecord>> {
        let conn = self.db.get_connection()?;
        Self::require_experiment(&conn, id, user_id)?;
        CheckinRepository::list_for_experiment(&conn, id)
    }

    /// Experiments in pending/baseline/active with their intent and product
    /// name. Store errors propagate; the compatibility resolver and
    /// notification-eligibility checks both rely on this never failing open.
    pub async fn get_active_experiments_with_products(
        &self,
        user_id: &str,
    ) -> AppResult<Vec<ActiveExperimentSummary>> {
        let conn = self.db.get_connection()?;
        let records = ExperimentRepository::list_active_for_user(&conn, user_id)?;
        Ok(records.iter().map(ActiveExperimentSummary::from).collect())
    }

    fn require_experiment(
        conn: &rusqlite::Connection,
        id: &str,
        user_id: &str,
    ) -> AppResult<ExperimentRecord> {
        ExperimentRepository::find_for_user(conn, id, user_id)?.ok_or_else(AppError::not_found)
    }
}
