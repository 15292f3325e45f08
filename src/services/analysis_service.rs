use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::repositories::checkin_repository::CheckinRepository;
use crate::db::repositories::experiment_repository::ExperimentRepository;
use crate::db::repositories::result_repository::ResultRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::analysis::{ExperimentResultRecord, MetricResult, Verdict};
use crate::models::checkin::CheckinPhase;
use crate::models::experiment::{
    ExperimentMetricRecord, ExperimentRecord, ExperimentStatus, MetricKind,
};
use crate::providers::{BaselineStatsProvider, MetricBaseline};

/// Global verdict breakpoints on |Cohen's d|. The catalog's per-metric
/// `minimum_effect` is loaded but not consulted here.
pub const EFFECT_STRONG_THRESHOLD: f64 = 0.8;
pub const EFFECT_MODERATE_THRESHOLD: f64 = 0.2;

const OBJECTIVE_HIGH_CONFIDENCE_SAMPLES: i64 = 14;
const OBJECTIVE_CONFIDENCE_HIGH: f64 = 0.9;
const OBJECTIVE_CONFIDENCE_LOW: f64 = 0.7;

const SUBJECTIVE_MIN_POINTS: usize = 3;
const SUBJECTIVE_HIGH_CONFIDENCE_POINTS: usize = 7;
const SUBJECTIVE_CONFIDENCE_HIGH: f64 = 0.85;
const SUBJECTIVE_CONFIDENCE_LOW: f64 = 0.6;

/// Fewer than this many valid metrics forces `insufficient_data`, so a
/// single noisy metric cannot carry a conclusion.
const MIN_VALID_METRICS: usize = 2;
const OVERALL_HIGH_CONFIDENCE_METRICS: usize = 3;
const OVERALL_CONFIDENCE_HIGH: f64 = 0.85;
const OVERALL_CONFIDENCE_LOW: f64 = 0.7;

/// Classify a standardized effect size into a verdict.
pub fn classify_effect_size(effect_size: f64) -> Verdict {
    if effect_size >= EFFECT_STRONG_THRESHOLD {
        Verdict::StrongSuccess
    } else if effect_size >= EFFECT_MODERATE_THRESHOLD {
        Verdict::ModerateBenefit
    } else if effect_size.abs() < EFFECT_MODERATE_THRESHOLD {
        Verdict::NoEffect
    } else if effect_size <= -EFFECT_STRONG_THRESHOLD {
        Verdict::NegativeEffect
    } else {
        Verdict::MildNegative
    }
}

/// Compares baseline-period statistics against experiment-period statistics
/// per metric (Cohen's d) and rolls the valid metrics up into one verdict.
///
/// Objective metrics are approximated with two trailing windows from "now"
/// (baseline_days and experiment_days) because the provider contract has no
/// explicit date ranges; see the provider docs for the precision caveat.
pub struct AnalysisService {
    db: DbPool,
    baselines: Arc<dyn BaselineStatsProvider>,
}

impl AnalysisService {
    pub fn new(db: DbPool, baselines: Arc<dyn BaselineStatsProvider>) -> Self {
        Self { db, baselines }
    }

    /// All-or-nothing: any provider or store failure propagates before the
    /// result row is written and the status is left untouched. On success
    /// one immutable result row is appended and the experiment is marked
    /// completed.
    pub async fn calculate_results(
        &self,
        id: &str,
        user_id: &str,
    ) -> AppResult<ExperimentResultRecord> {
        let conn = self.db.get_connection()?;
        let experiment = ExperimentRepository::find_for_user(&conn, id, user_id)?
            .ok_or_else(AppError::not_found)?;
        let metrics = ExperimentRepository::list_metrics(&conn, id)?;

        if metrics.is_empty() {
            return Err(AppError::validation("实验没有任何指标，无法计算结果"));
        }

        let checkins = CheckinRepository::list_for_experiment(&conn, id)?;

        let objective_metrics: Vec<&ExperimentMetricRecord> = metrics
            .iter()
            .filter(|metric| metric.kind == MetricKind::Objective)
            .collect();

        let mut metric_results: Vec<MetricResult> = Vec::new();

        if !objective_metrics.is_empty() {
            let baseline_stats = self
                .baselines
                .calculate_baselines(user_id, experiment.baseline_days)
                .await?;
            let experiment_stats = self
                .baselines
                .calculate_baselines(user_id, experiment.experiment_days)
                .await?;

            let baseline_by_source = index_by_source(&baseline_stats);
            let experiment_by_source = index_by_source(&experiment_stats);

            for metric in &objective_metrics {
                match objective_metric_result(metric, &baseline_by_source, &experiment_by_source) {
                    Some(result) => metric_results.push(result),
                    None => debug!(
                        target: "app::analysis",
                        experiment_id = %id,
                        metric = %metric.metric_name,
                        "skipping objective metric (zero-variance baseline or missing samples)"
                    ),
                }
            }
        }

        for metric in metrics.iter().filter(|m| m.kind == MetricKind::Subjective) {
            match subjective_metric_result(metric, &checkins) {
                Some(result) => metric_results.push(result),
                None => debug!(
                    target: "app::analysis",
                    experiment_id = %id,
                    metric = %metric.metric_name,
                    "skipping subjective metric (insufficient check-in data)"
                ),
            }
        }

        let overall_effect_size = if metric_results.is_empty() {
            None
        } else {
            let sum: f64 = metric_results.iter().map(|m| m.effect_size).sum();
            Some(sum / metric_results.len() as f64)
        };

        let overall_verdict = if metric_results.len() < MIN_VALID_METRICS {
            warn!(
                target: "app::analysis",
                experiment_id = %id,
                valid_metrics = metric_results.len(),
                "fewer than {MIN_VALID_METRICS} valid metrics, forcing insufficient_data"
            );
            Verdict::InsufficientData
        } else {
            classify_effect_size(overall_effect_size.unwrap_or(0.0))
        };

        let confidence = if metric_results.len() >= OVERALL_HIGH_CONFIDENCE_METRICS {
            OVERALL_CONFIDENCE_HIGH
        } else {
            OVERALL_CONFIDENCE_LOW
        };

        let summary = generate_summary(&experiment, overall_verdict, &metric_results);
        let recommendations = generate_recommendations(&experiment, overall_verdict, &metric_results);

        let result = ExperimentResultRecord {
            id: Uuid::new_v4().to_string(),
            experiment_id: id.to_string(),
            computed_at: Utc::now().to_rfc3339(),
            baseline_days_used: experiment.baseline_days,
            experiment_days_used: experiment.experiment_days,
            noisy_days_excluded: 0,
            metric_results,
            overall_verdict,
            overall_effect_size,
            summary: Some(summary),
            recommendations,
            confidence,
        };

        ResultRepository::insert(&conn, &result)?;

        if experiment.status != ExperimentStatus::Completed {
            ExperimentRepository::mark_completed(&conn, id, &Utc::now().to_rfc3339())?;
        }

        info!(
            target: "app::analysis",
            experiment_id = %id,
            verdict = %result.overall_verdict,
            effect_size = ?result.overall_effect_size,
            valid_metrics = result.metric_results.len(),
            "calculated experiment results"
        );

        Ok(result)
    }

    /// Most recent result row, or None if never calculated.
    pub async fn get_experiment_results(
        &self,
        id: &str,
        user_id: &str,
    ) -> AppResult<Option<ExperimentResultRecord>> {
        let conn = self.db.get_connection()?;
        ExperimentRepository::find_for_user(&conn, id, user_id)?.ok_or_else(AppError::not_found)?;
        ResultRepository::find_latest(&conn, id)
    }
}

fn index_by_source(stats: &[MetricBaseline]) -> HashMap<&str, &MetricBaseline> {
    stats
        .iter()
        .map(|entry| (entry.metric_type.as_str(), entry))
        .collect()
}

fn objective_metric_result(
    metric: &ExperimentMetricRecord,
    baseline_by_source: &HashMap<&str, &MetricBaseline>,
    experiment_by_source: &HashMap<&str, &MetricBaseline>,
) -> Option<MetricResult> {
    let baseline = baseline_by_source.get(metric.data_source.as_str())?;
    let experiment = experiment_by_source.get(metric.data_source.as_str())?;

    if baseline.sample_count == 0 || experiment.sample_count == 0 {
        return None;
    }

    let baseline_mean = baseline.mean_value?;
    let experiment_mean = experiment.mean_value?;
    let baseline_std_dev = baseline.std_dev?;

    // A zero-variance baseline makes the standardized comparison undefined.
    if baseline_std_dev == 0.0 {
        return None;
    }

    let effect_size = (experiment_mean - baseline_mean) / baseline_std_dev;
    let confidence = if baseline.sample_count >= OBJECTIVE_HIGH_CONFIDENCE_SAMPLES
        && experiment.sample_count >= OBJECTIVE_HIGH_CONFIDENCE_SAMPLES
    {
        OBJECTIVE_CONFIDENCE_HIGH
    } else {
        OBJECTIVE_CONFIDENCE_LOW
    };

    Some(MetricResult {
        metric_name: metric.metric_name.clone(),
        kind: MetricKind::Objective,
        effect_size,
        baseline_mean,
        baseline_std_dev,
        experiment_mean,
        verdict: classify_effect_size(effect_size),
        confidence,
        baseline_samples: baseline.sample_count,
        experiment_samples: experiment.sample_count,
    })
}

fn subjective_metric_result(
    metric: &ExperimentMetricRecord,
    checkins: &[crate::models::checkin::DailyCheckinRecord],
) -> Option<MetricResult> {
    let mut baseline_values: Vec<f64> = Vec::new();
    let mut active_values: Vec<f64> = Vec::new();

    for checkin in checkins {
        if let Some(rating) = checkin.ratings.get(&metric.metric_name) {
            match checkin.phase {
                CheckinPhase::Baseline => baseline_values.push(*rating),
                CheckinPhase::Active => active_values.push(*rating),
                CheckinPhase::Washout => {}
            }
        }
    }

    if baseline_values.len() < SUBJECTIVE_MIN_POINTS || active_values.len() < SUBJECTIVE_MIN_POINTS
    {
        return None;
    }

    let baseline_mean = mean(&baseline_values);
    let baseline_std_dev = population_std_dev(&baseline_values, baseline_mean);
    let experiment_mean = mean(&active_values);

    if baseline_std_dev == 0.0 {
        return None;
    }

    let effect_size = (experiment_mean - baseline_mean) / baseline_std_dev;
    let confidence = if baseline_values.len() >= SUBJECTIVE_HIGH_CONFIDENCE_POINTS
        && active_values.len() >= SUBJECTIVE_HIGH_CONFIDENCE_POINTS
    {
        SUBJECTIVE_CONFIDENCE_HIGH
    } else {
        SUBJECTIVE_CONFIDENCE_LOW
    };

    Some(MetricResult {
        metric_name: metric.metric_name.clone(),
        kind: MetricKind::Subjective,
        effect_size,
        baseline_mean,
        baseline_std_dev,
        experiment_mean,
        verdict: classify_effect_size(effect_size),
        confidence,
        baseline_samples: baseline_values.len() as i64,
        experiment_samples: active_values.len() as i64,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divide by n, not n−1).
fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

fn generate_summary(
    experiment: &ExperimentRecord,
    verdict: Verdict,
    metric_results: &[MetricResult],
) -> String {
    match verdict {
        Verdict::StrongSuccess => format!(
            "{} 实验观察到显著改善，{} 个指标中有 {} 个呈正向变化",
            experiment.product_name,
            metric_results.len(),
            positive_count(metric_results)
        ),
        Verdict::ModerateBenefit => format!(
            "{} 实验观察到中等程度的改善（{} 个有效指标）",
            experiment.product_name,
            metric_results.len()
        ),
        Verdict::NoEffect => format!(
            "{} 实验期间各指标与基线相比没有可辨别的变化",
            experiment.product_name
        ),
        Verdict::MildNegative | Verdict::NegativeEffect => format!(
            "{} 实验期间部分指标相对基线出现了负向变化",
            experiment.product_name
        ),
        Verdict::InsufficientData => format!(
            "{} 实验的有效指标不足，无法得出结论",
            experiment.product_name
        ),
    }
}

fn generate_recommendations(
    experiment: &ExperimentRecord,
    verdict: Verdict,
    metric_results: &[MetricResult],
) -> Vec<String> {
    let mut recommendations = Vec::new();

    match verdict {
        Verdict::StrongSuccess | Verdict::ModerateBenefit => {
            recommendations.push("效果为正向，可以考虑继续当前剂量".to_string());
        }
        Verdict::NoEffect => {
            recommendations.push("未观察到效果，可考虑调整剂量或停止补充".to_string());
        }
        Verdict::MildNegative | Verdict::NegativeEffect => {
            recommendations.push("观察到负向变化，建议停止补充并观察恢复情况".to_string());
        }
        Verdict::InsufficientData => {
            recommendations.push("继续每日打卡并保持可穿戴设备数据同步，以积累足够样本".to_string());
        }
    }

    if experiment.washout_days > 0 && verdict != Verdict::InsufficientData {
        recommendations.push(format!(
            "如需复验，建议先经过 {} 天的洗脱期",
            experiment.washout_days
        ));
    }

    let low_confidence = metric_results
        .iter()
        .filter(|metric| metric.confidence < 0.8)
        .count();
    if low_confidence > 0 {
        recommendations.push(format!(
            "{low_confidence} 个指标的样本量偏低，结论置信度有限"
        ));
    }

    recommendations
}

fn positive_count(metric_results: &[MetricResult]) -> usize {
    metric_results
        .iter()
        .filter(|metric| metric.effect_size >= EFFECT_MODERATE_THRESHOLD)
        .count()
}
