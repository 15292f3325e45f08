use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::{tempdir, TempDir};

use selftrial::catalog::{IntentCompatibility, MetricConfig, SupplementCatalog};
use selftrial::db::repositories::checkin_repository::CheckinRepository;
use selftrial::db::repositories::result_repository::ResultRepository;
use selftrial::db::DbPool;
use selftrial::error::{AppError, AppResult};
use selftrial::models::analysis::Verdict;
use selftrial::models::checkin::{CheckinPhase, DailyCheckinRecord};
use selftrial::models::experiment::{ExperimentCreateInput, ExperimentStatus, MetricKind};
use selftrial::providers::{BaselineStatsProvider, MetricBaseline};
use selftrial::services::analysis_service::AnalysisService;
use selftrial::services::experiment_service::ExperimentService;

const BASELINE_WINDOW: i64 = 14;
const EXPERIMENT_WINDOW: i64 = 28;

/// Serves canned per-window statistics. The analysis service queries one
/// trailing window per phase, so keying on the window length lets a test
/// give the baseline and experiment phases different numbers.
struct FakeBaselineProvider {
    windows: HashMap<i64, Vec<MetricBaseline>>,
    fail: bool,
}

impl FakeBaselineProvider {
    fn new(windows: HashMap<i64, Vec<MetricBaseline>>) -> Self {
        Self {
            windows,
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            windows: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl BaselineStatsProvider for FakeBaselineProvider {
    async fn calculate_baselines(
        &self,
        _user_id: &str,
        window_days: i64,
    ) -> AppResult<Vec<MetricBaseline>> {
        if self.fail {
            return Err(AppError::provider("health data provider offline"));
        }
        Ok(self.windows.get(&window_days).cloned().unwrap_or_default())
    }
}

fn stat(metric_type: &str, mean: f64, std_dev: f64, samples: i64) -> MetricBaseline {
    MetricBaseline {
        metric_type: metric_type.to_string(),
        mean_value: Some(mean),
        std_dev: Some(std_dev),
        sample_count: samples,
    }
}

fn objective_metric(name: &str, data_source: &str) -> MetricConfig {
    MetricConfig {
        name: name.to_string(),
        kind: MetricKind::Objective,
        data_source: data_source.to_string(),
        baseline_days: BASELINE_WINDOW,
        expected_onset_days: 7,
        success_criteria: None,
        minimum_effect: 0.2,
        scale_min: None,
        scale_max: None,
        requires_checkin: false,
    }
}

fn subjective_metric(name: &str) -> MetricConfig {
    MetricConfig {
        name: name.to_string(),
        kind: MetricKind::Subjective,
        data_source: "daily_checkin".to_string(),
        baseline_days: 7,
        expected_onset_days: 5,
        success_criteria: None,
        minimum_effect: 0.3,
        scale_min: Some(1.0),
        scale_max: Some(10.0),
        requires_checkin: true,
    }
}

fn test_catalog() -> SupplementCatalog {
    SupplementCatalog::new(
        vec![
            selftrial::catalog::SupplementConfig {
                id: "sensor_blend".to_string(),
                display_name: "传感器测试配方".to_string(),
                primary_intent: "tuning".to_string(),
                objective_metrics: vec![
                    objective_metric("metric_a", "src_a"),
                    objective_metric("metric_b", "src_b"),
                ],
                subjective_metrics: vec![],
                recommended_duration_days: EXPERIMENT_WINDOW,
                washout_days: 14,
                noise_filters: vec!["illness".to_string()],
            },
            selftrial::catalog::SupplementConfig {
                id: "journal_blend".to_string(),
                display_name: "日记测试配方".to_string(),
                primary_intent: "tuning".to_string(),
                objective_metrics: vec![],
                subjective_metrics: vec![
                    subjective_metric("focus_quality"),
                    subjective_metric("calm_alertness"),
                ],
                recommended_duration_days: EXPERIMENT_WINDOW,
                washout_days: 7,
                noise_filters: vec![],
            },
        ],
        vec![IntentCompatibility {
            intent: "tuning".to_string(),
            label: "状态调优".to_string(),
            cannot_add_intents: vec![],
            conflict_reason: String::new(),
        }],
    )
}

fn setup(
    provider: FakeBaselineProvider,
) -> (TempDir, DbPool, ExperimentService, AnalysisService) {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("test.sqlite")).expect("db pool");
    let catalog = Arc::new(test_catalog());
    let experiments = ExperimentService::new(pool.clone(), catalog);
    let analysis = AnalysisService::new(pool.clone(), Arc::new(provider));
    (dir, pool, experiments, analysis)
}

fn create_input(supplement_type: &str) -> ExperimentCreateInput {
    ExperimentCreateInput {
        user_id: "user1".to_string(),
        supplement_type: supplement_type.to_string(),
        product_name: "测试产品".to_string(),
        brand: None,
        barcode: None,
        image_url: None,
        strength: None,
        serving_size: None,
        dsld_id: None,
        dose_amount: None,
        dose_unit: None,
        dose_frequency: None,
        dose_timing: None,
        intent: None,
        duration_override_days: None,
        metric_selection: None,
    }
}

async fn started_sensor_experiment(experiments: &ExperimentService) -> String {
    let created = experiments
        .create_experiment(create_input("sensor_blend"))
        .await
        .expect("create experiment");
    experiments
        .start_experiment(&created.id, "user1", true)
        .await
        .expect("start experiment");
    created.id
}

fn two_metric_windows(
    base_a: (f64, f64, i64),
    exp_a: (f64, f64, i64),
    base_b: (f64, f64, i64),
    exp_b: (f64, f64, i64),
) -> HashMap<i64, Vec<MetricBaseline>> {
    HashMap::from([
        (
            BASELINE_WINDOW,
            vec![
                stat("src_a", base_a.0, base_a.1, base_a.2),
                stat("src_b", base_b.0, base_b.1, base_b.2),
            ],
        ),
        (
            EXPERIMENT_WINDOW,
            vec![
                stat("src_a", exp_a.0, exp_a.1, exp_a.2),
                stat("src_b", exp_b.0, exp_b.1, exp_b.2),
            ],
        ),
    ])
}

#[tokio::test]
async fn one_sd_improvement_is_a_strong_success() {
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
    ));
    let (_dir, _pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    let result = analysis
        .calculate_results(&id, "user1")
        .await
        .expect("calculate results");

    assert_eq!(result.overall_verdict, Verdict::StrongSuccess);
    assert_eq!(result.metric_results.len(), 2);
    for metric in &result.metric_results {
        assert!((metric.effect_size - 1.0).abs() < 1e-12);
        assert_eq!(metric.verdict, Verdict::StrongSuccess);
        // 20 samples on both sides clears the objective threshold of 14.
        assert!((metric.confidence - 0.9).abs() < f64::EPSILON);
    }
    assert!((result.overall_effect_size.unwrap() - 1.0).abs() < 1e-12);
    assert_eq!(result.baseline_days_used, BASELINE_WINDOW);
    assert_eq!(result.experiment_days_used, EXPERIMENT_WINDOW);
    // Two valid metrics is below the three needed for high overall confidence.
    assert!((result.confidence - 0.7).abs() < f64::EPSILON);
}

#[tokio::test]
async fn effect_of_exactly_point_two_counts_as_moderate() {
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 10.0, 20),
        (52.0, 10.0, 20),
        (50.0, 10.0, 20),
        (52.0, 10.0, 20),
    ));
    let (_dir, _pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    let result = analysis.calculate_results(&id, "user1").await.unwrap();

    assert_eq!(result.overall_verdict, Verdict::ModerateBenefit);
    for metric in &result.metric_results {
        assert!((metric.effect_size - 0.2).abs() < 1e-12);
        assert_eq!(metric.verdict, Verdict::ModerateBenefit);
    }
}

#[tokio::test]
async fn small_decline_is_a_mild_negative() {
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 10.0, 20),
        (48.0, 10.0, 20),
        (50.0, 10.0, 20),
        (48.0, 10.0, 20),
    ));
    let (_dir, _pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    let result = analysis.calculate_results(&id, "user1").await.unwrap();

    assert_eq!(result.overall_verdict, Verdict::MildNegative);
    for metric in &result.metric_results {
        assert!((metric.effect_size + 0.2).abs() < 1e-12);
    }
}

#[tokio::test]
async fn zero_variance_baseline_metric_is_skipped() {
    // metric_a has a flat baseline; only metric_b survives, and one valid
    // metric is below the floor for a conclusion.
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 0.0, 20),
        (60.0, 10.0, 20),
        (50.0, 10.0, 20),
        (70.0, 10.0, 20),
    ));
    let (_dir, _pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    let result = analysis.calculate_results(&id, "user1").await.unwrap();

    assert_eq!(result.metric_results.len(), 1);
    assert_eq!(result.metric_results[0].metric_name, "metric_b");
    assert_eq!(result.overall_verdict, Verdict::InsufficientData);
}

#[tokio::test]
async fn missing_samples_force_insufficient_data() {
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 10.0, 0),
        (60.0, 10.0, 20),
        (50.0, 10.0, 0),
        (60.0, 10.0, 20),
    ));
    let (_dir, _pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    let result = analysis.calculate_results(&id, "user1").await.unwrap();

    assert!(result.metric_results.is_empty());
    assert_eq!(result.overall_verdict, Verdict::InsufficientData);
    assert!(result.overall_effect_size.is_none());
}

#[tokio::test]
async fn provider_failure_writes_nothing_and_keeps_the_status() {
    let (_dir, pool, experiments, analysis) = setup(FakeBaselineProvider::failing());
    let id = started_sensor_experiment(&experiments).await;

    let result = analysis.calculate_results(&id, "user1").await;
    assert!(matches!(result, Err(AppError::Provider { .. })));

    let count = pool
        .with_connection(|conn| ResultRepository::count_for_experiment(conn, &id))
        .unwrap();
    assert_eq!(count, 0);

    let (record, _) = experiments.get_experiment(&id, "user1").await.unwrap();
    assert_eq!(record.status, ExperimentStatus::Active);
    assert!(record.completed_at.is_none());

    let latest = analysis.get_experiment_results(&id, "user1").await.unwrap();
    assert!(latest.is_none());
}

#[tokio::test]
async fn successful_calculation_marks_the_experiment_completed() {
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
    ));
    let (_dir, _pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    analysis.calculate_results(&id, "user1").await.unwrap();

    let (record, _) = experiments.get_experiment(&id, "user1").await.unwrap();
    assert_eq!(record.status, ExperimentStatus::Completed);
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn recomputation_appends_a_new_result_row() {
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
    ));
    let (_dir, pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    analysis.calculate_results(&id, "user1").await.unwrap();
    analysis.calculate_results(&id, "user1").await.unwrap();

    let count = pool
        .with_connection(|conn| ResultRepository::count_for_experiment(conn, &id))
        .unwrap();
    assert_eq!(count, 2);

    let latest = analysis.get_experiment_results(&id, "user1").await.unwrap();
    assert!(latest.is_some());
}

#[tokio::test]
async fn results_are_invisible_to_other_subjects() {
    let provider = FakeBaselineProvider::new(two_metric_windows(
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
        (50.0, 10.0, 20),
        (60.0, 10.0, 20),
    ));
    let (_dir, _pool, experiments, analysis) = setup(provider);
    let id = started_sensor_experiment(&experiments).await;

    let result = analysis.calculate_results(&id, "user2").await;
    assert!(matches!(result, Err(AppError::NotFound)));

    let result = analysis.get_experiment_results(&id, "user2").await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

fn checkin_row(
    experiment_id: &str,
    date: &str,
    phase: CheckinPhase,
    day_number: i64,
    ratings: &[(&str, f64)],
) -> DailyCheckinRecord {
    DailyCheckinRecord {
        id: uuid::Uuid::new_v4().to_string(),
        experiment_id: experiment_id.to_string(),
        user_id: "user1".to_string(),
        checkin_date: date.to_string(),
        submitted_at: format!("{date}T21:00:00+00:00"),
        phase,
        day_number,
        ratings: ratings
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect(),
        notes: None,
        noise_flags: vec![],
        source: "manual".to_string(),
    }
}

#[tokio::test]
async fn subjective_metrics_compare_baseline_and_active_checkins() {
    let (_dir, pool, experiments, analysis) = setup(FakeBaselineProvider::new(HashMap::new()));

    let created = experiments
        .create_experiment(create_input("journal_blend"))
        .await
        .unwrap();
    experiments
        .start_experiment(&created.id, "user1", false)
        .await
        .unwrap();

    // Baseline ratings 4/5/6 (mean 5), active ratings 7/8/9 (mean 8) for
    // both subjective metrics.
    let rows = [
        ("2026-08-01", CheckinPhase::Baseline, 1, 4.0),
        ("2026-08-02", CheckinPhase::Baseline, 2, 5.0),
        ("2026-08-03", CheckinPhase::Baseline, 3, 6.0),
        ("2026-08-08", CheckinPhase::Active, 1, 7.0),
        ("2026-08-09", CheckinPhase::Active, 2, 8.0),
        ("2026-08-10", CheckinPhase::Active, 3, 9.0),
    ];
    pool.with_connection(|conn| {
        for (date, phase, day, value) in rows {
            let ratings = [("focus_quality", value), ("calm_alertness", value)];
            CheckinRepository::upsert(
                conn,
                &checkin_row(&created.id, date, phase, day, &ratings),
            )?;
        }
        Ok(())
    })
    .unwrap();

    let result = analysis
        .calculate_results(&created.id, "user1")
        .await
        .unwrap();

    assert_eq!(result.metric_results.len(), 2);
    for metric in &result.metric_results {
        assert_eq!(metric.kind, MetricKind::Subjective);
        assert!((metric.baseline_mean - 5.0).abs() < 1e-12);
        assert!((metric.experiment_mean - 8.0).abs() < 1e-12);
        // Population stddev of 4/5/6 is sqrt(2/3); d = 3 / sqrt(2/3).
        let expected = 3.0 / (2.0f64 / 3.0).sqrt();
        assert!((metric.effect_size - expected).abs() < 1e-9);
        assert_eq!(metric.verdict, Verdict::StrongSuccess);
        // Three points per phase is below the high-confidence bar of 7.
        assert!((metric.confidence - 0.6).abs() < f64::EPSILON);
        assert_eq!(metric.baseline_samples, 3);
        assert_eq!(metric.experiment_samples, 3);
    }
    assert_eq!(result.overall_verdict, Verdict::StrongSuccess);
}

#[tokio::test]
async fn fewer_than_three_checkins_per_phase_skips_the_metric() {
    let (_dir, pool, experiments, analysis) = setup(FakeBaselineProvider::new(HashMap::new()));

    let created = experiments
        .create_experiment(create_input("journal_blend"))
        .await
        .unwrap();
    experiments
        .start_experiment(&created.id, "user1", false)
        .await
        .unwrap();

    let rows = [
        ("2026-08-01", CheckinPhase::Baseline, 1, 4.0),
        ("2026-08-02", CheckinPhase::Baseline, 2, 5.0),
        ("2026-08-08", CheckinPhase::Active, 1, 8.0),
        ("2026-08-09", CheckinPhase::Active, 2, 9.0),
    ];
    pool.with_connection(|conn| {
        for (date, phase, day, value) in rows {
            let ratings = [("focus_quality", value), ("calm_alertness", value)];
            CheckinRepository::upsert(
                conn,
                &checkin_row(&created.id, date, phase, day, &ratings),
            )?;
        }
        Ok(())
    })
    .unwrap();

    let result = analysis
        .calculate_results(&created.id, "user1")
        .await
        .unwrap();

    assert!(result.metric_results.is_empty());
    assert_eq!(result.overall_verdict, Verdict::InsufficientData);
}
