use std::collections::HashMap;

use serde::Serialize;

use crate::models::experiment::MetricKind;

/// Catalog metric definition. Objective metrics are backed by a passive
/// sensor data source; subjective metrics by daily self-reported ratings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricConfig {
    pub name: String,
    pub kind: MetricKind,
    pub data_source: String,
    pub baseline_days: i64,
    pub expected_onset_days: i64,
    pub success_criteria: Option<String>,
    /// Minimum meaningful effect for this metric. Exposed on experiment
    /// metrics but the verdict classifier currently applies the global
    /// thresholds instead.
    pub minimum_effect: f64,
    pub scale_min: Option<f64>,
    pub scale_max: Option<f64>,
    pub requires_checkin: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplementConfig {
    pub id: String,
    pub display_name: String,
    pub primary_intent: String,
    pub objective_metrics: Vec<MetricConfig>,
    pub subjective_metrics: Vec<MetricConfig>,
    pub recommended_duration_days: i64,
    pub washout_days: i64,
    /// Contextual confounders the subject can flag on a check-in.
    pub noise_filters: Vec<String>,
}

impl SupplementConfig {
    pub fn all_metrics(&self) -> impl Iterator<Item = &MetricConfig> {
        self.objective_metrics.iter().chain(self.subjective_metrics.iter())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentCompatibility {
    pub intent: String,
    pub label: String,
    /// Intents that cannot run concurrently with this one.
    pub cannot_add_intents: Vec<String>,
    pub conflict_reason: String,
}

/// Read-only lookup table mapping supplement types to their metric
/// configuration and intents to their conflict rules. Injected into the
/// services so tests can substitute a custom catalog.
#[derive(Debug, Clone)]
pub struct SupplementCatalog {
    supplements: HashMap<String, SupplementConfig>,
    intents: HashMap<String, IntentCompatibility>,
}

impl SupplementCatalog {
    pub fn new(supplements: Vec<SupplementConfig>, intents: Vec<IntentCompatibility>) -> Self {
        Self {
            supplements: supplements
                .into_iter()
                .map(|config| (config.id.clone(), config))
                .collect(),
            intents: intents
                .into_iter()
                .map(|entry| (entry.intent.clone(), entry))
                .collect(),
        }
    }

    pub fn get_config(&self, supplement_type: &str) -> Option<&SupplementConfig> {
        self.supplements.get(supplement_type)
    }

    pub fn intent_compatibility(&self, intent: &str) -> Option<&IntentCompatibility> {
        self.intents.get(intent)
    }

    /// Sorted for stable output.
    pub fn all_intents(&self) -> Vec<String> {
        let mut intents: Vec<String> = self.intents.keys().cloned().collect();
        intents.sort();
        intents
    }

    pub fn builtin() -> Self {
        Self::new(builtin_supplements(), builtin_intents())
    }
}

fn objective(
    name: &str,
    data_source: &str,
    baseline_days: i64,
    expected_onset_days: i64,
    minimum_effect: f64,
    success_criteria: &str,
) -> MetricConfig {
    MetricConfig {
        name: name.to_string(),
        kind: MetricKind::Objective,
        data_source: data_source.to_string(),
        baseline_days,
        expected_onset_days,
        success_criteria: Some(success_criteria.to_string()),
        minimum_effect,
        scale_min: None,
        scale_max: None,
        requires_checkin: false,
    }
}

fn subjective(
    name: &str,
    baseline_days: i64,
    expected_onset_days: i64,
    minimum_effect: f64,
    success_criteria: &str,
) -> MetricConfig {
    MetricConfig {
        name: name.to_string(),
        kind: MetricKind::Subjective,
        data_source: "daily_checkin".to_string(),
        baseline_days,
        expected_onset_days,
        success_criteria: Some(success_criteria.to_string()),
        minimum_effect,
        scale_min: Some(1.0),
        scale_max: Some(10.0),
        requires_checkin: true,
    }
}

fn builtin_supplements() -> Vec<SupplementConfig> {
    vec![
        SupplementConfig {
            id: "magnesium_glycinate".to_string(),
            display_name: "甘氨酸镁".to_string(),
            primary_intent: "better_sleep".to_string(),
            objective_metrics: vec![
                objective("sleep_score", "healthkit_sleep", 14, 7, 0.3, "睡眠评分提升"),
                objective("hrv", "healthkit_hrv", 14, 10, 0.2, "心率变异性提升"),
                objective(
                    "resting_heart_rate",
                    "healthkit_rhr",
                    14,
                    10,
                    0.2,
                    "静息心率下降",
                ),
            ],
            subjective_metrics: vec![
                subjective("sleep_quality", 7, 5, 0.3, "主观睡眠质量提升"),
                subjective("morning_energy", 7, 7, 0.2, "晨起精力提升"),
            ],
            recommended_duration_days: 30,
            washout_days: 14,
            noise_filters: noise_filters(&["illness", "travel", "alcohol", "late_caffeine"]),
        },
        SupplementConfig {
            id: "ashwagandha".to_string(),
            display_name: "南非醉茄".to_string(),
            primary_intent: "less_stress".to_string(),
            objective_metrics: vec![
                objective("hrv", "healthkit_hrv", 14, 14, 0.2, "心率变异性提升"),
                objective(
                    "resting_heart_rate",
                    "healthkit_rhr",
                    14,
                    14,
                    0.2,
                    "静息心率下降",
                ),
            ],
            subjective_metrics: vec![
                subjective("stress_level", 7, 10, 0.3, "主观压力下降"),
                subjective("mood", 7, 14, 0.2, "情绪稳定性提升"),
            ],
            recommended_duration_days: 42,
            washout_days: 14,
            noise_filters: noise_filters(&["illness", "travel", "work_deadline"]),
        },
        SupplementConfig {
            id: "creatine".to_string(),
            display_name: "肌酸".to_string(),
            primary_intent: "performance".to_string(),
            objective_metrics: vec![
                objective(
                    "exercise_minutes",
                    "healthkit_exercise",
                    14,
                    14,
                    0.2,
                    "运动时长提升",
                ),
                objective(
                    "active_energy",
                    "healthkit_active_energy",
                    14,
                    14,
                    0.2,
                    "活动消耗提升",
                ),
            ],
            subjective_metrics: vec![
                subjective("perceived_strength", 7, 14, 0.3, "主观力量感提升"),
                subjective("workout_quality", 7, 14, 0.2, "训练质量提升"),
            ],
            recommended_duration_days: 28,
            washout_days: 28,
            noise_filters: noise_filters(&["illness", "travel", "deload_week"]),
        },
        SupplementConfig {
            id: "l_theanine".to_string(),
            display_name: "L-茶氨酸".to_string(),
            primary_intent: "better_focus".to_string(),
            objective_metrics: vec![objective(
                "hrv",
                "healthkit_hrv",
                14,
                3,
                0.2,
                "心率变异性提升",
            )],
            subjective_metrics: vec![
                subjective("focus_quality", 7, 3, 0.3, "专注质量提升"),
                subjective("calm_alertness", 7, 3, 0.2, "平静清醒感提升"),
            ],
            recommended_duration_days: 21,
            washout_days: 7,
            noise_filters: noise_filters(&["illness", "travel", "late_caffeine"]),
        },
        SupplementConfig {
            id: "omega_3".to_string(),
            display_name: "深海鱼油".to_string(),
            primary_intent: "recovery".to_string(),
            objective_metrics: vec![
                objective("hrv", "healthkit_hrv", 14, 21, 0.2, "心率变异性提升"),
                objective(
                    "resting_heart_rate",
                    "healthkit_rhr",
                    14,
                    21,
                    0.2,
                    "静息心率下降",
                ),
            ],
            subjective_metrics: vec![
                subjective("muscle_soreness", 7, 14, 0.3, "肌肉酸痛下降"),
                subjective("joint_comfort", 7, 21, 0.2, "关节舒适度提升"),
            ],
            recommended_duration_days: 56,
            washout_days: 28,
            noise_filters: noise_filters(&["illness", "travel", "diet_change"]),
        },
    ]
}

fn builtin_intents() -> Vec<IntentCompatibility> {
    vec![
        IntentCompatibility {
            intent: "better_sleep".to_string(),
            label: "改善睡眠".to_string(),
            cannot_add_intents: vec!["better_focus".to_string()],
            conflict_reason: "提升专注的补充剂多含兴奋成分，会干扰睡眠实验的观察窗口".to_string(),
        },
        IntentCompatibility {
            intent: "better_focus".to_string(),
            label: "提升专注".to_string(),
            cannot_add_intents: vec!["better_sleep".to_string(), "less_stress".to_string()],
            conflict_reason: "专注类实验与镇静类实验同时进行时无法归因效果".to_string(),
        },
        IntentCompatibility {
            intent: "less_stress".to_string(),
            label: "缓解压力".to_string(),
            cannot_add_intents: vec!["better_focus".to_string()],
            conflict_reason: "两类补充剂对心率变异性的影响方向相反，会互相混淆".to_string(),
        },
        IntentCompatibility {
            intent: "performance".to_string(),
            label: "运动表现".to_string(),
            cannot_add_intents: vec!["recovery".to_string()],
            conflict_reason: "表现类与恢复类实验共享训练指标，无法区分各自贡献".to_string(),
        },
        IntentCompatibility {
            intent: "recovery".to_string(),
            label: "运动恢复".to_string(),
            cannot_add_intents: vec!["performance".to_string()],
            conflict_reason: "恢复类与表现类实验共享训练指标，无法区分各自贡献".to_string(),
        },
    ]
}

fn noise_filters(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|tag| tag.to_string()).collect()
}
