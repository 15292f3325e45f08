use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::SupplementCatalog;
use crate::error::{AppError, AppResult};
use crate::models::analysis::{BaselineValidation, MetricSufficiency};
use crate::models::experiment::MetricKind;
use crate::providers::{BaselineStatsProvider, MetricBaseline};

/// Window queried when judging whether historical data can stand in for a
/// dedicated baseline phase.
const SUFFICIENCY_WINDOW_DAYS: i64 = 30;

/// Decides whether enough historical data exists to start an experiment on
/// a retroactive baseline instead of waiting through a baseline phase.
///
/// Provider failures degrade to "insufficient" so a sufficiency check can
/// never block the UI; the subject just starts from scratch.
pub struct SufficiencyService {
    catalog: Arc<SupplementCatalog>,
    baselines: Arc<dyn BaselineStatsProvider>,
}

impl SufficiencyService {
    pub fn new(catalog: Arc<SupplementCatalog>, baselines: Arc<dyn BaselineStatsProvider>) -> Self {
        Self { catalog, baselines }
    }

    pub async fn validate_baseline_data(
        &self,
        user_id: &str,
        supplement_type: &str,
    ) -> AppResult<BaselineValidation> {
        let config = self.catalog.get_config(supplement_type).ok_or_else(|| {
            AppError::configuration(format!("未知的补充剂类型: {supplement_type}"))
        })?;

        let stats: HashMap<String, MetricBaseline> = match self
            .baselines
            .calculate_baselines(user_id, SUFFICIENCY_WINDOW_DAYS)
            .await
        {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| (entry.metric_type.clone(), entry))
                .collect(),
            Err(error) => {
                warn!(
                    target: "app::sufficiency",
                    user_id = %user_id,
                    %error,
                    "baseline provider unavailable, treating all objective metrics as insufficient"
                );
                HashMap::new()
            }
        };

        let mut metrics: Vec<MetricSufficiency> = Vec::new();

        for metric in &config.objective_metrics {
            let available_days = stats
                .get(&metric.data_source)
                .map(|entry| entry.sample_count)
                .unwrap_or(0);
            metrics.push(MetricSufficiency {
                metric_name: metric.name.clone(),
                kind: MetricKind::Objective,
                required_days: metric.baseline_days,
                available_days,
                sufficient: available_days >= metric.baseline_days,
            });
        }

        // Self-reported data cannot exist retroactively.
        for metric in &config.subjective_metrics {
            metrics.push(MetricSufficiency {
                metric_name: metric.name.clone(),
                kind: MetricKind::Subjective,
                required_days: metric.baseline_days,
                available_days: 0,
                sufficient: false,
            });
        }

        // Deliberately permissive OR over objective metrics: an AND policy
        // would make retroactive baselines unreachable for every experiment.
        let has_enough_data = metrics
            .iter()
            .any(|metric| metric.kind == MetricKind::Objective && metric.sufficient);

        info!(
            target: "app::sufficiency",
            user_id = %user_id,
            supplement_type = %supplement_type,
            has_enough_data,
            "validated baseline data"
        );

        Ok(BaselineValidation {
            has_enough_data,
            metrics,
        })
    }
}
