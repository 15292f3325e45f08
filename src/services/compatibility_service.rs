use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::catalog::SupplementCatalog;
use crate::db::repositories::experiment_repository::ExperimentRepository;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::compatibility::{BlockedIntent, CompatibilityReport};
use crate::models::experiment::ActiveExperimentSummary;

/// Blocks experiment intents that would confound a concurrently running
/// experiment's interpretation.
///
/// Store errors propagate here rather than degrading: silently allowing a
/// conflicting experiment to start would be a correctness bug, not a
/// degraded mode.
pub struct CompatibilityService {
    db: DbPool,
    catalog: Arc<SupplementCatalog>,
}

impl CompatibilityService {
    pub fn new(db: DbPool, catalog: Arc<SupplementCatalog>) -> Self {
        Self { db, catalog }
    }

    pub async fn check_experiment_compatibility(
        &self,
        user_id: &str,
    ) -> AppResult<CompatibilityReport> {
        let conn = self.db.get_connection()?;
        let running = ExperimentRepository::list_active_for_user(&conn, user_id)?;

        let active_experiments: Vec<ActiveExperimentSummary> =
            running.iter().map(ActiveExperimentSummary::from).collect();

        let mut active_intents: Vec<String> = Vec::new();
        let mut blocked_intents: Vec<BlockedIntent> = Vec::new();
        let mut blocked_set: BTreeSet<String> = BTreeSet::new();

        for experiment in &running {
            if !active_intents.contains(&experiment.intent) {
                active_intents.push(experiment.intent.clone());
            }

            // The same goal cannot be pursued twice at once.
            if blocked_set.insert(experiment.intent.clone()) {
                blocked_intents.push(BlockedIntent {
                    intent: experiment.intent.clone(),
                    reason: format!(
                        "已有针对该目标的进行中实验（{}）",
                        experiment.product_name
                    ),
                });
            }

            if let Some(compatibility) = self.catalog.intent_compatibility(&experiment.intent) {
                for conflicting in &compatibility.cannot_add_intents {
                    if blocked_set.insert(conflicting.clone()) {
                        blocked_intents.push(BlockedIntent {
                            intent: conflicting.clone(),
                            reason: format!(
                                "与 {} 的实验冲突：{}",
                                experiment.product_name, compatibility.conflict_reason
                            ),
                        });
                    }
                }
            }
        }

        let allowed_intents: Vec<String> = self
            .catalog
            .all_intents()
            .into_iter()
            .filter(|intent| !blocked_set.contains(intent))
            .collect();

        info!(
            target: "app::compatibility",
            user_id = %user_id,
            active = active_intents.len(),
            blocked = blocked_intents.len(),
            "resolved experiment compatibility"
        );

        Ok(CompatibilityReport {
            active_intents,
            active_experiments,
            blocked_intents,
            allowed_intents,
        })
    }
}
