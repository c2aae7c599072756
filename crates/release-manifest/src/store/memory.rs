//! A store keeping every record in memory.
//!
//! Used for dry runs and by the test suites. Each operation takes the lock
//! once, so concurrent callers interleave between operations the same way
//! they do against a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    model::{
        AppId, Chart, ChartId, ChartRefId, CiArtifact, CiArtifactId, ConfigMapHistory,
        ConfigMapRecord, ConfigType, DeploymentStrategy, DeploymentTemplateHistory,
        EnvConfigOverride, EnvConfigOverrideId, EnvId, Environment, Pipeline, PipelineId,
        PipelineOverride, PipelineOverrideId, PipelineStrategy, PipelineStrategyHistory,
        WorkflowRunnerId,
    },
    store::{
        ConfigSecretRepository, DeploymentConfigStore, EnvConfigOverrideRepository,
        PipelineOverrideRepository, Result, StoreError,
    },
};

/// Every record held by an [`InMemoryStore`].
#[derive(Clone, Debug, Default)]
pub struct StoreContents {
    pub pipelines: BTreeMap<PipelineId, Pipeline>,
    pub environments: BTreeMap<EnvId, Environment>,
    pub artifacts: BTreeMap<CiArtifactId, CiArtifact>,
    pub charts: BTreeMap<ChartId, Chart>,
    pub env_overrides: BTreeMap<EnvConfigOverrideId, EnvConfigOverride>,
    pub strategies: Vec<PipelineStrategy>,
    pub template_history: Vec<DeploymentTemplateHistory>,
    pub strategy_history: Vec<PipelineStrategyHistory>,
    pub config_history: Vec<ConfigMapHistory>,
    pub config_records: Vec<ConfigMapRecord>,
    pub pipeline_overrides: BTreeMap<PipelineOverrideId, PipelineOverride>,
}

impl StoreContents {
    fn with_chart(&self, mut env_override: EnvConfigOverride) -> EnvConfigOverride {
        env_override.chart = self.charts.get(&env_override.chart_id).cloned();
        env_override
    }

    fn chart_of(&self, env_override: &EnvConfigOverride) -> Option<&Chart> {
        self.charts.get(&env_override.chart_id)
    }
}

fn next_id<K, V>(map: &BTreeMap<K, V>, id: impl Fn(&K) -> i64) -> i64 {
    map.keys().next_back().map_or(1, |key| id(key) + 1)
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    contents: Mutex<StoreContents>,
}

impl InMemoryStore {
    pub fn new(contents: StoreContents) -> Self {
        Self {
            contents: Mutex::new(contents),
        }
    }

    /// A copy of all records as they are right now.
    pub async fn snapshot(&self) -> StoreContents {
        self.contents.lock().await.clone()
    }
}

#[async_trait]
impl DeploymentConfigStore for InMemoryStore {
    async fn find_pipeline_by_id(&self, id: PipelineId) -> Result<Pipeline> {
        let contents = self.contents.lock().await;
        contents
            .pipelines
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("pipeline", id))
    }

    async fn find_environment_by_id(&self, id: EnvId) -> Result<Environment> {
        let contents = self.contents.lock().await;
        contents
            .environments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("environment", id))
    }

    async fn find_ci_artifact_by_id(&self, id: CiArtifactId) -> Result<CiArtifact> {
        let contents = self.contents.lock().await;
        contents
            .artifacts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ci artifact", id))
    }

    async fn active_env_override(&self, app_id: AppId, env_id: EnvId) -> Result<EnvConfigOverride> {
        let contents = self.contents.lock().await;
        contents
            .env_overrides
            .values()
            .find(|env_override| {
                env_override.active
                    && env_override.target_environment == env_id
                    && contents
                        .chart_of(env_override)
                        .is_some_and(|chart| chart.app_id == app_id)
            })
            .map(|env_override| contents.with_chart(env_override.clone()))
            .ok_or_else(|| StoreError::not_found("active env override", format!("app {app_id} env {env_id}")))
    }

    async fn env_override_by_chart_ref(
        &self,
        app_id: AppId,
        env_id: EnvId,
        chart_ref_id: ChartRefId,
    ) -> Result<EnvConfigOverride> {
        let contents = self.contents.lock().await;
        contents
            .env_overrides
            .values()
            .find(|env_override| {
                env_override.active
                    && env_override.target_environment == env_id
                    && contents.chart_of(env_override).is_some_and(|chart| {
                        chart.app_id == app_id && chart.chart_ref_id == chart_ref_id
                    })
            })
            .map(|env_override| contents.with_chart(env_override.clone()))
            .ok_or_else(|| {
                StoreError::not_found(
                    "env override",
                    format!("app {app_id} env {env_id} chart ref {chart_ref_id}"),
                )
            })
    }

    async fn env_override_by_id_including_inactive(
        &self,
        id: EnvConfigOverrideId,
    ) -> Result<EnvConfigOverride> {
        let contents = self.contents.lock().await;
        contents
            .env_overrides
            .get(&id)
            .map(|env_override| contents.with_chart(env_override.clone()))
            .ok_or_else(|| StoreError::not_found("env override", id))
    }

    async fn latest_chart(&self, app_id: AppId) -> Result<Chart> {
        let contents = self.contents.lock().await;
        contents
            .charts
            .values()
            .find(|chart| chart.app_id == app_id && chart.latest)
            .cloned()
            .ok_or_else(|| StoreError::not_found("latest chart of app", app_id))
    }

    async fn historical_deployment_template(
        &self,
        pipeline_id: PipelineId,
        wfr_id: WorkflowRunnerId,
    ) -> Result<DeploymentTemplateHistory> {
        let contents = self.contents.lock().await;
        contents
            .template_history
            .iter()
            .find(|history| history.pipeline_id == pipeline_id && history.wfr_id == wfr_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found(
                    "deployment template history",
                    format!("pipeline {pipeline_id} wfr {wfr_id}"),
                )
            })
    }

    async fn historical_strategy(
        &self,
        pipeline_id: PipelineId,
        wfr_id: WorkflowRunnerId,
    ) -> Result<PipelineStrategyHistory> {
        let contents = self.contents.lock().await;
        contents
            .strategy_history
            .iter()
            .find(|history| history.pipeline_id == pipeline_id && history.wfr_id == wfr_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found(
                    "strategy history",
                    format!("pipeline {pipeline_id} wfr {wfr_id}"),
                )
            })
    }

    async fn default_or_named_strategy(
        &self,
        pipeline_id: PipelineId,
        strategy: Option<DeploymentStrategy>,
    ) -> Result<PipelineStrategy> {
        let contents = self.contents.lock().await;
        contents
            .strategies
            .iter()
            .filter(|candidate| candidate.pipeline_id == pipeline_id && !candidate.deleted)
            .find(|candidate| match strategy {
                Some(strategy) => candidate.strategy == strategy,
                None => candidate.default,
            })
            .cloned()
            .ok_or_else(|| {
                let name = strategy.map_or_else(|| "default".to_owned(), |strategy| strategy.to_string());
                StoreError::not_found("strategy", format!("{name} of pipeline {pipeline_id}"))
            })
    }
}

#[async_trait]
impl EnvConfigOverrideRepository for InMemoryStore {
    async fn save_env_override(&self, mut env_override: EnvConfigOverride) -> Result<EnvConfigOverride> {
        let mut contents = self.contents.lock().await;
        env_override.id = EnvConfigOverrideId(next_id(&contents.env_overrides, |id| id.0));
        contents.env_overrides.insert(env_override.id, env_override.clone());
        Ok(env_override)
    }
}

#[async_trait]
impl PipelineOverrideRepository for InMemoryStore {
    async fn current_release_counter(&self, pipeline_id: PipelineId) -> Result<i64> {
        let contents = self.contents.lock().await;
        Ok(contents
            .pipeline_overrides
            .values()
            .filter(|pipeline_override| pipeline_override.pipeline_id == pipeline_id)
            .map(|pipeline_override| pipeline_override.pipeline_release_counter)
            .max()
            .unwrap_or_default())
    }

    async fn save_pipeline_override(
        &self,
        mut pipeline_override: PipelineOverride,
    ) -> Result<PipelineOverride> {
        let mut contents = self.contents.lock().await;
        pipeline_override.id = PipelineOverrideId(next_id(&contents.pipeline_overrides, |id| id.0));
        contents
            .pipeline_overrides
            .insert(pipeline_override.id, pipeline_override.clone());
        Ok(pipeline_override)
    }

    async fn update_pipeline_override(&self, pipeline_override: &PipelineOverride) -> Result<()> {
        let mut contents = self.contents.lock().await;
        let stored = contents
            .pipeline_overrides
            .get_mut(&pipeline_override.id)
            .ok_or_else(|| StoreError::not_found("pipeline override", pipeline_override.id))?;
        *stored = pipeline_override.clone();
        Ok(())
    }

    async fn find_by_pipeline_and_counter(
        &self,
        pipeline_id: PipelineId,
        counter: i64,
    ) -> Result<Vec<PipelineOverride>> {
        let contents = self.contents.lock().await;
        // BTreeMap iteration already yields ascending ids
        Ok(contents
            .pipeline_overrides
            .values()
            .filter(|pipeline_override| {
                pipeline_override.pipeline_id == pipeline_id
                    && pipeline_override.pipeline_release_counter == counter
            })
            .cloned()
            .collect())
    }

    async fn find_pipeline_override_by_id(&self, id: PipelineOverrideId) -> Result<PipelineOverride> {
        let contents = self.contents.lock().await;
        contents
            .pipeline_overrides
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("pipeline override", id))
    }
}

#[async_trait]
impl ConfigSecretRepository for InMemoryStore {
    async fn app_level_config(&self, app_id: AppId) -> Result<ConfigMapRecord> {
        let contents = self.contents.lock().await;
        contents
            .config_records
            .iter()
            .find(|record| record.app_id == app_id && record.environment_id.is_none())
            .cloned()
            .ok_or_else(|| StoreError::not_found("app level config", app_id))
    }

    async fn env_level_config(&self, app_id: AppId, env_id: EnvId) -> Result<ConfigMapRecord> {
        let contents = self.contents.lock().await;
        contents
            .config_records
            .iter()
            .find(|record| record.app_id == app_id && record.environment_id == Some(env_id))
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found("env level config", format!("app {app_id} env {env_id}"))
            })
    }

    async fn config_history(
        &self,
        pipeline_id: PipelineId,
        wfr_id: WorkflowRunnerId,
        data_type: ConfigType,
    ) -> Result<ConfigMapHistory> {
        let contents = self.contents.lock().await;
        contents
            .config_history
            .iter()
            .find(|history| {
                history.pipeline_id == pipeline_id
                    && history.wfr_id == wfr_id
                    && history.data_type == data_type
            })
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found(
                    "config history",
                    format!("{data_type} of pipeline {pipeline_id} wfr {wfr_id}"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use super::*;
    use crate::model::{CdWorkflowId, DeploymentType, PipelineStrategyId, UserId};

    fn strategy(id: i64, strategy: DeploymentStrategy, default: bool, deleted: bool) -> PipelineStrategy {
        PipelineStrategy {
            id: PipelineStrategyId(id),
            pipeline_id: PipelineId(10),
            strategy,
            config: "{}".to_owned(),
            default,
            deleted,
        }
    }

    #[tokio::test]
    async fn deleted_strategies_are_never_returned() {
        let store = InMemoryStore::new(StoreContents {
            strategies: vec![
                strategy(1, DeploymentStrategy::Rolling, true, true),
                strategy(2, DeploymentStrategy::Canary, false, false),
            ],
            ..Default::default()
        });

        let default = store.default_or_named_strategy(PipelineId(10), None).await;
        assert!(default.is_err_and(|error| error.is_not_found()));

        let canary = store
            .default_or_named_strategy(PipelineId(10), Some(DeploymentStrategy::Canary))
            .await
            .expect("canary strategy is configured");
        assert_eq!(canary.id, PipelineStrategyId(2));
    }

    #[tokio::test]
    async fn release_counter_tracks_saved_overrides() {
        let store = InMemoryStore::default();
        assert_eq!(store.current_release_counter(PipelineId(10)).await.ok(), Some(0));

        for counter in [3, 1] {
            store
                .save_pipeline_override(PipelineOverride::new(
                    PipelineId(10),
                    EnvConfigOverrideId(1),
                    CiArtifactId(1),
                    CdWorkflowId(1),
                    counter,
                    DeploymentType::Deploy,
                    UserId(1),
                    Timestamp::UNIX_EPOCH,
                ))
                .await
                .expect("saving into memory never fails");
        }

        assert_eq!(store.current_release_counter(PipelineId(10)).await.ok(), Some(3));
        assert_eq!(store.current_release_counter(PipelineId(11)).await.ok(), Some(0));

        let matching = store
            .find_by_pipeline_and_counter(PipelineId(10), 1)
            .await
            .expect("reading from memory never fails");
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].id, PipelineOverrideId(2));
    }
}
