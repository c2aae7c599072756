//! Persistence contracts of the release pipeline.
//!
//! Reads of deployment configuration go through [`DeploymentConfigStore`],
//! writes are split into one trait per record kind. [`memory::InMemoryStore`]
//! implements all of them.

use std::fmt::Display;

use async_trait::async_trait;
use snafu::Snafu;

use crate::model::{
    AppId, Chart, CiArtifact, CiArtifactId, ConfigMapHistory, ConfigMapRecord, ConfigType,
    DeploymentStrategy, DeploymentTemplateHistory, EnvConfigOverride, EnvConfigOverrideId, EnvId,
    ChartRefId, Environment, Pipeline, PipelineId, PipelineOverride, PipelineOverrideId,
    PipelineStrategy, PipelineStrategyHistory, WorkflowRunnerId,
};

pub mod memory;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Boxed error of a store backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("{entity} {key} not found"))]
    NotFound { entity: &'static str, key: String },

    #[snafu(display("store backend failed to {operation}"))]
    Backend {
        operation: &'static str,
        source: BackendError,
    },
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Turns a missing record into `Ok(None)` while keeping every other error.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Read access to pipelines and their deployment configuration.
///
/// Env overrides are returned with their [`Chart`] attached.
#[async_trait]
pub trait DeploymentConfigStore: Send + Sync {
    async fn find_pipeline_by_id(&self, id: PipelineId) -> Result<Pipeline>;

    async fn find_environment_by_id(&self, id: EnvId) -> Result<Environment>;

    async fn find_ci_artifact_by_id(&self, id: CiArtifactId) -> Result<CiArtifact>;

    /// The active env override of an app in an environment.
    async fn active_env_override(&self, app_id: AppId, env_id: EnvId) -> Result<EnvConfigOverride>;

    async fn env_override_by_chart_ref(
        &self,
        app_id: AppId,
        env_id: EnvId,
        chart_ref_id: ChartRefId,
    ) -> Result<EnvConfigOverride>;

    async fn env_override_by_id_including_inactive(
        &self,
        id: EnvConfigOverrideId,
    ) -> Result<EnvConfigOverride>;

    /// The chart an app is currently configured with.
    async fn latest_chart(&self, app_id: AppId) -> Result<Chart>;

    async fn historical_deployment_template(
        &self,
        pipeline_id: PipelineId,
        wfr_id: WorkflowRunnerId,
    ) -> Result<DeploymentTemplateHistory>;

    async fn historical_strategy(
        &self,
        pipeline_id: PipelineId,
        wfr_id: WorkflowRunnerId,
    ) -> Result<PipelineStrategyHistory>;

    /// The named strategy of a pipeline, or its default one if `strategy` is
    /// [`None`]. Deleted strategies are never returned.
    async fn default_or_named_strategy(
        &self,
        pipeline_id: PipelineId,
        strategy: Option<DeploymentStrategy>,
    ) -> Result<PipelineStrategy>;
}

#[async_trait]
pub trait EnvConfigOverrideRepository: Send + Sync {
    /// Persists a new env override and returns it with its id assigned.
    async fn save_env_override(&self, env_override: EnvConfigOverride) -> Result<EnvConfigOverride>;
}

#[async_trait]
pub trait PipelineOverrideRepository: Send + Sync {
    /// The highest release counter of a pipeline, `0` if it was never released.
    async fn current_release_counter(&self, pipeline_id: PipelineId) -> Result<i64>;

    /// Persists a new release and returns it with its id assigned.
    async fn save_pipeline_override(&self, pipeline_override: PipelineOverride) -> Result<PipelineOverride>;

    async fn update_pipeline_override(&self, pipeline_override: &PipelineOverride) -> Result<()>;

    /// All releases of a pipeline carrying `counter`, ordered by id.
    async fn find_by_pipeline_and_counter(
        &self,
        pipeline_id: PipelineId,
        counter: i64,
    ) -> Result<Vec<PipelineOverride>>;

    async fn find_pipeline_override_by_id(&self, id: PipelineOverrideId) -> Result<PipelineOverride>;
}

#[async_trait]
pub trait ConfigSecretRepository: Send + Sync {
    async fn app_level_config(&self, app_id: AppId) -> Result<ConfigMapRecord>;

    async fn env_level_config(&self, app_id: AppId, env_id: EnvId) -> Result<ConfigMapRecord>;

    async fn config_history(
        &self,
        pipeline_id: PipelineId,
        wfr_id: WorkflowRunnerId,
        data_type: ConfigType,
    ) -> Result<ConfigMapHistory>;
}
