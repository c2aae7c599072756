//! Contracts of the services the release pipeline consults but does not own.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use snafu::Snafu;

use crate::model::{
    AppId, ChartRef, CiArtifact, CiPipelineId, DeploymentConfig, EnvConfigOverride, EnvId,
    Environment, PipelineId,
};

mod pull_secret;

pub use pull_secret::*;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ClientError {
    #[snafu(display("{what} not found"))]
    NotFound { what: String },

    #[snafu(display("{service} request failed"))]
    Request { service: &'static str, source: BoxError },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[async_trait]
pub trait ChartRefService: Send + Sync {
    async fn find_by_version_and_name(&self, version: &str, name: &str) -> Result<ChartRef, ClientError>;

    /// Packages the chart of `env_override` with the final values and returns
    /// where it was written to.
    async fn build_chart_and_get_path(
        &self,
        app_name: &str,
        env_override: &EnvConfigOverride,
        merged_values: &str,
        deployment_config: &DeploymentConfig,
    ) -> Result<PathBuf, ClientError>;
}

/// Digest pinning configured for a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DigestPolicy {
    pub digest_configured_for_pipeline: bool,
    pub digest_configured_for_env_or_cluster: bool,
}

impl DigestPolicy {
    pub fn use_digest_for_trigger(&self) -> bool {
        self.digest_configured_for_pipeline || self.digest_configured_for_env_or_cluster
    }
}

#[async_trait]
pub trait ImageDigestPolicyService: Send + Sync {
    async fn digest_policy(&self, pipeline_id: PipelineId) -> Result<DigestPolicy, ClientError>;
}

#[async_trait]
pub trait AppMetricsService: Send + Sync {
    async fn is_app_metrics_enabled(&self, app_id: AppId, env_id: EnvId) -> Result<bool, ClientError>;
}

#[async_trait]
pub trait AppLabelService: Send + Sync {
    /// Labels of an app as a values fragment, [`None`] if it has none.
    async fn app_labels_json(&self, app_id: AppId) -> Result<Option<String>, ClientError>;
}

#[async_trait]
pub trait ImagePullSecretHandler: Send + Sync {
    /// Adds the pull secrets the target environment needs to pull `artifact`.
    async fn handle_image_pull_secret(
        &self,
        environment: &Environment,
        artifact: &CiArtifact,
        ci_pipeline_id: CiPipelineId,
        values: Value,
    ) -> Result<Value, ClientError>;
}

