use serde::{Deserialize, Serialize};

use crate::model::{
    AppId, CdWorkflowId, CiArtifact, CiArtifactId, DeploymentConfig, DeploymentStrategy,
    DeploymentType, EnvConfigOverride, EnvId, Environment, Pipeline, PipelineId, PipelineOverride,
    PipelineOverrideId, PipelineStrategy, UserId, WorkflowRunnerId,
};

/// Which configuration a trigger deploys with.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// Deploy with the currently saved configuration.
    #[default]
    LastSaved,

    /// Deploy with the configuration captured when an earlier workflow
    /// runner deployed.
    SpecificTrigger,
}

/// A request to compute the values of a release.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesOverrideRequest {
    pub pipeline_id: PipelineId,
    pub app_id: AppId,
    pub env_id: EnvId,
    pub app_name: String,
    pub ci_artifact_id: CiArtifactId,
    pub cd_workflow_id: CdWorkflowId,
    pub wfr_id: WorkflowRunnerId,

    /// The workflow runner whose configuration is replayed by a
    /// [`TriggerType::SpecificTrigger`] deployment.
    pub wfr_id_for_deployment_with_specific_trigger: WorkflowRunnerId,

    /// An already allocated release to replay instead of creating a new one.
    pub pipeline_override_id: Option<PipelineOverrideId>,
    pub deployment_type: DeploymentType,
    pub deployment_with_config: TriggerType,

    /// The strategy requested for this trigger, the pipeline default is used
    /// when unset.
    pub deployment_template: Option<DeploymentStrategy>,
    pub force_trigger: bool,

    /// User supplied values placed underneath the rendered release fragment.
    pub additional_override: Option<String>,
    pub user_id: UserId,
}

/// Everything resolved while computing the values of a release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValuesOverrideResponse {
    pub pipeline: Pipeline,
    pub environment: Environment,
    pub artifact: CiArtifact,
    pub pipeline_strategy: Option<PipelineStrategy>,
    pub env_override: EnvConfigOverride,
    pub pipeline_override: PipelineOverride,
    pub release_override_json: String,
    pub merged_values: String,
    pub app_metrics_enabled: bool,
    pub deployment_config: DeploymentConfig,
}
