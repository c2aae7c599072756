use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::{
    AuditLog, CdWorkflowId, ChartStatus, CiArtifactId, EnvConfigOverrideId, PipelineId,
    PipelineOverrideId, UserId,
};

/// What a trigger asks the deployed application to do.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    Deploy,
    Stop,
    Start,

    /// Sent by callers which don't care, treated like [`DeploymentType::Deploy`].
    #[default]
    Unknown,
}

impl DeploymentType {
    /// Resolves [`DeploymentType::Unknown`] to [`DeploymentType::Deploy`].
    pub fn resolved(self) -> Self {
        match self {
            Self::Unknown => Self::Deploy,
            other => other,
        }
    }
}

/// One release of a pipeline.
///
/// Created exactly once per trigger. Within a pipeline the
/// `pipeline_release_counter` values are unique and increasing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOverride {
    pub id: PipelineOverrideId,
    pub pipeline_id: PipelineId,
    pub env_config_override_id: EnvConfigOverrideId,
    pub ci_artifact_id: CiArtifactId,
    pub cd_workflow_id: CdWorkflowId,
    pub pipeline_release_counter: i64,
    pub deployment_type: DeploymentType,

    /// The final values document of this release, empty until it has been merged.
    pub pipeline_merged_values: String,
    pub status: ChartStatus,
    pub audit: AuditLog,
}

impl PipelineOverride {
    /// An unsaved release in [`ChartStatus::New`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline_id: PipelineId,
        env_config_override_id: EnvConfigOverrideId,
        ci_artifact_id: CiArtifactId,
        cd_workflow_id: CdWorkflowId,
        pipeline_release_counter: i64,
        deployment_type: DeploymentType,
        user: UserId,
        at: Timestamp,
    ) -> Self {
        Self {
            id: PipelineOverrideId::default(),
            pipeline_id,
            env_config_override_id,
            ci_artifact_id,
            cd_workflow_id,
            pipeline_release_counter,
            deployment_type,
            pipeline_merged_values: String::new(),
            status: ChartStatus::New,
            audit: AuditLog::new(user, at),
        }
    }
}
