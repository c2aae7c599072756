use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::{AppId, CiArtifactId, CiPipelineId, ClusterId, EnvId, PipelineId, UserId};

/// A CD pipeline deploying one application to one environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: PipelineId,
    pub app_id: AppId,
    pub app_name: String,
    pub environment_id: EnvId,
    pub ci_pipeline_id: CiPipelineId,
    pub name: String,

    /// The release name the application is installed under in the target cluster.
    ///
    /// Live resources such as the HorizontalPodAutoscaler are looked up by this name.
    pub deployment_app_name: String,

    #[serde(default)]
    pub deployment_app_type: DeploymentAppType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvId,
    pub name: String,
    pub cluster_id: ClusterId,
    pub namespace: String,

    /// Virtual environments never get deployed into a cluster, so they have no
    /// live state to reconcile against.
    pub is_virtual_environment: bool,
}

/// An immutable record of a built image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiArtifact {
    pub id: CiArtifactId,

    /// The image reference in `repository:tag` form.
    pub image: String,
    pub image_digest: String,
    pub data_source: String,
    pub material_info: Option<String>,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentAppType {
    #[default]
    Helm,
    ArgoCd,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseMode {
    #[default]
    Create,
    Link,
}

/// How an application is released into one environment.
///
/// This is handed through to the chart builder untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub app_id: AppId,
    pub environment_id: EnvId,
    pub deployment_app_type: DeploymentAppType,
    pub release_mode: ReleaseMode,
}

/// Creation and modification stamps carried by every persisted record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub created_on: Timestamp,
    pub created_by: UserId,
    pub updated_on: Timestamp,
    pub updated_by: UserId,
}

impl AuditLog {
    pub fn new(user: UserId, at: Timestamp) -> Self {
        Self {
            created_on: at,
            created_by: user,
            updated_on: at,
            updated_by: user,
        }
    }

    pub fn touch(&mut self, user: UserId, at: Timestamp) {
        self.updated_on = at;
        self.updated_by = user;
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(UserId::default(), Timestamp::UNIX_EPOCH)
    }
}
