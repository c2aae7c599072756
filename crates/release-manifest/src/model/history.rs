//! Snapshots captured whenever a workflow runner deployed, replayed by
//! specific-trigger deployments.

use serde::{Deserialize, Serialize};

use crate::model::{DeploymentStrategy, HistoryId, PipelineId, VariableSnapshot, WorkflowRunnerId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTemplateHistory {
    pub id: HistoryId,
    pub pipeline_id: PipelineId,
    pub wfr_id: WorkflowRunnerId,

    /// The environment values document as it was deployed.
    pub template: String,
    pub template_name: String,
    pub template_version: String,
    pub is_app_metrics_enabled: bool,
    pub variable_snapshot: VariableSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStrategyHistory {
    pub id: HistoryId,
    pub pipeline_id: PipelineId,
    pub wfr_id: WorkflowRunnerId,
    pub strategy: DeploymentStrategy,
    pub config: String,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigType {
    #[strum(serialize = "config map")]
    ConfigMap,
    #[strum(serialize = "secret")]
    Secret,
}

/// The already merged config map or secret document of one deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapHistory {
    pub id: HistoryId,
    pub pipeline_id: PipelineId,
    pub wfr_id: WorkflowRunnerId,
    pub data_type: ConfigType,
    pub data: String,
    pub variable_snapshot: VariableSnapshot,
}
