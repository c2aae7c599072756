use serde::{Deserialize, Serialize};

use crate::model::{PipelineId, PipelineStrategyId};

/// The rollout strategy a chart is deployed with.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStrategy {
    Rolling,
    BlueGreen,
    Canary,
    Recreate,
}

/// A strategy configured for a pipeline.
///
/// Deleted rows are kept for auditing and never returned by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStrategy {
    pub id: PipelineStrategyId,
    pub pipeline_id: PipelineId,
    pub strategy: DeploymentStrategy,

    /// Strategy specific chart values, merged over the environment values.
    pub config: String,
    pub default: bool,
    pub deleted: bool,
}
