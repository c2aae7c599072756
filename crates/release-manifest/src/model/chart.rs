use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::{
    AppId, AuditLog, ChartId, ChartRefId, EnvConfigOverrideId, EnvId, Environment, UserId,
};

/// Values of the scoped variables a document was resolved with, keyed by variable name.
pub type VariableSnapshot = BTreeMap<String, serde_json::Value>;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChartStatus {
    #[default]
    New,
    DeploymentInProgress,
    Success,
    Error,
    Rollback,
    Unknown,
}

/// The chart an application is currently configured with, including its
/// app-level ("global") values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub id: ChartId,
    pub app_id: AppId,
    pub chart_ref_id: ChartRefId,
    pub chart_name: String,
    pub chart_version: String,
    pub global_override: String,
    pub resolved_global_override: String,

    /// Template rendering the per-release fragment (image, tag, release version, ...).
    pub image_descriptor_template: String,
    pub latest: bool,
    pub is_basic_view_locked: bool,
    pub current_view_editor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRef {
    pub id: ChartRefId,
    pub name: String,
    pub version: String,
}

/// Environment-scoped values for an application's chart.
///
/// When [`EnvConfigOverride::is_override`] is `false` the environment
/// inherits the chart's app-level values and [`EnvConfigOverride::env_override_values`]
/// is ignored during merging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfigOverride {
    pub id: EnvConfigOverrideId,
    pub chart_id: ChartId,
    pub target_environment: EnvId,
    pub namespace: String,
    pub env_override_values: String,
    pub resolved_env_override_values: String,
    pub is_override: bool,
    pub active: bool,
    pub latest: bool,
    pub status: ChartStatus,
    pub is_basic_view_locked: bool,
    pub current_view_editor: Option<String>,

    pub variable_snapshot: VariableSnapshot,
    pub variable_snapshot_for_config_maps: VariableSnapshot,
    pub variable_snapshot_for_secrets: VariableSnapshot,

    pub audit: AuditLog,

    /// The chart this override applies to, attached when the override is read.
    #[serde(skip)]
    pub chart: Option<Chart>,

    /// The target environment, attached by the manifest service.
    #[serde(skip)]
    pub environment: Option<Environment>,
}

impl EnvConfigOverride {
    /// An unsaved override for an environment that has none yet.
    ///
    /// It inherits the chart's values (`is_override == false`) and starts with
    /// an empty override document.
    pub fn inheriting(chart: &Chart, environment: &Environment, user: UserId, at: Timestamp) -> Self {
        Self {
            id: EnvConfigOverrideId::default(),
            chart_id: chart.id,
            target_environment: environment.id,
            namespace: environment.namespace.clone(),
            env_override_values: "{}".to_owned(),
            resolved_env_override_values: String::new(),
            is_override: false,
            active: true,
            latest: false,
            status: ChartStatus::Success,
            is_basic_view_locked: chart.is_basic_view_locked,
            current_view_editor: chart.current_view_editor.clone(),
            variable_snapshot: VariableSnapshot::new(),
            variable_snapshot_for_config_maps: VariableSnapshot::new(),
            variable_snapshot_for_secrets: VariableSnapshot::new(),
            audit: AuditLog::new(user, at),
            chart: Some(chart.clone()),
            environment: None,
        }
    }
}
