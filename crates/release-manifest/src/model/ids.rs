use std::fmt::Display;

use serde::{Deserialize, Serialize};

macro_rules! ids {
    ($($(#[$meta:meta])* $name:ident;)+) => {
        $(
            $(#[$meta])*
            #[derive(
                Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl From<i64> for $name {
                fn from(value: i64) -> Self {
                    Self(value)
                }
            }
        )+
    };
}

ids! {
    /// Identifies an application.
    AppId;
    /// Identifies an environment an application is deployed to.
    EnvId;
    /// Identifies a cluster hosting one or more environments.
    ClusterId;
    /// Identifies a CD pipeline, which binds one application to one environment.
    PipelineId;
    /// Identifies the CI pipeline producing the artifacts a CD pipeline deploys.
    CiPipelineId;
    CiArtifactId;
    ChartId;
    ChartRefId;
    EnvConfigOverrideId;
    PipelineOverrideId;
    PipelineStrategyId;
    CdWorkflowId;
    /// Identifies a single run of a CD workflow.
    WorkflowRunnerId;
    /// Identifies a history record captured when a workflow runner deployed.
    HistoryId;
    ConfigMapRecordId;
    UserId;
}
