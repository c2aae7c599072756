//! Collects the config maps and secrets of a deployment.
//!
//! Last-saved deployments merge the app-level and env-level documents,
//! specific-trigger deployments replay the merged documents captured by the
//! deployment they repeat. Either way the result is resolved for scoped
//! variables and handed to the merge engine as one document rooted at
//! `ConfigMaps` and `ConfigSecrets`.

use std::{collections::BTreeSet, sync::Arc};

use serde::de::DeserializeOwned;
use snafu::{ResultExt as _, Snafu};
use tracing::instrument;

use crate::{
    merge::{self, MergeStep},
    model::{
        AppId, ConfigMapHistory, ConfigMapJson, ConfigMapRootJson, ConfigSecretJson, ConfigSecretMap,
        ConfigSecretRootJson, ConfigType, EnvId, PipelineId, TriggerType, VariableSnapshot,
        WorkflowRunnerId,
    },
    store::{ConfigSecretRepository, OptionalExt as _, StoreError},
    variables::{self, ConfigSecretDocuments, ScopedVariableManager, VariableScope},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to fetch the {level} level config maps and secrets"))]
    FetchConfig {
        source: StoreError,
        level: &'static str,
    },

    #[snafu(display("unable to fetch the {data_type} history"))]
    FetchHistory {
        source: StoreError,
        data_type: ConfigType,
    },

    #[snafu(display("stored {data_type} document is not valid"))]
    ParseDocument {
        source: serde_json::Error,
        data_type: ConfigType,
    },

    #[snafu(display("unable to serialize the merged {data_type} document"))]
    SerializeDocument {
        source: serde_json::Error,
        data_type: ConfigType,
    },

    #[snafu(display("unable to resolve scoped variables"))]
    ResolveVariables { source: variables::Error },

    #[snafu(display("unable to merge resolved config maps and secrets"))]
    MergeResolved { source: merge::Error },
}

impl Error {
    /// Variable resolution failures abort a trigger, all other failures only
    /// drop the config maps and secrets from the release.
    pub fn is_variable_resolution(&self) -> bool {
        matches!(self, Self::ResolveVariables { .. })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ConfigSecretRequest {
    pub app_id: AppId,
    pub env_id: EnvId,
    pub pipeline_id: PipelineId,
    pub trigger: TriggerType,

    /// The deployment replayed by [`TriggerType::SpecificTrigger`].
    pub wfr_id: WorkflowRunnerId,
    pub scope: VariableScope,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedConfigSecret {
    /// The resolved config maps merged with the resolved secrets.
    pub merged_json: String,

    /// Config maps which are managed outside of the release but mounted by it.
    pub external_config_maps: Vec<String>,

    /// Plain Kubernetes secrets which are managed outside of the release.
    pub external_secrets: Vec<String>,
    pub config_map_snapshot: VariableSnapshot,
    pub secret_snapshot: VariableSnapshot,
}

pub struct ConfigSecretResolver {
    repository: Arc<dyn ConfigSecretRepository>,
    variables: Arc<dyn ScopedVariableManager>,
}

impl ConfigSecretResolver {
    pub fn new(
        repository: Arc<dyn ConfigSecretRepository>,
        variables: Arc<dyn ScopedVariableManager>,
    ) -> Self {
        Self {
            repository,
            variables,
        }
    }

    #[instrument(skip(self), fields(pipeline.id = %request.pipeline_id, trigger = %request.trigger))]
    pub async fn config_map_and_secret_json(
        &self,
        request: &ConfigSecretRequest,
    ) -> Result<MergedConfigSecret> {
        let (config_maps, secrets, snapshots) = match request.trigger {
            TriggerType::LastSaved => {
                let (config_maps, secrets) = self.last_saved(request).await?;
                (config_maps, secrets, None)
            }
            TriggerType::SpecificTrigger => {
                let (config_maps, secrets, snapshots) = self.replayed(request).await?;
                (config_maps, secrets, Some(snapshots))
            }
        };

        let external_config_maps = external_config_maps(&config_maps);
        let external_secrets = external_secrets(&secrets);

        let config_maps = serde_json::to_string(&ConfigMapRootJson { config_maps }).context(
            SerializeDocumentSnafu {
                data_type: ConfigType::ConfigMap,
            },
        )?;
        let secrets = serde_json::to_string(&ConfigSecretRootJson {
            config_secrets: secrets,
        })
        .context(SerializeDocumentSnafu {
            data_type: ConfigType::Secret,
        })?;

        let (config_map_snapshot, secret_snapshot) = match &snapshots {
            Some((config_maps, secrets)) => (Some(config_maps), Some(secrets)),
            None => (None, None),
        };
        let resolved = self
            .variables
            .resolve_cm_cs_trigger(&request.scope, ConfigSecretDocuments {
                config_maps: &config_maps,
                config_map_snapshot,
                secrets: &secrets,
                secret_snapshot,
            })
            .await
            .context(ResolveVariablesSnafu)?;

        let merged_json = merge::merge_documents(
            &resolved.config_maps.resolved,
            &resolved.secrets.resolved,
            MergeStep::ConfigSecret,
        )
        .context(MergeResolvedSnafu)?;

        Ok(MergedConfigSecret {
            merged_json,
            external_config_maps,
            external_secrets,
            config_map_snapshot: resolved.config_maps.snapshot,
            secret_snapshot: resolved.secrets.snapshot,
        })
    }

    async fn last_saved(&self, request: &ConfigSecretRequest) -> Result<(ConfigMapJson, ConfigSecretJson)> {
        let app_level = self
            .repository
            .app_level_config(request.app_id)
            .await
            .optional()
            .context(FetchConfigSnafu { level: "app" })?;
        let env_level = self
            .repository
            .env_level_config(request.app_id, request.env_id)
            .await
            .optional()
            .context(FetchConfigSnafu { level: "env" })?;

        let (app_config_maps, app_secrets) = match &app_level {
            Some(record) => (
                parse::<ConfigMapJson>(&record.config_map_data, ConfigType::ConfigMap)?,
                parse::<ConfigSecretJson>(&record.secret_data, ConfigType::Secret)?,
            ),
            None => Default::default(),
        };
        let (env_config_maps, env_secrets) = match &env_level {
            Some(record) => (
                parse::<ConfigMapJson>(&record.config_map_data, ConfigType::ConfigMap)?,
                parse::<ConfigSecretJson>(&record.secret_data, ConfigType::Secret)?,
            ),
            None => Default::default(),
        };

        Ok((
            merge_config_maps(app_config_maps, env_config_maps),
            merge_secrets(app_secrets, env_secrets),
        ))
    }

    async fn replayed(
        &self,
        request: &ConfigSecretRequest,
    ) -> Result<(ConfigMapJson, ConfigSecretJson, (VariableSnapshot, VariableSnapshot))> {
        // Missing history is a fetch failure, not an empty document
        let config_map_history = self.history(request, ConfigType::ConfigMap).await?;
        let secret_history = self.history(request, ConfigType::Secret).await?;

        // History documents are already merged, they stand in for the env level
        let config_maps = merge_config_maps(
            ConfigMapJson::default(),
            parse(&config_map_history.data, ConfigType::ConfigMap)?,
        );
        let secrets = merge_secrets(
            ConfigSecretJson::default(),
            parse(&secret_history.data, ConfigType::Secret)?,
        );

        Ok((
            config_maps,
            secrets,
            (config_map_history.variable_snapshot, secret_history.variable_snapshot),
        ))
    }

    async fn history(&self, request: &ConfigSecretRequest, data_type: ConfigType) -> Result<ConfigMapHistory> {
        self.repository
            .config_history(request.pipeline_id, request.wfr_id, data_type)
            .await
            .context(FetchHistorySnafu { data_type })
    }
}

fn parse<T: DeserializeOwned + Default>(document: &str, data_type: ConfigType) -> Result<T> {
    if document.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(document).context(ParseDocumentSnafu { data_type })
}

/// Env-level entries replace app-level entries of the same name.
fn merge_entries(app_level: Vec<ConfigSecretMap>, env_level: Vec<ConfigSecretMap>) -> Vec<ConfigSecretMap> {
    let env_names: BTreeSet<_> = env_level.iter().map(|entry| entry.name.clone()).collect();

    app_level
        .into_iter()
        .filter(|entry| !env_names.contains(&entry.name))
        .chain(env_level)
        .collect()
}

pub fn merge_config_maps(app_level: ConfigMapJson, env_level: ConfigMapJson) -> ConfigMapJson {
    let maps = merge_entries(app_level.maps, env_level.maps);
    ConfigMapJson {
        enabled: !maps.is_empty(),
        maps,
    }
}

pub fn merge_secrets(app_level: ConfigSecretJson, env_level: ConfigSecretJson) -> ConfigSecretJson {
    let secrets = merge_entries(app_level.secrets, env_level.secrets);
    ConfigSecretJson {
        enabled: !secrets.is_empty(),
        secrets,
    }
}

pub fn external_config_maps(config_maps: &ConfigMapJson) -> Vec<String> {
    if !config_maps.enabled {
        return Vec::new();
    }
    config_maps
        .maps
        .iter()
        .filter(|entry| entry.external)
        .map(|entry| entry.name.clone())
        .collect()
}

pub fn external_secrets(secrets: &ConfigSecretJson) -> Vec<String> {
    if !secrets.enabled {
        return Vec::new();
    }
    secrets
        .secrets
        .iter()
        .filter(|entry| entry.external && entry.is_native_kubernetes_secret())
        .map(|entry| entry.name.clone())
        .collect()
}
