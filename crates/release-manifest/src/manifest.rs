//! Computes the values a pipeline release is deployed with.
//!
//! A trigger either creates a new release or replays an existing one. New
//! releases go through every stage:
//!
//! 1. the pipeline, artifact and strategy are resolved,
//! 2. the env override is resolved (or lazily created) and its variables
//!    resolved,
//! 3. a release counter is allocated,
//! 4. the release fragment is rendered,
//! 5. config maps, secrets and app labels are collected,
//! 6. all documents are merged and adjusted to the live cluster state,
//! 7. pull secrets are injected and the values are persisted.
//!
//! Replayed releases skip allocation and reuse the values stored with them.

use std::{path::PathBuf, sync::Arc};

use http::StatusCode;
use jiff::Timestamp;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::instrument;

use crate::{
    allocator::{self, NewRelease, PipelineOverrideAllocator},
    cli::ManifestConfig,
    clients::{
        AppLabelService, AppMetricsService, ChartRefService, ClientError, ImageDigestPolicyService,
        ImagePullSecretHandler,
    },
    config_secret::{self, ConfigSecretRequest, ConfigSecretResolver, MergedConfigSecret},
    k8s::KubernetesService,
    live_state::{self, ExternalResources, LiveStateAdjuster},
    merge::{self, MergeInputs},
    model::{
        AppId, Chart, CiArtifact, CiArtifactId, DeploymentConfig, DeploymentTemplateHistory, EnvConfigOverride,
        EnvConfigOverrideId, EnvId, Environment, Pipeline, PipelineId, PipelineOverride, PipelineOverrideId,
        PipelineStrategy, PipelineStrategyId, TriggerType, ValuesOverrideRequest, ValuesOverrideResponse,
        WorkflowRunnerId,
    },
    release::{self, ReleaseOverrideInput, ReleaseOverrideRenderer},
    store::{
        ConfigSecretRepository, DeploymentConfigStore, EnvConfigOverrideRepository, OptionalExt as _,
        PipelineOverrideRepository, StoreError,
    },
    variables::{self, ScopedVariableManager, VariableEntity, VariableScope},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to fetch pipeline {pipeline_id}"))]
    FetchPipeline {
        source: StoreError,
        pipeline_id: PipelineId,
    },

    #[snafu(display("unable to fetch artifact {ci_artifact_id}"))]
    FetchArtifact {
        source: StoreError,
        ci_artifact_id: CiArtifactId,
    },

    #[snafu(display("unable to fetch environment {env_id}"))]
    FetchEnvironment { source: StoreError, env_id: EnvId },

    #[snafu(display("unable to fetch the deployment strategy of pipeline {pipeline_id}"))]
    FetchStrategy {
        source: StoreError,
        pipeline_id: PipelineId,
    },

    #[snafu(display("unable to fetch the env override of app {app_id} in environment {env_id}"))]
    FetchEnvOverride {
        source: StoreError,
        app_id: AppId,
        env_id: EnvId,
    },

    #[snafu(display("unable to fetch env override {env_override_id}"))]
    FetchEnvOverrideById {
        source: StoreError,
        env_override_id: EnvConfigOverrideId,
    },

    #[snafu(display("unable to fetch the latest chart of app {app_id}"))]
    FetchLatestChart { source: StoreError, app_id: AppId },

    #[snafu(display("unable to save env override of app {app_id} in environment {env_id}"))]
    SaveEnvOverride {
        source: StoreError,
        app_id: AppId,
        env_id: EnvId,
    },

    #[snafu(display("unable to fetch the deployment template deployed by pipeline {pipeline_id} in run {wfr_id}"))]
    FetchTemplateHistory {
        source: StoreError,
        pipeline_id: PipelineId,
        wfr_id: WorkflowRunnerId,
    },

    #[snafu(display("unable to find chart {name} {version}"))]
    FetchChartRef {
        source: ClientError,
        name: String,
        version: String,
    },

    #[snafu(display("unable to fetch release {pipeline_override_id}"))]
    FetchPipelineOverride {
        source: StoreError,
        pipeline_override_id: PipelineOverrideId,
    },

    #[snafu(display("env override {env_override_id} has no chart attached"))]
    MissingChart { env_override_id: EnvConfigOverrideId },

    #[snafu(display("env override {env_override_id} has no environment attached"))]
    MissingEnvironment { env_override_id: EnvConfigOverrideId },

    #[snafu(display("unable to resolve scoped variables of the deployment template"))]
    ResolveTemplateVariables { source: variables::Error },

    #[snafu(display("unable to allocate a release"))]
    AllocateRelease { source: allocator::Error },

    #[snafu(display("unable to determine whether app metrics are enabled"))]
    FetchAppMetrics { source: ClientError },

    #[snafu(display("unable to render the release override"))]
    RenderReleaseOverride { source: release::Error },

    #[snafu(display("unable to resolve config maps and secrets"))]
    ResolveConfigSecret { source: config_secret::Error },

    #[snafu(display("unable to merge the values of the release"))]
    MergeValues { source: merge::Error },

    #[snafu(display("unable to adjust the values to the live state of the cluster"))]
    AdjustLiveState { source: live_state::Error },

    #[snafu(display("unable to add image pull secrets"))]
    HandleImagePullSecret { source: ClientError },

    #[snafu(display("unable to serialize the merged values"))]
    SerializeMergedValues { source: serde_json::Error },

    #[snafu(display("unable to persist the merged values of release {pipeline_override_id}"))]
    PersistMergedValues {
        source: StoreError,
        pipeline_override_id: PipelineOverrideId,
    },

    #[snafu(display("unable to build the chart of app {app_name}"))]
    BuildChart { source: ClientError, app_name: String },
}

impl Error {
    /// The HTTP status a caller should answer a failed trigger with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RenderReleaseOverride { source } if source.is_validation() => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ResolveTemplateVariables { source } if source.is_validation() => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ResolveConfigSecret {
                source: config_secret::Error::ResolveVariables { source },
            } if source.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MergeValues {
                source: merge::Error::InvalidDocument { .. },
            } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AdjustLiveState { source } => source.status_code(),
            Self::FetchPipeline { source, .. }
            | Self::FetchArtifact { source, .. }
            | Self::FetchEnvironment { source, .. }
            | Self::FetchEnvOverride { source, .. }
            | Self::FetchEnvOverrideById { source, .. }
            | Self::FetchLatestChart { source, .. }
            | Self::FetchTemplateHistory { source, .. }
            | Self::FetchPipelineOverride { source, .. }
                if source.is_not_found() =>
            {
                StatusCode::NOT_FOUND
            }
            Self::FetchChartRef { source, .. } if source.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The services a [`ManifestCreationService`] delegates to.
#[derive(Clone)]
pub struct ManifestCollaborators {
    pub deployment_config: Arc<dyn DeploymentConfigStore>,
    pub env_overrides: Arc<dyn EnvConfigOverrideRepository>,
    pub pipeline_overrides: Arc<dyn PipelineOverrideRepository>,
    pub config_secrets: Arc<dyn ConfigSecretRepository>,
    pub chart_refs: Arc<dyn ChartRefService>,
    pub digest_policy: Arc<dyn ImageDigestPolicyService>,
    pub app_metrics: Arc<dyn AppMetricsService>,
    pub app_labels: Arc<dyn AppLabelService>,
    pub image_pull_secrets: Arc<dyn ImagePullSecretHandler>,
    pub variables: Arc<dyn ScopedVariableManager>,
    pub kubernetes: Arc<dyn KubernetesService>,
}

pub struct ManifestCreationService {
    store: Arc<dyn DeploymentConfigStore>,
    env_overrides: Arc<dyn EnvConfigOverrideRepository>,
    pipeline_overrides: Arc<dyn PipelineOverrideRepository>,
    chart_refs: Arc<dyn ChartRefService>,
    app_metrics: Arc<dyn AppMetricsService>,
    app_labels: Arc<dyn AppLabelService>,
    image_pull_secrets: Arc<dyn ImagePullSecretHandler>,
    variables: Arc<dyn ScopedVariableManager>,
    allocator: PipelineOverrideAllocator,
    renderer: ReleaseOverrideRenderer,
    config_secret: ConfigSecretResolver,
    live_state: LiveStateAdjuster,
}

impl ManifestCreationService {
    pub fn new(collaborators: ManifestCollaborators, config: ManifestConfig) -> Self {
        let ManifestCollaborators {
            deployment_config,
            env_overrides,
            pipeline_overrides,
            config_secrets,
            chart_refs,
            digest_policy,
            app_metrics,
            app_labels,
            image_pull_secrets,
            variables,
            kubernetes,
        } = collaborators;

        Self {
            allocator: PipelineOverrideAllocator::new(pipeline_overrides.clone()),
            renderer: ReleaseOverrideRenderer::new(digest_policy),
            config_secret: ConfigSecretResolver::new(config_secrets, variables.clone()),
            live_state: LiveStateAdjuster::new(kubernetes, config.hash_paths),
            store: deployment_config,
            env_overrides,
            pipeline_overrides,
            chart_refs,
            app_metrics,
            app_labels,
            image_pull_secrets,
            variables,
        }
    }

    /// Computes the values of a release and builds its chart.
    #[instrument(skip_all, fields(pipeline.id = %request.pipeline_id, app.name = %request.app_name))]
    pub async fn build_manifest_for_trigger(
        &self,
        request: &ValuesOverrideRequest,
        deployment_config: &DeploymentConfig,
        triggered_at: Timestamp,
    ) -> Result<(ValuesOverrideResponse, PathBuf)> {
        let response = self
            .values_override_for_trigger(request, deployment_config, triggered_at)
            .await?;

        let chart_path = self
            .chart_refs
            .build_chart_and_get_path(
                &request.app_name,
                &response.env_override,
                &response.merged_values,
                deployment_config,
            )
            .await
            .context(BuildChartSnafu {
                app_name: &request.app_name,
            })?;

        tracing::info!(chart.path = %chart_path.display(), "built chart of release");
        Ok((response, chart_path))
    }

    /// Computes the values of a release.
    ///
    /// A request carrying a `pipeline_override_id` replays that release with
    /// the values stored with it. Any other request creates a new release.
    #[instrument(
        skip_all,
        fields(
            pipeline.id = %request.pipeline_id,
            trigger = %request.deployment_with_config,
            deployment_type = %request.deployment_type,
        )
    )]
    pub async fn values_override_for_trigger(
        &self,
        request: &ValuesOverrideRequest,
        deployment_config: &DeploymentConfig,
        triggered_at: Timestamp,
    ) -> Result<ValuesOverrideResponse> {
        let deployment_type = request.deployment_type.resolved();

        let pipeline = self
            .store
            .find_pipeline_by_id(request.pipeline_id)
            .await
            .context(FetchPipelineSnafu {
                pipeline_id: request.pipeline_id,
            })?;
        let artifact = self
            .store
            .find_ci_artifact_by_id(request.ci_artifact_id)
            .await
            .context(FetchArtifactSnafu {
                ci_artifact_id: request.ci_artifact_id,
            })?;

        let pipeline_strategy = self.strategy_for_trigger(request).await?;

        let (mut env_override, existing_release) = match request.pipeline_override_id {
            Some(pipeline_override_id) => {
                let (env_override, pipeline_override) = self.replayed_release(pipeline_override_id).await?;
                (env_override, Some(pipeline_override))
            }
            None => (self.env_override_for_trigger(request, triggered_at).await?, None),
        };
        let environment = env_override
            .environment
            .clone()
            .context(MissingEnvironmentSnafu {
                env_override_id: env_override.id,
            })?;

        let is_new_release = existing_release.is_none();
        let mut pipeline_override = match existing_release {
            Some(pipeline_override) => pipeline_override,
            None => self
                .allocator
                .allocate(NewRelease {
                    pipeline_id: request.pipeline_id,
                    env_config_override_id: env_override.id,
                    ci_artifact_id: request.ci_artifact_id,
                    cd_workflow_id: request.cd_workflow_id,
                    deployment_type,
                    user: request.user_id,
                    triggered_at,
                })
                .await
                .context(AllocateReleaseSnafu)?,
        };

        let app_metrics_enabled = self.app_metrics_for_trigger(request).await?;

        let chart = env_override.chart.as_ref().context(MissingChartSnafu {
            env_override_id: env_override.id,
        })?;
        let release_override_json = self
            .renderer
            .render(&ReleaseOverrideInput {
                artifact: &artifact,
                pipeline: &pipeline,
                env_id: request.env_id,
                strategy: pipeline_strategy.as_ref().map(|strategy| strategy.strategy),
                release_counter: pipeline_override.pipeline_release_counter,
                app_metrics: app_metrics_enabled,
                template: &chart.image_descriptor_template,
                additional_override: request.additional_override.as_deref(),
            })
            .await
            .context(RenderReleaseOverrideSnafu)?;

        let merged_values = if is_new_release {
            let merged_values = self
                .merged_values(
                    request,
                    &pipeline,
                    &artifact,
                    &environment,
                    &mut env_override,
                    pipeline_strategy.as_ref(),
                    &release_override_json,
                )
                .await?;

            pipeline_override.pipeline_merged_values.clone_from(&merged_values);
            pipeline_override.audit.touch(request.user_id, triggered_at);
            self.pipeline_overrides
                .update_pipeline_override(&pipeline_override)
                .await
                .context(PersistMergedValuesSnafu {
                    pipeline_override_id: pipeline_override.id,
                })?;
            merged_values
        } else {
            tracing::debug!(
                pipeline_override.id = %pipeline_override.id,
                "replaying release with its stored values"
            );
            pipeline_override.pipeline_merged_values.clone()
        };

        tracing::info!(
            pipeline_override.id = %pipeline_override.id,
            release.counter = pipeline_override.pipeline_release_counter,
            "computed values of release"
        );

        Ok(ValuesOverrideResponse {
            pipeline,
            environment,
            artifact,
            pipeline_strategy,
            env_override,
            pipeline_override,
            release_override_json,
            merged_values,
            app_metrics_enabled,
            deployment_config: deployment_config.clone(),
        })
    }

    /// Collects every layer of a new release, merges them and adjusts the
    /// result to the target cluster.
    #[allow(clippy::too_many_arguments)]
    async fn merged_values(
        &self,
        request: &ValuesOverrideRequest,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        environment: &Environment,
        env_override: &mut EnvConfigOverride,
        pipeline_strategy: Option<&PipelineStrategy>,
        release_override_json: &str,
    ) -> Result<String> {
        let config_secret = self
            .config_secret_for_trigger(request, environment, env_override)
            .await?;

        let app_labels = match self.app_labels.app_labels_json(request.app_id).await {
            Ok(app_labels) => app_labels,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    app.id = %request.app_id,
                    "unable to fetch app labels, continuing without"
                );
                None
            }
        };

        let chart_values = if env_override.is_override {
            env_override.resolved_env_override_values.as_str()
        } else {
            env_override
                .chart
                .as_ref()
                .map(|chart| chart.resolved_global_override.as_str())
                .context(MissingChartSnafu {
                    env_override_id: env_override.id,
                })?
        };

        let mut values = merge::merge_override_values(&MergeInputs {
            chart_values,
            strategy_config: pipeline_strategy.map(|strategy| strategy.config.as_str()),
            release_override: release_override_json,
            config_secret: config_secret
                .as_ref()
                .map(|config_secret| config_secret.merged_json.as_str()),
            app_labels: app_labels.as_deref(),
        })
        .context(MergeValuesSnafu)?;

        let (external_config_maps, external_secrets) = config_secret
            .map(|config_secret| (config_secret.external_config_maps, config_secret.external_secrets))
            .unwrap_or_default();
        self.live_state
            .adjust(
                &mut values,
                pipeline,
                environment,
                ExternalResources {
                    config_maps: &external_config_maps,
                    secrets: &external_secrets,
                },
                request.deployment_type.resolved(),
            )
            .await
            .context(AdjustLiveStateSnafu)?;

        let values = self
            .image_pull_secrets
            .handle_image_pull_secret(environment, artifact, pipeline.ci_pipeline_id, values)
            .await
            .context(HandleImagePullSecretSnafu)?;

        serde_json::to_string(&values).context(SerializeMergedValuesSnafu)
    }

    /// Config maps and secrets of a new release, [`None`] if they could not
    /// be collected.
    ///
    /// Only variable resolution failures abort the trigger.
    async fn config_secret_for_trigger(
        &self,
        request: &ValuesOverrideRequest,
        environment: &Environment,
        env_override: &mut EnvConfigOverride,
    ) -> Result<Option<MergedConfigSecret>> {
        let config_secret_request = ConfigSecretRequest {
            app_id: request.app_id,
            env_id: request.env_id,
            pipeline_id: request.pipeline_id,
            trigger: request.deployment_with_config,
            wfr_id: request.wfr_id_for_deployment_with_specific_trigger,
            scope: variable_scope(request, environment),
        };

        match self
            .config_secret
            .config_map_and_secret_json(&config_secret_request)
            .await
        {
            Ok(config_secret) => {
                env_override
                    .variable_snapshot_for_config_maps
                    .clone_from(&config_secret.config_map_snapshot);
                env_override
                    .variable_snapshot_for_secrets
                    .clone_from(&config_secret.secret_snapshot);
                Ok(Some(config_secret))
            }
            Err(error) if error.is_variable_resolution() => Err(error).context(ResolveConfigSecretSnafu),
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "unable to collect config maps and secrets, continuing without"
                );
                Ok(None)
            }
        }
    }

    /// The strategy deployed with, [`None`] if the pipeline has none.
    async fn strategy_for_trigger(&self, request: &ValuesOverrideRequest) -> Result<Option<PipelineStrategy>> {
        let pipeline_id = request.pipeline_id;

        match request.deployment_with_config {
            TriggerType::SpecificTrigger => {
                let history = self
                    .store
                    .historical_strategy(pipeline_id, request.wfr_id_for_deployment_with_specific_trigger)
                    .await
                    .optional()
                    .context(FetchStrategySnafu { pipeline_id })?;

                Ok(history.map(|history| PipelineStrategy {
                    id: PipelineStrategyId::default(),
                    pipeline_id,
                    strategy: history.strategy,
                    config: history.config,
                    default: false,
                    deleted: false,
                }))
            }
            TriggerType::LastSaved => {
                let requested = request
                    .deployment_template
                    .filter(|_| !request.force_trigger);

                self.store
                    .default_or_named_strategy(pipeline_id, requested)
                    .await
                    .optional()
                    .context(FetchStrategySnafu { pipeline_id })
            }
        }
    }

    /// Loads a release to replay together with its env override, which may
    /// have been deactivated since.
    async fn replayed_release(
        &self,
        pipeline_override_id: PipelineOverrideId,
    ) -> Result<(EnvConfigOverride, PipelineOverride)> {
        let pipeline_override = self
            .pipeline_overrides
            .find_pipeline_override_by_id(pipeline_override_id)
            .await
            .context(FetchPipelineOverrideSnafu { pipeline_override_id })?;

        let env_override_id = pipeline_override.env_config_override_id;
        let mut env_override = self
            .store
            .env_override_by_id_including_inactive(env_override_id)
            .await
            .context(FetchEnvOverrideByIdSnafu { env_override_id })?;
        self.attach_environment(&mut env_override).await?;

        Ok((env_override, pipeline_override))
    }

    async fn env_override_for_trigger(
        &self,
        request: &ValuesOverrideRequest,
        triggered_at: Timestamp,
    ) -> Result<EnvConfigOverride> {
        match request.deployment_with_config {
            TriggerType::SpecificTrigger => self.env_override_for_specific_trigger(request).await,
            TriggerType::LastSaved => self.env_override_for_last_saved(request, triggered_at).await,
        }
    }

    /// The env override of the chart deployed by the replayed run, with the
    /// deployment template of that run resolved from its own variable
    /// snapshot.
    async fn env_override_for_specific_trigger(
        &self,
        request: &ValuesOverrideRequest,
    ) -> Result<EnvConfigOverride> {
        let history = self.template_history(request).await?;

        let chart_ref = self
            .chart_refs
            .find_by_version_and_name(&history.template_version, &history.template_name)
            .await
            .context(FetchChartRefSnafu {
                name: &history.template_name,
                version: &history.template_version,
            })?;

        let mut env_override = self
            .store
            .env_override_by_chart_ref(request.app_id, request.env_id, chart_ref.id)
            .await
            .context(FetchEnvOverrideSnafu {
                app_id: request.app_id,
                env_id: request.env_id,
            })?;
        self.attach_environment(&mut env_override).await?;

        let resolved = self
            .variables
            .resolve_from_snapshot(&history.template, &history.variable_snapshot)
            .await
            .context(ResolveTemplateVariablesSnafu)?;

        env_override.is_override = true;
        env_override.env_override_values = history.template;
        env_override.resolved_env_override_values = resolved.resolved;
        env_override.variable_snapshot = resolved.snapshot;
        Ok(env_override)
    }

    /// The active env override of the app in the environment.
    ///
    /// Environments without one get an override inheriting the values of the
    /// app's latest chart.
    async fn env_override_for_last_saved(
        &self,
        request: &ValuesOverrideRequest,
        triggered_at: Timestamp,
    ) -> Result<EnvConfigOverride> {
        let (app_id, env_id) = (request.app_id, request.env_id);

        let active = self
            .store
            .active_env_override(app_id, env_id)
            .await
            .optional()
            .context(FetchEnvOverrideSnafu { app_id, env_id })?;

        let mut env_override = match active {
            Some(env_override) if env_override.is_override => env_override,
            Some(mut env_override) => {
                env_override.chart = Some(self.latest_chart(app_id).await?);
                env_override
            }
            None => {
                let chart = self.latest_chart(app_id).await?;
                let existing = self
                    .store
                    .env_override_by_chart_ref(app_id, env_id, chart.chart_ref_id)
                    .await
                    .optional()
                    .context(FetchEnvOverrideSnafu { app_id, env_id })?;

                let mut env_override = match existing {
                    Some(env_override) => env_override,
                    None => {
                        let environment = self
                            .store
                            .find_environment_by_id(env_id)
                            .await
                            .context(FetchEnvironmentSnafu { env_id })?;
                        tracing::info!(
                            app.id = %app_id,
                            env.id = %env_id,
                            "environment has no env override yet, creating one inheriting the chart values"
                        );
                        self.env_overrides
                            .save_env_override(EnvConfigOverride::inheriting(
                                &chart,
                                &environment,
                                request.user_id,
                                triggered_at,
                            ))
                            .await
                            .context(SaveEnvOverrideSnafu { app_id, env_id })?
                    }
                };
                env_override.chart = Some(chart);
                env_override
            }
        };
        self.attach_environment(&mut env_override).await?;

        let environment = env_override
            .environment
            .as_ref()
            .context(MissingEnvironmentSnafu {
                env_override_id: env_override.id,
            })?;
        let scope = variable_scope(request, environment);

        if env_override.is_override {
            let resolved = self
                .variables
                .resolve_template(
                    &env_override.env_override_values,
                    &scope,
                    VariableEntity::DeploymentTemplateEnvLevel(env_override.id),
                )
                .await
                .context(ResolveTemplateVariablesSnafu)?;
            env_override.resolved_env_override_values = resolved.resolved;
            env_override.variable_snapshot = resolved.snapshot;
        } else {
            let env_override_id = env_override.id;
            let chart = env_override
                .chart
                .as_mut()
                .context(MissingChartSnafu { env_override_id })?;
            let resolved = self
                .variables
                .resolve_template(
                    &chart.global_override,
                    &scope,
                    VariableEntity::DeploymentTemplateAppLevel(chart.id),
                )
                .await
                .context(ResolveTemplateVariablesSnafu)?;
            chart.resolved_global_override = resolved.resolved;
            env_override.variable_snapshot = resolved.snapshot;
        }

        Ok(env_override)
    }

    async fn app_metrics_for_trigger(&self, request: &ValuesOverrideRequest) -> Result<bool> {
        match request.deployment_with_config {
            TriggerType::SpecificTrigger => Ok(self.template_history(request).await?.is_app_metrics_enabled),
            TriggerType::LastSaved => self
                .app_metrics
                .is_app_metrics_enabled(request.app_id, request.env_id)
                .await
                .context(FetchAppMetricsSnafu),
        }
    }

    async fn template_history(&self, request: &ValuesOverrideRequest) -> Result<DeploymentTemplateHistory> {
        let (pipeline_id, wfr_id) = (
            request.pipeline_id,
            request.wfr_id_for_deployment_with_specific_trigger,
        );
        self.store
            .historical_deployment_template(pipeline_id, wfr_id)
            .await
            .context(FetchTemplateHistorySnafu { pipeline_id, wfr_id })
    }

    async fn latest_chart(&self, app_id: AppId) -> Result<Chart> {
        self.store
            .latest_chart(app_id)
            .await
            .context(FetchLatestChartSnafu { app_id })
    }

    async fn attach_environment(&self, env_override: &mut EnvConfigOverride) -> Result<()> {
        let env_id = env_override.target_environment;
        let environment = self
            .store
            .find_environment_by_id(env_id)
            .await
            .context(FetchEnvironmentSnafu { env_id })?;
        env_override.environment = Some(environment);
        Ok(())
    }
}

fn variable_scope(request: &ValuesOverrideRequest, environment: &Environment) -> VariableScope {
    VariableScope {
        app_id: request.app_id,
        env_id: request.env_id,
        cluster_id: environment.cluster_id,
    }
}
