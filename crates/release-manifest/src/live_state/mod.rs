//! Reconciles release values with the live state of the target cluster.
//!
//! Two adjustments are made before a release is handed out:
//!
//! - The content of external config maps and secrets is hashed into the
//!   values, so workloads roll when the external data changes.
//! - The replica count is pinned to what the autoscaler currently runs,
//!   clamped into the configured bounds.

use std::{collections::BTreeMap, sync::Arc};

use http::StatusCode;
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use snafu::{ResultExt as _, Snafu};
use tracing::instrument;

use crate::{
    json_path::{self, JsonPath},
    k8s::{ClusterError, KubernetesService, ResourceIdentifier},
    model::{DeploymentType, Environment, Pipeline},
};

pub mod autoscaling;

pub use autoscaling::{HpaResourceRequest, hpa_resource_request, required_replica_count};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to find preferred version for hpa resource"))]
    PreferredVersion {
        source: ClusterError,
        group: &'static str,
    },

    #[snafu(display("HorizontalPodAutoscaler {name:?} could not be fetched"))]
    HpaBadRequest { source: ClusterError, name: String },

    #[snafu(display("taking longer than expected, please try again later"))]
    HpaTimeout { source: ClusterError, name: String },

    #[snafu(display("unable to fetch HorizontalPodAutoscaler {name:?}"))]
    FetchHpa { source: ClusterError, name: String },

    #[snafu(display("current replica count {value} of HorizontalPodAutoscaler {name:?} is not a number"))]
    InvalidCurrentReplicas { name: String, value: String },

    #[snafu(display("autoscaling is enabled but {key} is not set"))]
    MissingBound { key: String },

    #[snafu(display("empty value for key [{key}]"))]
    MissingCustomValue { key: &'static str },

    #[snafu(display("value {value} addressed by {key} is not a number"))]
    InvalidNumber { key: &'static str, value: String },

    #[snafu(display("path declared by {key} is not valid"))]
    InvalidCustomPath {
        source: json_path::Error,
        key: &'static str,
    },

    #[snafu(display("unable to set {path}"))]
    SetValue { source: json_path::Error, path: String },

    #[snafu(display("unable to fetch external config maps"))]
    FetchConfigMaps { source: ClusterError },

    #[snafu(display("unable to fetch external secrets"))]
    FetchSecrets { source: ClusterError },

    #[snafu(display("unable to serialize live data for hashing"))]
    SerializeHashInput { source: serde_json::Error },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PreferredVersion { .. }
            | Self::HpaBadRequest { .. }
            | Self::MissingBound { .. }
            | Self::MissingCustomValue { .. } => StatusCode::PRECONDITION_FAILED,
            Self::HpaTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Where the hashes of external config maps and secrets are written to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashPaths {
    pub config_hash: JsonPath,
    pub secret_hash: JsonPath,
}

/// External resources referenced by a release.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExternalResources<'a> {
    pub config_maps: &'a [String],
    pub secrets: &'a [String],
}

/// Hashes live data the way it is fetched, keyed by resource name.
pub fn hash_live_data(data: &BTreeMap<String, Value>) -> Result<String> {
    let serialized = serde_json::to_vec(data).context(SerializeHashInputSnafu)?;
    Ok(format!("{:x}", Sha256::digest(&serialized)))
}

pub struct LiveStateAdjuster {
    kubernetes: Arc<dyn KubernetesService>,
    hash_paths: HashPaths,
}

impl LiveStateAdjuster {
    pub fn new(kubernetes: Arc<dyn KubernetesService>, hash_paths: HashPaths) -> Self {
        Self {
            kubernetes,
            hash_paths,
        }
    }

    /// Applies all adjustments, unless the environment is virtual.
    ///
    /// Hashing external resources is best effort. Autoscaling failures are
    /// returned, a release must not reset a scaled application.
    #[instrument(skip_all, fields(pipeline.id = %pipeline.id, k8s.namespace.name = %environment.namespace))]
    pub async fn adjust(
        &self,
        values: &mut Value,
        pipeline: &Pipeline,
        environment: &Environment,
        external: ExternalResources<'_>,
        deployment_type: DeploymentType,
    ) -> Result<()> {
        if environment.is_virtual_environment {
            return Ok(());
        }

        if let Err(error) = self.stamp_external_hashes(values, environment, external).await {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "unable to hash external config maps and secrets, continuing without"
            );
        }

        self.preserve_autoscaling(values, pipeline, environment, deployment_type)
            .await
    }

    /// Writes the hashes of the live external config maps and secrets.
    ///
    /// Resources are processed kind by kind, a failure keeps the hashes
    /// written before it.
    pub async fn stamp_external_hashes(
        &self,
        values: &mut Value,
        environment: &Environment,
        external: ExternalResources<'_>,
    ) -> Result<()> {
        if !external.config_maps.is_empty() {
            let data = self
                .kubernetes
                .config_maps_data(environment.cluster_id, &environment.namespace, external.config_maps)
                .await
                .context(FetchConfigMapsSnafu)?;
            self.write_hash(values, &self.hash_paths.config_hash, &data)?;
        }

        if !external.secrets.is_empty() {
            let data = self
                .kubernetes
                .secrets_data(environment.cluster_id, &environment.namespace, external.secrets)
                .await
                .context(FetchSecretsSnafu)?;
            self.write_hash(values, &self.hash_paths.secret_hash, &data)?;
        }

        Ok(())
    }

    fn write_hash(&self, values: &mut Value, path: &JsonPath, data: &BTreeMap<String, Value>) -> Result<()> {
        let hash = hash_live_data(data)?;
        path.set(values, Value::String(hash)).context(SetValueSnafu {
            path: path.to_string(),
        })
    }

    /// Pins `replicaCount` to the live replica count of the release's
    /// autoscaler and applies the custom chart autoscaling rules.
    pub async fn preserve_autoscaling(
        &self,
        values: &mut Value,
        pipeline: &Pipeline,
        environment: &Environment,
        deployment_type: DeploymentType,
    ) -> Result<()> {
        let request = hpa_resource_request(values, &pipeline.deployment_app_name)?;

        match request {
            Some(request) if deployment_type != DeploymentType::Stop => {
                if let Some(current) = self.current_replicas(environment, &request).await? {
                    let required = required_replica_count(current, request.max_replicas, request.min_replicas);
                    tracing::debug!(
                        hpa.name = request.resource_name,
                        hpa.current_replicas = current,
                        replica_count = required,
                        "pinning replica count to the autoscaler"
                    );
                    if let Value::Object(map) = values {
                        map.insert(
                            autoscaling::REPLICA_COUNT_KEY.to_owned(),
                            autoscaling::replica_value(required),
                        );
                    }
                }
            }
            Some(_) => tracing::debug!("release is stopped, not consulting the autoscaler"),
            None => tracing::debug!("autoscaling is not enabled"),
        }

        autoscaling::apply_custom_chart_autoscaling(values, deployment_type)
    }

    /// The replica count the autoscaler currently runs, [`None`] if the
    /// autoscaler does not exist (yet) or has not settled.
    async fn current_replicas(
        &self,
        environment: &Environment,
        request: &HpaResourceRequest,
    ) -> Result<Option<f64>> {
        let version = self
            .kubernetes
            .preferred_version_for_api_group(environment.cluster_id, request.group)
            .await
            .context(PreferredVersionSnafu {
                group: request.group,
            })?;

        let resource = ResourceIdentifier {
            name: request.resource_name.clone(),
            namespace: environment.namespace.clone(),
            group: request.group.to_owned(),
            version,
            kind: request.kind.to_owned(),
        };

        let manifest = match self
            .kubernetes
            .get_resource(environment.cluster_id, &resource)
            .await
        {
            Ok(manifest) => manifest,
            // Hibernated applications have no autoscaler
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) if error.is_bad_request() => {
                return Err(error).context(HpaBadRequestSnafu {
                    name: &request.resource_name,
                });
            }
            Err(error) if error.is_timeout() => {
                return Err(error).context(HpaTimeoutSnafu {
                    name: &request.resource_name,
                });
            }
            Err(error) => {
                return Err(error).context(FetchHpaSnafu {
                    name: &request.resource_name,
                });
            }
        };

        // Absent while the autoscaler is still computing the replica count
        let Some(current) = manifest.pointer("/status/currentReplicas") else {
            return Ok(None);
        };

        autoscaling::number(current).map(Some).ok_or_else(|| {
            InvalidCurrentReplicasSnafu {
                name: &request.resource_name,
                value: current.to_string(),
            }
            .build()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::model::{AppId, CiPipelineId, ClusterId, DeploymentAppType, EnvId, PipelineId};

    /// Serves canned cluster responses and records what was asked for.
    #[derive(Default)]
    struct FakeCluster {
        hpa: Option<std::result::Result<Value, fn() -> ClusterError>>,
        config_maps: BTreeMap<String, Value>,
        fail_config_maps: bool,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KubernetesService for FakeCluster {
        async fn get_resource(
            &self,
            _: ClusterId,
            resource: &ResourceIdentifier,
        ) -> std::result::Result<Value, ClusterError> {
            self.requested
                .lock()
                .expect("lock is not poisoned")
                .push(format!("{}/{}/{}", resource.group, resource.version, resource.name));
            match &self.hpa {
                Some(Ok(manifest)) => Ok(manifest.clone()),
                Some(Err(error)) => Err(error()),
                None => Err(ClusterError::NotFound {
                    kind: resource.kind.clone(),
                    name: resource.name.clone(),
                }),
            }
        }

        async fn config_maps_data(
            &self,
            _: ClusterId,
            _: &str,
            _: &[String],
        ) -> std::result::Result<BTreeMap<String, Value>, ClusterError> {
            if self.fail_config_maps {
                return Err(ClusterError::BadRequest {
                    message: "forbidden".to_owned(),
                });
            }
            Ok(self.config_maps.clone())
        }

        async fn secrets_data(
            &self,
            _: ClusterId,
            _: &str,
            names: &[String],
        ) -> std::result::Result<BTreeMap<String, Value>, ClusterError> {
            Ok(names
                .iter()
                .map(|name| (name.clone(), json!({"data": {"password": "c2VjcmV0"}})))
                .collect())
        }

        async fn preferred_version_for_api_group(
            &self,
            _: ClusterId,
            _: &str,
        ) -> std::result::Result<String, ClusterError> {
            Ok("v2".to_owned())
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline {
            id: PipelineId(10),
            app_id: AppId(1),
            app_name: "app".to_owned(),
            environment_id: EnvId(2),
            ci_pipeline_id: CiPipelineId(5),
            name: "cd-app-staging".to_owned(),
            deployment_app_name: "app-staging".to_owned(),
            deployment_app_type: DeploymentAppType::Helm,
        }
    }

    fn environment(is_virtual_environment: bool) -> Environment {
        Environment {
            id: EnvId(2),
            name: "staging".to_owned(),
            cluster_id: ClusterId(1),
            namespace: "staging".to_owned(),
            is_virtual_environment,
        }
    }

    fn hash_paths() -> HashPaths {
        HashPaths {
            config_hash: "internal.containerSpecs.ConfigHash".parse().expect("path is valid"),
            secret_hash: "internal.containerSpecs.SecretHash".parse().expect("path is valid"),
        }
    }

    fn hpa_values() -> Value {
        json!({"replicaCount": 1, "autoscaling": {"enabled": true, "MinReplicas": 2, "MaxReplicas": 10}})
    }

    fn hpa_manifest(current: Value) -> Value {
        json!({"kind": "HorizontalPodAutoscaler", "status": {"currentReplicas": current, "desiredReplicas": 3}})
    }

    async fn adjust(cluster: FakeCluster, values: &mut Value, deployment_type: DeploymentType) -> Result<Arc<FakeCluster>> {
        let cluster = Arc::new(cluster);
        LiveStateAdjuster::new(cluster.clone(), hash_paths())
            .adjust(values, &pipeline(), &environment(false), ExternalResources::default(), deployment_type)
            .await?;
        Ok(cluster)
    }

    #[rstest]
    #[case(json!(7), json!(7))]
    #[case(json!(15), json!(10))]
    #[case(json!(1), json!(2))]
    #[tokio::test]
    async fn pins_replica_count_to_live_hpa(#[case] current: Value, #[case] expected: Value) {
        let mut values = hpa_values();
        let cluster = FakeCluster {
            hpa: Some(Ok(hpa_manifest(current))),
            ..Default::default()
        };

        let cluster = adjust(cluster, &mut values, DeploymentType::Deploy)
            .await
            .expect("hpa is readable");

        assert_eq!(values["replicaCount"], expected);
        assert_eq!(
            *cluster.requested.lock().expect("lock is not poisoned"),
            ["autoscaling/v2/app-staging-hpa"]
        );
    }

    #[rstest]
    #[case::hpa_not_found(None)]
    #[case::not_settled(Some(Ok(json!({"status": {}}))))]
    #[tokio::test]
    async fn missing_live_state_keeps_values(#[case] hpa: Option<std::result::Result<Value, fn() -> ClusterError>>) {
        let mut values = hpa_values();

        adjust(FakeCluster { hpa, ..Default::default() }, &mut values, DeploymentType::Deploy)
            .await
            .expect("missing live state is not an error");

        assert_eq!(values, hpa_values());
    }

    #[rstest]
    #[case(|| ClusterError::BadRequest { message: "bad".to_owned() }, StatusCode::PRECONDITION_FAILED)]
    #[case(|| ClusterError::ServerTimeout { message: "slow".to_owned() }, StatusCode::REQUEST_TIMEOUT)]
    #[case(|| ClusterError::UnknownCluster { cluster_id: ClusterId(1) }, StatusCode::INTERNAL_SERVER_ERROR)]
    #[tokio::test]
    async fn classifies_hpa_failures(#[case] error: fn() -> ClusterError, #[case] expected: StatusCode) {
        let mut values = hpa_values();

        let error = adjust(
            FakeCluster {
                hpa: Some(Err(error)),
                ..Default::default()
            },
            &mut values,
            DeploymentType::Deploy,
        )
        .await
        .err()
        .expect("hpa lookup fails");

        assert_eq!(error.status_code(), expected);
    }

    #[tokio::test]
    async fn stopped_releases_skip_the_hpa() {
        let mut values = hpa_values();
        let cluster = FakeCluster {
            hpa: Some(Ok(hpa_manifest(json!(7)))),
            ..Default::default()
        };

        let cluster = adjust(cluster, &mut values, DeploymentType::Stop)
            .await
            .expect("nothing is fetched");

        assert_eq!(values["replicaCount"], json!(1));
        assert!(cluster.requested.lock().expect("lock is not poisoned").is_empty());
    }

    #[tokio::test]
    async fn virtual_environments_are_left_alone() {
        let mut values = hpa_values();
        let cluster = Arc::new(FakeCluster {
            hpa: Some(Ok(hpa_manifest(json!(7)))),
            ..Default::default()
        });

        LiveStateAdjuster::new(cluster.clone(), hash_paths())
            .adjust(
                &mut values,
                &pipeline(),
                &environment(true),
                ExternalResources::default(),
                DeploymentType::Deploy,
            )
            .await
            .expect("nothing is fetched");

        assert_eq!(values, hpa_values());
    }

    #[tokio::test]
    async fn stamps_external_hashes() {
        let config_map_data = BTreeMap::from([("platform".to_owned(), json!({"data": {"LEVEL": "info"}}))]);
        let cluster = Arc::new(FakeCluster {
            config_maps: config_map_data.clone(),
            ..Default::default()
        });
        let mut values = json!({});

        LiveStateAdjuster::new(cluster, hash_paths())
            .stamp_external_hashes(&mut values, &environment(false), ExternalResources {
                config_maps: &["platform".to_owned()],
                secrets: &["db".to_owned()],
            })
            .await
            .expect("live data is readable");

        let config_hash = hash_live_data(&config_map_data).expect("data is serializable");
        assert_eq!(values["internal"]["containerSpecs"]["ConfigHash"], json!(config_hash));
        assert_eq!(config_hash.len(), 64);
        assert!(values["internal"]["containerSpecs"]["SecretHash"].is_string());
    }

    #[tokio::test]
    async fn hash_failures_do_not_block() {
        let mut values = json!({"replicaCount": 3});
        let cluster = Arc::new(FakeCluster {
            fail_config_maps: true,
            ..Default::default()
        });

        LiveStateAdjuster::new(cluster, hash_paths())
            .adjust(
                &mut values,
                &pipeline(),
                &environment(false),
                ExternalResources {
                    config_maps: &["platform".to_owned()],
                    secrets: &[],
                },
                DeploymentType::Deploy,
            )
            .await
            .expect("hashing is best effort");

        assert_eq!(values, json!({"replicaCount": 3}));
    }
}
