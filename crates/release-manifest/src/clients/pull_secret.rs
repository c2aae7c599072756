use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    clients::{ClientError, ImagePullSecretHandler},
    model::{CiArtifact, CiPipelineId, ClusterId, Environment},
};

/// The values key charts read pull secrets from.
pub const IMAGE_PULL_SECRETS_KEY: &str = "imagePullSecrets";

/// The pull secret of the registry a CI pipeline pushes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryAccess {
    pub secret_name: String,

    /// Clusters the secret is provisioned in, an empty set grants every cluster.
    pub clusters: BTreeSet<ClusterId>,
}

impl RegistryAccess {
    fn is_granted(&self, cluster_id: ClusterId) -> bool {
        self.clusters.is_empty() || self.clusters.contains(&cluster_id)
    }
}

/// Injects the registry pull secret configured for the CI pipeline an
/// artifact was built by.
#[derive(Clone, Debug, Default)]
pub struct RegistryPullSecrets {
    registries: BTreeMap<CiPipelineId, RegistryAccess>,
}

impl RegistryPullSecrets {
    pub fn new(registries: BTreeMap<CiPipelineId, RegistryAccess>) -> Self {
        Self { registries }
    }
}

#[async_trait]
impl ImagePullSecretHandler for RegistryPullSecrets {
    async fn handle_image_pull_secret(
        &self,
        environment: &Environment,
        artifact: &CiArtifact,
        ci_pipeline_id: CiPipelineId,
        mut values: Value,
    ) -> Result<Value, ClientError> {
        let Some(access) = self.registries.get(&ci_pipeline_id) else {
            return Ok(values);
        };

        if !access.is_granted(environment.cluster_id) {
            tracing::debug!(
                cluster.id = %environment.cluster_id,
                artifact.image = %artifact.image,
                "registry pull secret is not provisioned in cluster"
            );
            return Ok(values);
        }

        if let Value::Object(map) = &mut values {
            let entry = json!({ "name": access.secret_name });
            let secrets = map
                .entry(IMAGE_PULL_SECRETS_KEY)
                .or_insert_with(|| Value::Array(Vec::new()));

            match secrets {
                Value::Array(secrets) if !secrets.contains(&entry) => secrets.push(entry),
                Value::Array(_) => {}
                other => *other = Value::Array(vec![entry]),
            }
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::model::{CiArtifactId, EnvId};

    fn environment(cluster_id: i64) -> Environment {
        Environment {
            id: EnvId(2),
            name: "staging".to_owned(),
            cluster_id: ClusterId(cluster_id),
            namespace: "staging".to_owned(),
            is_virtual_environment: false,
        }
    }

    fn artifact() -> CiArtifact {
        CiArtifact {
            id: CiArtifactId(1),
            image: "registry.example.com/app:v1".to_owned(),
            image_digest: String::new(),
            data_source: "CI-RUNNER".to_owned(),
            material_info: None,
        }
    }

    fn handler(clusters: &[i64]) -> RegistryPullSecrets {
        RegistryPullSecrets::new(BTreeMap::from([(
            CiPipelineId(5),
            RegistryAccess {
                secret_name: "registry-credentials".to_owned(),
                clusters: clusters.iter().copied().map(ClusterId).collect(),
            },
        )]))
    }

    #[rstest]
    #[case(&[], json!({"imagePullSecrets": [{"name": "registry-credentials"}]}))]
    #[case(&[1], json!({"imagePullSecrets": [{"name": "registry-credentials"}]}))]
    #[case(&[7], json!({}))]
    #[tokio::test]
    async fn injects_for_granted_clusters(#[case] clusters: &[i64], #[case] expected: Value) {
        let values = handler(clusters)
            .handle_image_pull_secret(&environment(1), &artifact(), CiPipelineId(5), json!({}))
            .await
            .expect("injecting pull secrets never fails");

        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn keeps_existing_secrets_without_duplicates() {
        let existing = json!({"imagePullSecrets": [{"name": "other"}, {"name": "registry-credentials"}]});

        let values = handler(&[])
            .handle_image_pull_secret(&environment(1), &artifact(), CiPipelineId(5), existing.clone())
            .await
            .expect("injecting pull secrets never fails");

        assert_eq!(values, existing);
    }

    #[tokio::test]
    async fn ignores_unknown_ci_pipelines() {
        let values = handler(&[])
            .handle_image_pull_secret(&environment(1), &artifact(), CiPipelineId(6), json!({"a": 1}))
            .await
            .expect("injecting pull secrets never fails");

        assert_eq!(values, json!({"a": 1}));
    }
}
