use std::{collections::BTreeMap, future::Future, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    Api, Client,
    api::{ApiResource, DynamicObject, GroupVersionKind},
};
use serde_json::{Map, Value, json};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::instrument;

use crate::{
    cli::ManifestConfig,
    k8s::{
        ClusterError, KubernetesService, RequestTimeoutSnafu, ResourceIdentifier,
        SerializeObjectSnafu, UnknownClusterSnafu,
    },
    model::ClusterId,
};

/// A [`KubernetesService`] talking to clusters through [`kube`].
///
/// Every request is bounded by the configured timeout.
#[derive(Clone)]
pub struct KubeClusterService {
    clients: BTreeMap<ClusterId, Client>,
    request_timeout: Duration,
}

impl KubeClusterService {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            clients: BTreeMap::new(),
            request_timeout,
        }
    }

    pub fn from_config(config: &ManifestConfig) -> Self {
        Self::new(config.cluster_request_timeout)
    }

    pub fn with_client(mut self, cluster_id: ClusterId, client: Client) -> Self {
        self.clients.insert(cluster_id, client);
        self
    }

    fn client(&self, cluster_id: ClusterId) -> Result<Client, ClusterError> {
        self.clients
            .get(&cluster_id)
            .cloned()
            .context(UnknownClusterSnafu { cluster_id })
    }

    async fn bounded<T>(
        &self,
        request: impl Future<Output = Result<T, kube::Error>>,
        kind: &str,
        name: &str,
    ) -> Result<T, ClusterError> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .context(RequestTimeoutSnafu)?
            .map_err(|error| ClusterError::from_kube(error, kind, name))
    }
}

#[async_trait]
impl KubernetesService for KubeClusterService {
    #[instrument(skip(self), fields(k8s.resource.name = %resource.name, k8s.namespace.name = %resource.namespace))]
    async fn get_resource(
        &self,
        cluster_id: ClusterId,
        resource: &ResourceIdentifier,
    ) -> Result<Value, ClusterError> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client(cluster_id)?, &resource.namespace, &api_resource);

        let object = self
            .bounded(api.get(&resource.name), &resource.kind, &resource.name)
            .await?;

        serde_json::to_value(object).context(SerializeObjectSnafu {
            kind: resource.kind.clone(),
            name: resource.name.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn config_maps_data(
        &self,
        cluster_id: ClusterId,
        namespace: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, Value>, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client(cluster_id)?, namespace);

        let mut data = BTreeMap::new();
        for name in names {
            let config_map = self.bounded(api.get(name), "ConfigMap", name).await?;
            data.insert(
                name.clone(),
                present_fields([
                    ("data", json!(config_map.data)),
                    ("binaryData", json!(config_map.binary_data)),
                ]),
            );
        }
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn secrets_data(
        &self,
        cluster_id: ClusterId,
        namespace: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, Value>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client(cluster_id)?, namespace);

        let mut data = BTreeMap::new();
        for name in names {
            let secret = self.bounded(api.get(name), "Secret", name).await?;
            data.insert(
                name.clone(),
                present_fields([
                    ("data", json!(secret.data)),
                    ("stringData", json!(secret.string_data)),
                ]),
            );
        }
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn preferred_version_for_api_group(
        &self,
        cluster_id: ClusterId,
        group: &str,
    ) -> Result<String, ClusterError> {
        let client = self.client(cluster_id)?;
        let api_group = self
            .bounded(kube::discovery::group(&client, group), "APIGroup", group)
            .await?;

        Ok(api_group.preferred_version_or_latest().to_owned())
    }
}

/// Builds an object of the fields which are set.
fn present_fields<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.to_owned(), value))
            .collect::<Map<_, _>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_clusters_are_rejected() {
        let service = KubeClusterService::new(Duration::from_secs(1));

        let error = service
            .preferred_version_for_api_group(ClusterId(3), "autoscaling")
            .await
            .expect_err("no client is configured");

        assert!(matches!(error, ClusterError::UnknownCluster { cluster_id } if cluster_id == ClusterId(3)));
    }

    #[test]
    fn unset_fields_are_left_out() {
        let value = present_fields([("data", json!({"a": "b"})), ("binaryData", Value::Null)]);

        assert_eq!(value, json!({"data": {"a": "b"}}));
    }
}
