//! Read access to the live state of target clusters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use snafu::Snafu;

use crate::model::ClusterId;

mod client;

pub use client::*;

/// Identifies a namespaced object by its group, version and kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentifier {
    pub name: String,
    pub namespace: String,
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Snafu)]
pub enum ClusterError {
    #[snafu(display("no client is configured for cluster {cluster_id}"))]
    UnknownCluster { cluster_id: ClusterId },

    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: String, name: String },

    #[snafu(display("cluster rejected the request: {message}"))]
    BadRequest { message: String },

    #[snafu(display("cluster did not answer in time"))]
    RequestTimeout { source: tokio::time::error::Elapsed },

    #[snafu(display("cluster could not serve the request in time: {message}"))]
    ServerTimeout { message: String },

    #[snafu(display("cluster request failed"))]
    Request { source: kube::Error },

    #[snafu(display("unable to convert {kind} {name:?} into JSON"))]
    SerializeObject {
        source: serde_json::Error,
        kind: String,
        name: String,
    },
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. } | Self::ServerTimeout { .. })
    }

    /// Classifies an API error by status, keeping the reason for everything
    /// unexpected.
    pub fn from_kube(error: kube::Error, kind: &str, name: &str) -> Self {
        if let kube::Error::Api(response) = &error {
            match (response.code, response.reason.as_str()) {
                (404, _) | (_, "NotFound") => {
                    return Self::NotFound {
                        kind: kind.to_owned(),
                        name: name.to_owned(),
                    };
                }
                (400, _) | (_, "BadRequest") => {
                    return Self::BadRequest {
                        message: response.message.clone(),
                    };
                }
                (504, _) | (_, "Timeout" | "ServerTimeout") => {
                    return Self::ServerTimeout {
                        message: response.message.clone(),
                    };
                }
                _ => {}
            }
        }
        Self::Request { source: error }
    }
}

#[async_trait]
pub trait KubernetesService: Send + Sync {
    /// Fetches an object as JSON.
    async fn get_resource(
        &self,
        cluster_id: ClusterId,
        resource: &ResourceIdentifier,
    ) -> Result<Value, ClusterError>;

    /// Fetches `data` and `binaryData` of the named config maps, keyed by name.
    async fn config_maps_data(
        &self,
        cluster_id: ClusterId,
        namespace: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, Value>, ClusterError>;

    /// Fetches `data` and `stringData` of the named secrets, keyed by name.
    async fn secrets_data(
        &self,
        cluster_id: ClusterId,
        namespace: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, Value>, ClusterError>;

    /// The version of an API group preferred by the cluster.
    async fn preferred_version_for_api_group(
        &self,
        cluster_id: ClusterId,
        group: &str,
    ) -> Result<String, ClusterError>;
}
