use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AppId, ConfigMapRecordId, EnvId};

/// The `externalType` of secrets which are plain Kubernetes secrets.
pub const KUBERNETES_SECRET_EXTERNAL_TYPE: &str = "KubernetesSecret";

/// A single config map or secret entry.
///
/// Opaque payloads (`data`, `secretData`, ...) are carried through verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSecretMap {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub external: bool,

    #[serde(default)]
    pub mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eso_secret_data: Option<Value>,

    #[serde(default)]
    pub external_type: String,

    #[serde(rename = "roleARN", default)]
    pub role_arn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_data: Option<Value>,

    #[serde(default)]
    pub sub_path: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eso_sub_path: Option<Vec<String>>,

    #[serde(default)]
    pub file_permission: String,
}

impl ConfigSecretMap {
    /// Whether an external secret is a plain Kubernetes secret, as opposed to
    /// one synced by an external secrets operator.
    pub fn is_native_kubernetes_secret(&self) -> bool {
        self.external_type.is_empty() || self.external_type == KUBERNETES_SECRET_EXTERNAL_TYPE
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapJson {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub maps: Vec<ConfigSecretMap>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSecretJson {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub secrets: Vec<ConfigSecretMap>,
}

/// The form config maps are merged into chart values with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapRootJson {
    #[serde(rename = "ConfigMaps")]
    pub config_maps: ConfigMapJson,
}

/// The form secrets are merged into chart values with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSecretRootJson {
    #[serde(rename = "ConfigSecrets")]
    pub config_secrets: ConfigSecretJson,
}

/// Config maps and secrets saved for an app (`environment_id == None`) or
/// for one of its environments.
///
/// Both documents are serialized [`ConfigMapJson`] and [`ConfigSecretJson`]
/// respectively, and may be empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRecord {
    pub id: ConfigMapRecordId,
    pub app_id: AppId,
    pub environment_id: Option<EnvId>,
    pub config_map_data: String,
    pub secret_data: String,
}
