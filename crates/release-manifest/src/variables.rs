//! Resolution of scoped variables referenced by values documents.
//!
//! Documents reference variables as `@{{name}}` inside JSON strings. A
//! string consisting of nothing but one reference is replaced by the typed
//! variable value, e.g. `"@{{replicas}}"` becomes `3`. References embedded in
//! longer strings are substituted textually.

use std::{
    collections::BTreeMap,
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::instrument;

use crate::{
    clients::BoxError,
    model::{AppId, ChartId, ClusterId, ConfigType, EnvConfigOverrideId, EnvId, VariableSnapshot},
};

type Result<T, E = Error> = std::result::Result<T, E>;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@\{\{\s*(?<name>[A-Za-z0-9_.\-]+)\s*\}\}").expect("variable reference regex is valid")
});

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("variable {name:?} is not defined for this scope"))]
    UnknownVariable { name: String },

    #[snafu(display("document is not valid JSON"))]
    InvalidDocument { source: serde_json::Error },

    #[snafu(display("unable to serialize resolved document"))]
    SerializeDocument { source: serde_json::Error },

    #[snafu(display("unable to fetch variables for the scope"))]
    FetchVariables { source: BoxError },

    #[snafu(display("unable to resolve variables of the {data_type} document"))]
    ResolveConfigSecret {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        data_type: ConfigType,
    },
}

impl Error {
    /// Whether the document itself is at fault rather than the variable source.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::UnknownVariable { .. } | Self::InvalidDocument { .. } => true,
            Self::ResolveConfigSecret { source, .. } => source.is_validation(),
            Self::SerializeDocument { .. } | Self::FetchVariables { .. } => false,
        }
    }
}

/// Where a deployment is headed, variable values may differ per scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VariableScope {
    pub app_id: AppId,
    pub env_id: EnvId,
    pub cluster_id: ClusterId,
}

/// The record a resolved document belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableEntity {
    DeploymentTemplateAppLevel(ChartId),
    DeploymentTemplateEnvLevel(EnvConfigOverrideId),
}

/// A document with all references substituted and the values used for it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub resolved: String,
    pub snapshot: VariableSnapshot,
}

/// The config map and secret documents of a trigger.
///
/// Snapshots are set when a deployment is replayed, their values are used
/// instead of the current ones.
#[derive(Clone, Copy, Debug)]
pub struct ConfigSecretDocuments<'a> {
    pub config_maps: &'a str,
    pub config_map_snapshot: Option<&'a VariableSnapshot>,
    pub secrets: &'a str,
    pub secret_snapshot: Option<&'a VariableSnapshot>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedConfigSecret {
    pub config_maps: ResolvedTemplate,
    pub secrets: ResolvedTemplate,
}

#[async_trait]
pub trait ScopedVariableManager: Send + Sync {
    /// Resolves `template` with the current values of `scope`.
    async fn resolve_template(
        &self,
        template: &str,
        scope: &VariableScope,
        entity: VariableEntity,
    ) -> Result<ResolvedTemplate>;

    /// Resolves `template` with the values captured by an earlier deployment.
    async fn resolve_from_snapshot(
        &self,
        template: &str,
        snapshot: &VariableSnapshot,
    ) -> Result<ResolvedTemplate>;

    async fn resolve_cm_cs_trigger(
        &self,
        scope: &VariableScope,
        documents: ConfigSecretDocuments<'_>,
    ) -> Result<ResolvedConfigSecret>;
}

/// Provides the variable values visible in a scope.
#[async_trait]
pub trait VariableSource: Send + Sync {
    async fn variables(&self, scope: &VariableScope) -> Result<BTreeMap<String, Value>, BoxError>;
}

/// A [`VariableSource`] serving the same values to every scope.
#[derive(Clone, Debug, Default)]
pub struct StaticVariables(pub BTreeMap<String, Value>);

#[async_trait]
impl VariableSource for StaticVariables {
    async fn variables(&self, _: &VariableScope) -> Result<BTreeMap<String, Value>, BoxError> {
        Ok(self.0.clone())
    }
}

/// Resolves `@{{name}}` references with values from a [`VariableSource`].
pub struct TemplateVariableResolver {
    source: Arc<dyn VariableSource>,
}

impl TemplateVariableResolver {
    pub fn new(source: Arc<dyn VariableSource>) -> Self {
        Self { source }
    }

    async fn resolve_document(
        &self,
        document: &str,
        scope: &VariableScope,
        snapshot: Option<&VariableSnapshot>,
    ) -> Result<ResolvedTemplate> {
        match snapshot {
            Some(snapshot) => resolve(document, snapshot),
            None => {
                if !REFERENCE.is_match(document) {
                    return Ok(unresolved(document));
                }
                let variables = self.source.variables(scope).await.context(FetchVariablesSnafu)?;
                resolve(document, &variables)
            }
        }
    }
}

#[async_trait]
impl ScopedVariableManager for TemplateVariableResolver {
    #[instrument(skip(self, template))]
    async fn resolve_template(
        &self,
        template: &str,
        scope: &VariableScope,
        entity: VariableEntity,
    ) -> Result<ResolvedTemplate> {
        self.resolve_document(template, scope, None).await
    }

    async fn resolve_from_snapshot(
        &self,
        template: &str,
        snapshot: &VariableSnapshot,
    ) -> Result<ResolvedTemplate> {
        resolve(template, snapshot)
    }

    #[instrument(skip(self, documents))]
    async fn resolve_cm_cs_trigger(
        &self,
        scope: &VariableScope,
        documents: ConfigSecretDocuments<'_>,
    ) -> Result<ResolvedConfigSecret> {
        let config_maps = self
            .resolve_document(documents.config_maps, scope, documents.config_map_snapshot)
            .await
            .context(ResolveConfigSecretSnafu {
                data_type: ConfigType::ConfigMap,
            });
        let secrets = self
            .resolve_document(documents.secrets, scope, documents.secret_snapshot)
            .await
            .context(ResolveConfigSecretSnafu {
                data_type: ConfigType::Secret,
            });

        let (config_maps, secrets) = match (config_maps, secrets) {
            (Ok(config_maps), Ok(secrets)) => (config_maps, secrets),
            (Err(error), Ok(_)) | (Ok(_), Err(error)) => return Err(error),
            (Err(error), Err(secret_error)) => {
                tracing::warn!(
                    error = &secret_error as &dyn std::error::Error,
                    "secrets failed to resolve as well"
                );
                return Err(error);
            }
        };

        Ok(ResolvedConfigSecret {
            config_maps,
            secrets,
        })
    }
}

fn unresolved(document: &str) -> ResolvedTemplate {
    ResolvedTemplate {
        resolved: document.to_owned(),
        snapshot: VariableSnapshot::new(),
    }
}

/// Substitutes every reference in `document` with a value of `variables`.
pub fn resolve(document: &str, variables: &BTreeMap<String, Value>) -> Result<ResolvedTemplate> {
    if document.trim().is_empty() || !REFERENCE.is_match(document) {
        return Ok(unresolved(document));
    }

    let mut value: Value = serde_json::from_str(document).context(InvalidDocumentSnafu)?;
    let mut snapshot = VariableSnapshot::new();
    substitute(&mut value, variables, &mut snapshot)?;

    Ok(ResolvedTemplate {
        resolved: serde_json::to_string(&value).context(SerializeDocumentSnafu)?,
        snapshot,
    })
}

fn substitute(
    value: &mut Value,
    variables: &BTreeMap<String, Value>,
    snapshot: &mut VariableSnapshot,
) -> Result<()> {
    match value {
        Value::Array(items) => items
            .iter_mut()
            .try_for_each(|item| substitute(item, variables, snapshot)),
        Value::Object(map) => map
            .values_mut()
            .try_for_each(|item| substitute(item, variables, snapshot)),
        Value::String(text) => {
            if let Some(replacement) = substitute_text(text, variables, snapshot)? {
                *value = replacement;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn lookup<'a>(
    name: &str,
    variables: &'a BTreeMap<String, Value>,
    snapshot: &mut VariableSnapshot,
) -> Result<&'a Value> {
    let value = variables
        .get(name)
        .context(UnknownVariableSnafu { name })?;
    snapshot.insert(name.to_owned(), value.clone());
    Ok(value)
}

fn substitute_text(
    text: &str,
    variables: &BTreeMap<String, Value>,
    snapshot: &mut VariableSnapshot,
) -> Result<Option<Value>> {
    let mut references = REFERENCE.captures_iter(text).peekable();
    if references.peek().is_none() {
        return Ok(None);
    }

    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for captures in references {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let value = lookup(&captures["name"], variables, snapshot)?;

        if whole.start() == 0 && whole.end() == text.len() {
            return Ok(Some(value.clone()));
        }

        rendered.push_str(&text[last..whole.start()]);
        match value {
            Value::String(inner) => rendered.push_str(inner),
            other => rendered.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    rendered.push_str(&text[last..]);

    Ok(Some(Value::String(rendered)))
}
