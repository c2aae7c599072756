//! Renders the per-release values fragment from a chart's image descriptor
//! template.
//!
//! Templates reference the release attributes with placeholders such as
//! `{{.Name}}` or `{{ .ReleaseVersion }}`:
//!
//! ```json
//! {"image": {"repository": "{{.Name}}", "tag": "{{.Tag}}"}, "releaseVersion": "{{.ReleaseVersion}}"}
//! ```

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use snafu::{ResultExt as _, Snafu};
use tracing::instrument;

use crate::{
    clients::{ClientError, ImageDigestPolicyService},
    merge::{self, MergeStep},
    model::{AppId, CiArtifact, DeploymentStrategy, EnvId, Pipeline, PipelineId},
};

type Result<T, E = Error> = std::result::Result<T, E>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.(?<name>[A-Za-z]+)\s*\}\}").expect("placeholder regex is valid")
});

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to look up the image digest policy of pipeline {pipeline_id}"))]
    DigestPolicy {
        source: ClientError,
        pipeline_id: PipelineId,
    },

    #[snafu(display("unknown placeholder {placeholder:?} in image descriptor template"))]
    UnknownPlaceholder { placeholder: String },

    #[snafu(display("unterminated placeholder in image descriptor template"))]
    UnterminatedPlaceholder,

    #[snafu(display("rendered image descriptor template is not valid JSON"))]
    InvalidRenderedTemplate { source: serde_json::Error },

    #[snafu(display("unable to merge the release fragment over the additional override"))]
    MergeAdditionalOverride { source: merge::Error },
}

impl Error {
    /// Whether the error was caused by the template or user input rather than
    /// by a failing dependency.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::DigestPolicy { .. })
    }
}

/// Splits an image reference into its name and tag at the last `:`.
///
/// Registry ports are kept in the name. An image without any `:` is taken
/// as a bare tag with an empty name.
pub fn split_image(image: &str) -> (&str, &str) {
    image.rsplit_once(':').unwrap_or(("", image))
}

/// The attributes a template can reference.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseAttributes<'a> {
    pub name: &'a str,
    pub tag: String,
    pub pipeline_name: &'a str,
    pub release_version: i64,
    pub deployment_type: Option<DeploymentStrategy>,
    pub app: AppId,
    pub env: EnvId,
    pub app_metrics: bool,
}

impl ReleaseAttributes<'_> {
    fn lookup(&self, placeholder: &str) -> Option<String> {
        let value = match placeholder {
            "Name" => self.name.to_owned(),
            "Tag" => self.tag.clone(),
            "PipelineName" => self.pipeline_name.to_owned(),
            "ReleaseVersion" => self.release_version.to_string(),
            "DeploymentType" => self
                .deployment_type
                .map(|strategy| strategy.to_string())
                .unwrap_or_default(),
            "App" => self.app.to_string(),
            "Env" => self.env.to_string(),
            "AppMetrics" => self.app_metrics.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// Substitutes every placeholder of `template`.
///
/// Only the template text itself is checked for leftover `{{`, substituted
/// values may contain braces.
pub fn render_template(template: &str, attributes: &ReleaseAttributes<'_>) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for captures in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let placeholder = &captures["name"];
        let value = attributes
            .lookup(placeholder)
            .ok_or_else(|| UnknownPlaceholderSnafu { placeholder }.build())?;

        push_literal(&mut rendered, &template[last..whole.start()])?;
        rendered.push_str(&value);
        last = whole.end();
    }
    push_literal(&mut rendered, &template[last..])?;

    Ok(rendered)
}

fn push_literal(rendered: &mut String, literal: &str) -> Result<()> {
    if literal.contains("{{") {
        return UnterminatedPlaceholderSnafu.fail();
    }
    rendered.push_str(literal);
    Ok(())
}

/// Everything a release fragment is rendered from.
#[derive(Clone, Copy, Debug)]
pub struct ReleaseOverrideInput<'a> {
    pub artifact: &'a CiArtifact,
    pub pipeline: &'a Pipeline,
    pub env_id: EnvId,
    pub strategy: Option<DeploymentStrategy>,
    pub release_counter: i64,
    pub app_metrics: bool,
    pub template: &'a str,
    pub additional_override: Option<&'a str>,
}

pub struct ReleaseOverrideRenderer {
    digest_policy: Arc<dyn ImageDigestPolicyService>,
}

impl ReleaseOverrideRenderer {
    pub fn new(digest_policy: Arc<dyn ImageDigestPolicyService>) -> Self {
        Self { digest_policy }
    }

    /// Renders the release fragment.
    ///
    /// The rendered fragment is merged over the additional override, keys of
    /// the release (image, tag, ...) can't be replaced by user input.
    #[instrument(skip_all, fields(pipeline.id = %input.pipeline.id, release.counter = input.release_counter))]
    pub async fn render(&self, input: &ReleaseOverrideInput<'_>) -> Result<String> {
        let (name, tag) = split_image(&input.artifact.image);

        let policy = self
            .digest_policy
            .digest_policy(input.pipeline.id)
            .await
            .context(DigestPolicySnafu {
                pipeline_id: input.pipeline.id,
            })?;

        // Pinned even when the artifact has no digest
        let tag = if policy.use_digest_for_trigger() {
            format!("{tag}@{digest}", digest = input.artifact.image_digest)
        } else {
            tag.to_owned()
        };

        let attributes = ReleaseAttributes {
            name,
            tag,
            pipeline_name: &input.pipeline.name,
            release_version: input.release_counter,
            deployment_type: input.strategy,
            app: input.pipeline.app_id,
            env: input.env_id,
            app_metrics: input.app_metrics,
        };

        let rendered = render_template(input.template, &attributes)?;
        // Reject fragments the merge engine would only fail on later
        let _: Value = serde_json::from_str(&rendered).context(InvalidRenderedTemplateSnafu)?;

        match input
            .additional_override
            .filter(|additional| !additional.trim().is_empty())
        {
            Some(additional) => merge::merge_documents(additional, &rendered, MergeStep::AdditionalOverride)
                .context(MergeAdditionalOverrideSnafu),
            None => Ok(rendered),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        clients::DigestPolicy,
        model::{CiArtifactId, CiPipelineId, DeploymentAppType},
    };

    const TEMPLATE: &str = r#"{"image": {"repository": "{{.Name}}", "tag": "{{ .Tag }}"}, "pipelineName": "{{.PipelineName}}", "releaseVersion": "{{.ReleaseVersion}}", "deploymentType": "{{.DeploymentType}}", "app": "{{.App}}", "env": "{{.Env}}", "appMetrics": {{.AppMetrics}}}"#;

    struct FixedPolicy(Option<DigestPolicy>);

    #[async_trait]
    impl ImageDigestPolicyService for FixedPolicy {
        async fn digest_policy(&self, _: PipelineId) -> Result<DigestPolicy, ClientError> {
            self.0.ok_or_else(|| ClientError::Request {
                service: "digest policy",
                source: "unavailable".into(),
            })
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

    fn artifact(image: &str) -> CiArtifact {
        CiArtifact {
            id: CiArtifactId(7),
            image: image.to_owned(),
            image_digest: "sha256:deadbeef".to_owned(),
            data_source: "CI-RUNNER".to_owned(),
            material_info: None,
        }
    }

    async fn render(
        policy: DigestPolicy,
        image: &str,
        additional_override: Option<&str>,
    ) -> Result<Value> {
        let pipeline = pipeline();
        let artifact = artifact(image);
        let rendered = ReleaseOverrideRenderer::new(Arc::new(FixedPolicy(Some(policy))))
            .render(&ReleaseOverrideInput {
                artifact: &artifact,
                pipeline: &pipeline,
                env_id: EnvId(2),
                strategy: Some(DeploymentStrategy::Rolling),
                release_counter: 4,
                app_metrics: true,
                template: TEMPLATE,
                additional_override,
            })
            .await?;
        Ok(serde_json::from_str(&rendered).expect("renderer returns JSON"))
    }

    #[rstest]
    #[case("registry/repo:abc123", ("registry/repo", "abc123"))]
    #[case("registry:5000/repo:abc123", ("registry:5000/repo", "abc123"))]
    #[case("repo", ("", "repo"))]
    fn splits_images(#[case] image: &str, #[case] expected: (&str, &str)) {
        assert_eq!(split_image(image), expected);
    }

    #[tokio::test]
    async fn renders_all_attributes() {
        let rendered = render(DigestPolicy::default(), "registry/repo:abc123", None)
            .await
            .expect("template is valid");

        assert_eq!(
            rendered,
            json!({
                "image": {"repository": "registry/repo", "tag": "abc123"},
                "pipelineName": "cd-app-staging",
                "releaseVersion": "4",
                "deploymentType": "ROLLING",
                "app": "1",
                "env": "2",
                "appMetrics": true
            })
        );
    }

    #[rstest]
    #[case(DigestPolicy { digest_configured_for_pipeline: true, digest_configured_for_env_or_cluster: false })]
    #[case(DigestPolicy { digest_configured_for_pipeline: false, digest_configured_for_env_or_cluster: true })]
    #[tokio::test]
    async fn pins_digest_when_policy_applies(#[case] policy: DigestPolicy) {
        let rendered = render(policy, "registry/repo:abc123", None)
            .await
            .expect("template is valid");

        assert_eq!(rendered["image"]["tag"], json!("abc123@sha256:deadbeef"));
    }

    #[tokio::test]
    async fn pins_empty_digest_when_policy_applies() {
        let pipeline = pipeline();
        let artifact = CiArtifact {
            image_digest: String::new(),
            ..artifact("registry/repo:abc123")
        };
        let policy = DigestPolicy {
            digest_configured_for_pipeline: true,
            digest_configured_for_env_or_cluster: false,
        };
        let rendered = ReleaseOverrideRenderer::new(Arc::new(FixedPolicy(Some(policy))))
            .render(&ReleaseOverrideInput {
                artifact: &artifact,
                pipeline: &pipeline,
                env_id: EnvId(2),
                strategy: None,
                release_counter: 1,
                app_metrics: false,
                template: TEMPLATE,
                additional_override: None,
            })
            .await
            .expect("template is valid");
        let rendered: Value = serde_json::from_str(&rendered).expect("renderer returns JSON");

        assert_eq!(rendered["image"]["tag"], json!("abc123@"));
    }

    #[tokio::test]
    async fn bare_images_render_as_tag() {
        let rendered = render(DigestPolicy::default(), "latest", None)
            .await
            .expect("template is valid");

        assert_eq!(rendered["image"], json!({"repository": "", "tag": "latest"}));
    }

    #[tokio::test]
    async fn values_may_contain_braces() {
        let pipeline = Pipeline {
            name: "cd-{{staging}}".to_owned(),
            ..pipeline()
        };
        let artifact = artifact("registry/repo:abc123");
        let rendered = ReleaseOverrideRenderer::new(Arc::new(FixedPolicy(Some(DigestPolicy::default()))))
            .render(&ReleaseOverrideInput {
                artifact: &artifact,
                pipeline: &pipeline,
                env_id: EnvId(2),
                strategy: None,
                release_counter: 1,
                app_metrics: false,
                template: TEMPLATE,
                additional_override: None,
            })
            .await
            .expect("braces in values are kept");
        let rendered: Value = serde_json::from_str(&rendered).expect("renderer returns JSON");

        assert_eq!(rendered["pipelineName"], json!("cd-{{staging}}"));
    }

    #[tokio::test]
    async fn release_keys_win_over_additional_override() {
        let rendered = render(
            DigestPolicy::default(),
            "registry/repo:abc123",
            Some(r#"{"image": {"tag": "user-tag", "pullPolicy": "Always"}, "extra": 1}"#),
        )
        .await
        .expect("template is valid");

        assert_eq!(
            rendered["image"],
            json!({"repository": "registry/repo", "tag": "abc123", "pullPolicy": "Always"})
        );
        assert_eq!(rendered["extra"], json!(1));
    }

    #[rstest]
    #[case(r#"{"image": "{{.Unknown}}"}"#)]
    #[case(r#"{"image": "{{.Name"}"#)]
    #[case(r#"{"image": {{.Name}}}"#)]
    #[tokio::test]
    async fn malformed_templates_are_validation_errors(#[case] template: &str) {
        let pipeline = pipeline();
        let artifact = artifact("registry/repo:abc123");
        let error = ReleaseOverrideRenderer::new(Arc::new(FixedPolicy(Some(DigestPolicy::default()))))
            .render(&ReleaseOverrideInput {
                artifact: &artifact,
                pipeline: &pipeline,
                env_id: EnvId(2),
                strategy: None,
                release_counter: 1,
                app_metrics: false,
                template,
                additional_override: None,
            })
            .await
            .expect_err("template is malformed");

        assert!(error.is_validation());
    }

    #[tokio::test]
    async fn digest_policy_failure_aborts() {
        let pipeline = pipeline();
        let artifact = artifact("registry/repo:abc123");
        let error = ReleaseOverrideRenderer::new(Arc::new(FixedPolicy(None)))
            .render(&ReleaseOverrideInput {
                artifact: &artifact,
                pipeline: &pipeline,
                env_id: EnvId(2),
                strategy: None,
                release_counter: 1,
                app_metrics: false,
                template: TEMPLATE,
                additional_override: None,
            })
            .await
            .expect_err("policy lookup fails");

        assert!(matches!(error, Error::DigestPolicy { .. }));
        assert!(!error.is_validation());
    }
}
