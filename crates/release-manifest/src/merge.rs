//! Layers the documents making up the values of a release.
//!
//! Every layer is applied as a JSON Merge Patch ([RFC 7396][1]) onto the
//! result of the previous ones, so later layers win on conflicting keys and
//! `null` removes a key. The layers are, in order:
//!
//! 1. the chart values of the environment ([`MergeStep::ChartValues`])
//! 2. the strategy configuration ([`MergeStep::StrategyConfig`])
//! 3. the rendered release fragment ([`MergeStep::ReleaseOverride`])
//! 4. config maps and secrets ([`MergeStep::ConfigSecret`])
//! 5. app labels ([`MergeStep::AppLabels`])
//!
//! [1]: https://www.rfc-editor.org/rfc/rfc7396

use serde_json::{Map, Value};
use snafu::{ResultExt as _, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the {step} document is not valid JSON"))]
    InvalidDocument {
        source: serde_json::Error,
        step: MergeStep,
    },

    #[snafu(display("unable to serialize merged values"))]
    SerializeValues { source: serde_json::Error },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum MergeStep {
    ChartValues,
    StrategyConfig,
    ReleaseOverride,
    ConfigSecret,
    AppLabels,
    AdditionalOverride,
}

/// The documents merged into the values of one release.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeInputs<'a> {
    pub chart_values: &'a str,
    pub strategy_config: Option<&'a str>,
    pub release_override: &'a str,
    pub config_secret: Option<&'a str>,
    pub app_labels: Option<&'a str>,
}

/// Merges all layers onto an empty object.
///
/// Blank optional documents are skipped.
pub fn merge_override_values(inputs: &MergeInputs<'_>) -> Result<Value> {
    let MergeInputs {
        chart_values,
        strategy_config,
        release_override,
        config_secret,
        app_labels,
    } = *inputs;

    let layers = [
        (MergeStep::ChartValues, Some(chart_values)),
        (MergeStep::StrategyConfig, strategy_config),
        (MergeStep::ReleaseOverride, Some(release_override)),
        (MergeStep::ConfigSecret, config_secret),
        (MergeStep::AppLabels, app_labels),
    ];

    let mut merged = Value::Object(Map::new());
    for (step, document) in layers {
        let Some(document) = document.filter(|document| !document.trim().is_empty()) else {
            continue;
        };
        merge_document(&mut merged, document, step)?;
    }

    Ok(merged)
}

/// Applies `patch` onto `target`.
pub fn merge_document(target: &mut Value, patch: &str, step: MergeStep) -> Result<()> {
    let patch: Value = serde_json::from_str(patch).context(InvalidDocumentSnafu { step })?;
    json_patch::merge(target, &patch);
    Ok(())
}

/// Parses `base`, applies `patch` onto it and serializes the result.
pub fn merge_documents(base: &str, patch: &str, step: MergeStep) -> Result<String> {
    let mut merged: Value = serde_json::from_str(base).context(InvalidDocumentSnafu { step })?;
    merge_document(&mut merged, patch, step)?;
    serde_json::to_string(&merged).context(SerializeValuesSnafu)
}
