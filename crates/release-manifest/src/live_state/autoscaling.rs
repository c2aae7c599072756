//! Keeps releases from resetting the replica count an autoscaler settled on.

use serde_json::{Number, Value};
use snafu::{OptionExt as _, ResultExt as _};

use crate::{
    json_path::JsonPath,
    live_state::{
        InvalidCustomPathSnafu, InvalidNumberSnafu, MissingBoundSnafu, MissingCustomValueSnafu,
        Result, SetValueSnafu,
    },
    model::DeploymentType,
};

pub const AUTOSCALING_GROUP: &str = "autoscaling";
pub const HPA_KIND: &str = "HorizontalPodAutoscaler";
pub const REPLICA_COUNT_KEY: &str = "replicaCount";

pub const CUSTOM_AUTOSCALING_ENABLED_PATH: &str = "CUSTOM_AUTOSCALING_ENABLED_PATH";
pub const CUSTOM_AUTOSCALING_REPLICA_COUNT_PATH: &str = "CUSTOM_AUTOSCALING_REPLICA_COUNT_PATH";
pub const CUSTOM_AUTOSCALING_MIN_PATH: &str = "CUSTOM_AUTOSCALING_MIN_PATH";
pub const CUSTOM_AUTOSCALING_MAX_PATH: &str = "CUSTOM_AUTOSCALING_MAX_PATH";

/// The autoscaler a release manages and the replica bounds it is configured with.
#[derive(Clone, Debug, PartialEq)]
pub struct HpaResourceRequest {
    pub resource_name: String,
    pub group: &'static str,
    pub kind: &'static str,
    pub min_replicas: f64,
    pub max_replicas: f64,
}

/// Derives the autoscaler of a release from its values, [`None`] if
/// autoscaling is disabled.
///
/// KEDA autoscaling takes precedence over plain HPA autoscaling.
pub fn hpa_resource_request(values: &Value, release_name: &str) -> Result<Option<HpaResourceRequest>> {
    let non_empty = |key: &str| {
        values
            .get(key)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
    };
    let release_name = match (non_empty("fullnameOverride"), non_empty("nameOverride")) {
        (Some(fullname), _) => fullname.to_owned(),
        (None, Some(name)) => format!("{release_name}-{name}"),
        (None, None) => release_name.to_owned(),
    };

    let enabled = |key: &str| {
        values
            .get(key)
            .and_then(|section| section.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or_default()
    };

    let (section, resource_name, min_key, max_key) = if enabled("kedaAutoscaling") {
        (
            "kedaAutoscaling",
            format!("keda-hpa-{release_name}-keda"),
            "minReplicaCount",
            "maxReplicaCount",
        )
    } else if enabled(AUTOSCALING_GROUP) {
        (AUTOSCALING_GROUP, format!("{release_name}-hpa"), "MinReplicas", "MaxReplicas")
    } else {
        return Ok(None);
    };

    let bound = |key: &str| {
        values[section]
            .get(key)
            .and_then(number)
            .context(MissingBoundSnafu {
                key: format!("{section}.{key}"),
            })
    };

    Ok(Some(HpaResourceRequest {
        resource_name,
        group: AUTOSCALING_GROUP,
        kind: HPA_KIND,
        min_replicas: bound(min_key)?,
        max_replicas: bound(max_key)?,
    }))
}

/// Clamps `current` into `[min, max]`.
///
/// The maximum is checked first, so an inverted range yields `max`.
pub fn required_replica_count(current: f64, max: f64, min: f64) -> f64 {
    if current > max {
        max
    } else if current < min {
        min
    } else {
        current
    }
}

/// Reads a number, accepting numeric strings.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Writes whole numbers as integers, charts compare replica counts as such.
pub(crate) fn replica_value(count: f64) -> Value {
    if count.fract() == 0.0 && count.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(count as i64))
    } else {
        Number::from_f64(count).map_or(Value::Null, Value::Number)
    }
}

fn custom_path(values: &Value, key: &'static str) -> Result<JsonPath> {
    let raw = values
        .get(key)
        .and_then(Value::as_str)
        .context(MissingCustomValueSnafu { key })?;
    raw.parse().context(InvalidCustomPathSnafu { key })
}

fn custom_number(values: &Value, key: &'static str) -> Result<f64> {
    let path = custom_path(values, key)?;
    let value = path.get(values).context(MissingCustomValueSnafu { key })?;
    number(value).context(InvalidNumberSnafu {
        key,
        value: value.to_string(),
    })
}

fn set_custom(values: &mut Value, key: &'static str, value: Value) -> Result<()> {
    let path = custom_path(values, key)?;
    path.set(values, value).context(SetValueSnafu {
        path: path.to_string(),
    })
}

/// Applies the autoscaling rules of charts declaring their autoscaling keys
/// through the `CUSTOM_AUTOSCALING_*_PATH` values.
///
/// Stopping a release disables autoscaling and scales to zero. Otherwise an
/// enabled autoscaler keeps the replica count within its bounds.
pub fn apply_custom_chart_autoscaling(values: &mut Value, deployment_type: DeploymentType) -> Result<()> {
    if values.get(CUSTOM_AUTOSCALING_ENABLED_PATH).is_none() {
        return Ok(());
    }

    if deployment_type == DeploymentType::Stop {
        set_custom(values, CUSTOM_AUTOSCALING_ENABLED_PATH, Value::Bool(false))?;
        for key in [
            CUSTOM_AUTOSCALING_REPLICA_COUNT_PATH,
            CUSTOM_AUTOSCALING_MIN_PATH,
            CUSTOM_AUTOSCALING_MAX_PATH,
        ] {
            set_custom(values, key, replica_value(0.0))?;
        }
        return Ok(());
    }

    let enabled = custom_path(values, CUSTOM_AUTOSCALING_ENABLED_PATH)?
        .get_bool(values)
        .unwrap_or_default();
    if !enabled {
        return Ok(());
    }

    let min = custom_number(values, CUSTOM_AUTOSCALING_MIN_PATH)?;
    let max = custom_number(values, CUSTOM_AUTOSCALING_MAX_PATH)?;
    let replica_count = custom_number(values, CUSTOM_AUTOSCALING_REPLICA_COUNT_PATH)?;

    set_custom(
        values,
        CUSTOM_AUTOSCALING_REPLICA_COUNT_PATH,
        replica_value(required_replica_count(replica_count, max, min)),
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::live_state::Error;

    #[rstest]
    #[case(7.0, 10.0, 2.0, 7.0)]
    #[case(15.0, 10.0, 2.0, 10.0)]
    #[case(1.0, 10.0, 2.0, 2.0)]
    #[case(10.0, 10.0, 2.0, 10.0)]
    #[case(5.0, 1.0, 3.0, 1.0)]
    fn clamps_replica_count(#[case] current: f64, #[case] max: f64, #[case] min: f64, #[case] expected: f64) {
        assert_eq!(required_replica_count(current, max, min), expected);
    }

    #[rstest]
    #[case(json!({"autoscaling": {"enabled": true, "MinReplicas": 2, "MaxReplicas": 10}}), "app-staging-hpa")]
    #[case(
        json!({"nameOverride": "web", "autoscaling": {"enabled": true, "MinReplicas": 2, "MaxReplicas": 10}}),
        "app-staging-web-hpa"
    )]
    #[case(
        json!({"fullnameOverride": "shop", "nameOverride": "web", "autoscaling": {"enabled": true, "MinReplicas": 2, "MaxReplicas": 10}}),
        "shop-hpa"
    )]
    #[case(
        json!({
            "kedaAutoscaling": {"enabled": true, "minReplicaCount": 2, "maxReplicaCount": 10},
            "autoscaling": {"enabled": true, "MinReplicas": 1, "MaxReplicas": 3}
        }),
        "keda-hpa-app-staging-keda"
    )]
    fn derives_hpa_resource(#[case] values: Value, #[case] expected_name: &str) {
        let request = hpa_resource_request(&values, "app-staging")
            .expect("bounds are present")
            .expect("autoscaling is enabled");

        assert_eq!(request.resource_name, expected_name);
        assert_eq!(request.group, "autoscaling");
        assert_eq!(request.kind, "HorizontalPodAutoscaler");
        assert_eq!((request.min_replicas, request.max_replicas), (2.0, 10.0));
    }

    #[rstest]
    #[case(json!({}))]
    #[case(json!({"autoscaling": {"enabled": false, "MinReplicas": 2}}))]
    #[case(json!({"kedaAutoscaling": {"enabled": false}}))]
    fn disabled_autoscaling_has_no_hpa(#[case] values: Value) {
        assert_eq!(hpa_resource_request(&values, "app").ok(), Some(None));
    }

    #[test]
    fn missing_bounds_are_reported() {
        let values = json!({"autoscaling": {"enabled": true, "MinReplicas": 2}});

        let error = hpa_resource_request(&values, "app").expect_err("max is missing");

        assert!(matches!(error, Error::MissingBound { key } if key == "autoscaling.MaxReplicas"));
    }

    fn custom_chart(enabled: bool, replicas: Value) -> Value {
        json!({
            "CUSTOM_AUTOSCALING_ENABLED_PATH": "scaling.enabled",
            "CUSTOM_AUTOSCALING_REPLICA_COUNT_PATH": "replicas",
            "CUSTOM_AUTOSCALING_MIN_PATH": "scaling.min",
            "CUSTOM_AUTOSCALING_MAX_PATH": "scaling.max",
            "replicas": replicas,
            "scaling": {"enabled": enabled, "min": 2, "max": 10}
        })
    }

    #[test]
    fn stop_scales_custom_charts_to_zero() {
        let mut values = custom_chart(true, json!(5));

        apply_custom_chart_autoscaling(&mut values, DeploymentType::Stop).expect("all keys are declared");

        assert_eq!(values["replicas"], json!(0));
        assert_eq!(values["scaling"], json!({"enabled": false, "min": 0, "max": 0}));
    }

    #[rstest]
    #[case(true, json!(15), json!(10))]
    #[case(true, json!("1"), json!(2))]
    #[case(true, json!(7), json!(7))]
    #[case(false, json!(15), json!(15))]
    fn clamps_custom_chart_replicas(#[case] enabled: bool, #[case] replicas: Value, #[case] expected: Value) {
        let mut values = custom_chart(enabled, replicas);

        apply_custom_chart_autoscaling(&mut values, DeploymentType::Deploy).expect("all keys are declared");

        assert_eq!(values["replicas"], expected);
    }

    #[test]
    fn missing_custom_keys_are_precondition_failures() {
        let mut values = custom_chart(true, json!(5));
        values
            .as_object_mut()
            .expect("values are an object")
            .remove(CUSTOM_AUTOSCALING_MAX_PATH);

        let error = apply_custom_chart_autoscaling(&mut values, DeploymentType::Deploy)
            .expect_err("max path is not declared");

        assert_eq!(error.to_string(), "empty value for key [CUSTOM_AUTOSCALING_MAX_PATH]");
        assert_eq!(error.status_code(), http::StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn charts_without_custom_keys_are_untouched() {
        let mut values = json!({"replicaCount": 3});

        apply_custom_chart_autoscaling(&mut values, DeploymentType::Stop).expect("nothing to do");

        assert_eq!(values, json!({"replicaCount": 3}));
    }
}
