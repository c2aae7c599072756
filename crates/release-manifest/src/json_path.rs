//! Typed access to values addressed by dotted paths inside JSON documents.
//!
//! Paths use the notation chart authors write into values files, e.g.
//! `autoscaling.MaxReplicas` or `containers.0.image`. A literal dot inside a
//! key is escaped as `\.`.

use std::{fmt::Display, str::FromStr};

use serde_json::{Map, Value};
use snafu::{OptionExt as _, Snafu, ensure};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("path {path:?} contains an empty segment"))]
    EmptySegment { path: String },

    #[snafu(display("cannot descend into {segment:?} of path {path:?}, it is neither an object nor an array"))]
    NotAContainer { path: String, segment: String },

    #[snafu(display("index {segment:?} of path {path:?} is out of bounds"))]
    IndexOutOfBounds { path: String, segment: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<String>,
}

impl FromStr for JsonPath {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                },
                '.' => segments.push(std::mem::take(&mut current)),
                c => current.push(c),
            }
        }
        segments.push(current);

        ensure!(
            segments.iter().all(|segment| !segment.is_empty()),
            EmptySegmentSnafu { path: raw }
        );

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }
}

impl Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl JsonPath {
    /// Returns the value at this path, [`None`] if any segment is missing.
    pub fn get<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |value, segment| match value {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
                _ => None,
            })
    }

    /// Returns the boolean at this path, [`None`] if it is missing or not a boolean.
    pub fn get_bool(&self, document: &Value) -> Option<bool> {
        self.get(document).and_then(Value::as_bool)
    }

    /// Returns the number at this path.
    ///
    /// Numeric strings are accepted as well, values files frequently quote
    /// replica counts.
    pub fn get_f64(&self, document: &Value) -> Option<f64> {
        match self.get(document)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Sets the value at this path, creating missing objects along the way.
    ///
    /// A `null` document or intermediate value is replaced by an object.
    /// Array elements can be replaced but not appended.
    pub fn set(&self, document: &mut Value, value: Value) -> Result<()> {
        let mut current = document;

        for (position, segment) in self.segments.iter().enumerate() {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }

            let last = position + 1 == self.segments.len();
            let slot = match current {
                Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
                Value::Array(items) => {
                    let index = segment.parse::<usize>().ok();
                    index
                        .and_then(|index| items.get_mut(index))
                        .with_context(|| IndexOutOfBoundsSnafu {
                            path: self.raw.clone(),
                            segment: segment.clone(),
                        })?
                }
                _ => {
                    return NotAContainerSnafu {
                        path: self.raw.clone(),
                        segment: segment.clone(),
                    }
                    .fail();
                }
            };

            if last {
                *slot = value;
                return Ok(());
            }
            current = slot;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> JsonPath {
        raw.parse().expect("test paths are valid")
    }

    #[rstest]
    #[case("autoscaling.MaxReplicas", &["autoscaling", "MaxReplicas"])]
    #[case("replicaCount", &["replicaCount"])]
    #[case(r"annotations.example\.com/hash", &["annotations", "example.com/hash"])]
    fn parses_segments(#[case] raw: &str, #[case] expected: &[&str]) {
        assert_eq!(path(raw).segments, expected);
    }

    #[rstest]
    #[case("")]
    #[case("a..b")]
    #[case(".a")]
    fn rejects_empty_segments(#[case] raw: &str) {
        assert!(matches!(raw.parse::<JsonPath>(), Err(Error::EmptySegment { .. })));
    }

    #[test]
    fn gets_nested_values() {
        let document = json!({"autoscaling": {"enabled": true, "MaxReplicas": "10"}, "ports": [{"port": 80}]});

        assert_eq!(path("autoscaling.enabled").get_bool(&document), Some(true));
        assert_eq!(path("autoscaling.MaxReplicas").get_f64(&document), Some(10.0));
        assert_eq!(path("ports.0.port").get(&document), Some(&json!(80)));
        assert_eq!(path("autoscaling.missing").get(&document), None);
        assert_eq!(path("ports.5.port").get(&document), None);
    }

    #[test]
    fn sets_and_creates_intermediate_objects() {
        let mut document = json!({"internal": null});

        path("internal.containerSpecs.ConfigHash")
            .set(&mut document, json!("abc"))
            .expect("intermediate objects are created");

        assert_eq!(document, json!({"internal": {"containerSpecs": {"ConfigHash": "abc"}}}));
    }

    #[test]
    fn refuses_to_descend_into_scalars() {
        let mut document = json!({"replicaCount": 1});

        let error = path("replicaCount.value").set(&mut document, json!(2));

        assert!(matches!(error, Err(Error::NotAContainer { .. })));
    }
}
