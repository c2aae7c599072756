//! Command line and environment configuration of the release pipeline.

use std::time::Duration;

use clap::Args;
use release_telemetry::tracing::TelemetryOptions;

use crate::{json_path::JsonPath, live_state::HashPaths};

pub const DEFAULT_CONFIG_HASH_PATH: &str = "internal.containerSpecs.ConfigHash";
pub const DEFAULT_SECRET_HASH_PATH: &str = "internal.containerSpecs.SecretHash";

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Release Options")]
pub struct ManifestOptions {
    /// How long a single request against a target cluster may take, e.g. `10s`.
    #[arg(long, env, default_value = "10s")]
    pub cluster_request_timeout: humantime::Duration,

    /// Where the hash of the external config maps a release mounts is
    /// written to in its values.
    ///
    /// Segments are separated by `.`, a literal `.` is escaped as `\.`.
    #[arg(long, env, default_value = DEFAULT_CONFIG_HASH_PATH)]
    pub config_hash_path: JsonPath,

    /// Where the hash of the external secrets a release mounts is written to
    /// in its values.
    #[arg(long, env, default_value = DEFAULT_SECRET_HASH_PATH)]
    pub secret_hash_path: JsonPath,

    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

/// Settings the release services are constructed with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestConfig {
    pub cluster_request_timeout: Duration,
    pub hash_paths: HashPaths,
}

impl From<&ManifestOptions> for ManifestConfig {
    fn from(options: &ManifestOptions) -> Self {
        Self {
            cluster_request_timeout: options.cluster_request_timeout.into(),
            hash_paths: HashPaths {
                config_hash: options.config_hash_path.clone(),
                secret_hash: options.secret_hash_path.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        options: ManifestOptions,
    }

    #[test]
    fn defaults() {
        let cli = TestCli::try_parse_from(["release-manifest"]).expect("defaults are valid");
        let config = ManifestConfig::from(&cli.options);

        assert_eq!(config.cluster_request_timeout, Duration::from_secs(10));
        assert_eq!(config.hash_paths.config_hash.to_string(), DEFAULT_CONFIG_HASH_PATH);
        assert_eq!(config.hash_paths.secret_hash.to_string(), DEFAULT_SECRET_HASH_PATH);
        assert!(!cli.options.telemetry.console_log_disabled);
    }

    #[test]
    fn overrides() {
        let cli = TestCli::try_parse_from([
            "release-manifest",
            "--cluster-request-timeout",
            "1m 30s",
            "--config-hash-path",
            r"podAnnotations.checksum\.config",
        ])
        .expect("arguments are valid");
        let config = ManifestConfig::from(&cli.options);

        assert_eq!(config.cluster_request_timeout, Duration::from_secs(90));
        assert_eq!(
            config.hash_paths.config_hash.to_string(),
            r"podAnnotations.checksum\.config"
        );
    }

    #[test]
    fn rejects_empty_path_segments() {
        let result = TestCli::try_parse_from(["release-manifest", "--secret-hash-path", "a..b"]);

        assert!(result.is_err());
    }
}
