//! Computes the values releases of CD pipelines are deployed with.
//!
//! The entry point is [`manifest::ManifestCreationService`], which layers
//! chart values, deployment strategy, the rendered release fragment, config
//! maps, secrets and app labels into the final values of a release and
//! adjusts them to the live state of the target cluster.

pub mod allocator;
pub mod cli;
pub mod clients;
pub mod config_secret;
pub mod json_path;
pub mod k8s;
pub mod live_state;
pub mod manifest;
pub mod merge;
pub mod model;
pub mod release;
pub mod store;
pub mod variables;

// External re-exports
pub use jiff;
pub use k8s_openapi;
pub use kube;
pub use release_telemetry as telemetry;
