//! Tracing setup shared by the release pipeline binaries.
pub mod tracing;

pub use tracing::Tracing;
