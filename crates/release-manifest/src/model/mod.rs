//! Records read and written while computing the values of a release.

mod chart;
mod config_secret;
mod history;
mod ids;
mod pipeline;
mod pipeline_override;
mod request;
mod strategy;

pub use chart::*;
pub use config_secret::*;
pub use history::*;
pub use ids::*;
pub use pipeline::*;
pub use pipeline_override::*;
pub use request::*;
pub use strategy::*;
