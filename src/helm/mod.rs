//! Helm integration: chart records and the CLI-backed installer.

pub mod client;
pub mod types;

pub use client::HelmClient;
pub use types::{ChartMap, HelmChart};
