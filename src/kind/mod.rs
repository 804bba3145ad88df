//! kind provisioner integration: config rendering and the CLI boundary.

pub mod config;
pub mod provider;

pub use config::{KindConfig, NodePort};
pub use provider::KindProvider;
