//! Cluster API integration and the capability seams the orchestrator
//! depends on.

pub mod job;
pub mod resources;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
#[cfg(test)]
use mockall::automock;

use crate::error::Result;

pub use resources::KubeResourceManager;

/// Cluster-resource operations the orchestrator needs. Narrow by design
/// so tests can substitute fakes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeResources {
    /// Submit a job, tail its pod's logs, wait for a terminal status, and
    /// clean up the job and pod.
    async fn run_job(&self, namespace: &str, job: &Job, poll_interval: Duration) -> Result<()>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_namespace(&self, name: &str) -> Result<()>;
}

/// Chart operations the orchestrator needs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartInstaller {
    async fn install_chart(&mut self, name: &str, namespace: &str, path: &Path) -> Result<()>;
}
