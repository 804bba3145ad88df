//! Error taxonomy for the cluster harness
//!
//! Every named failure the harness can report, plus transparent
//! pass-throughs for the engine and cluster API clients.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A kind cluster with this name already has a node set.
    #[error("cluster {0} already exists")]
    ExistingCluster(String),

    /// The kubeconfig file was already present when bring-up tried to create it.
    #[error("kubeconfig at {0} already exists")]
    ExistingKubeconfig(PathBuf),

    /// The provisioner failed on every allowed attempt.
    #[error("exceeded max attempts ({0})")]
    ExceededMaxAttempts(u32),

    /// A required descriptor field was left empty.
    #[error("field {0} is missing but it is required")]
    MissingField(&'static str),

    /// No running container carries this name.
    #[error("no such container named {0}")]
    BadContainerName(String),

    /// The engine's build or push stream reported an error line.
    #[error("failed building image: {0}")]
    BadImageBuild(String),

    /// The job reached a terminal Failed state.
    #[error("job {0} failed")]
    FailedJob(String),

    /// Pod discovery exhausted its retries without a match.
    #[error("no pod for job {0} exists")]
    BadPodName(String),

    /// A Helm release with this name was already installed by this manager.
    #[error("helm release {0} is already installed")]
    ExistingRelease(String),

    /// Two node-port mappings claimed the same host port.
    #[error("duplicate host port {0}")]
    DuplicateHostPort(u16),

    /// A descriptor option violated a structural invariant.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Namespace creation did not finish inside its deadline.
    #[error("creating namespace {0} timed out")]
    NamespaceDeadline(String),

    /// The kind CLI exited non-zero.
    #[error("kind {action} failed: {stderr}")]
    Provisioner { action: &'static str, stderr: String },

    /// The helm CLI exited non-zero.
    #[error("helm install failed: {0}")]
    Helm(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        assert_eq!(
            Error::ExistingCluster("kind-cluster".into()).to_string(),
            "cluster kind-cluster already exists"
        );
        assert_eq!(
            Error::ExceededMaxAttempts(5).to_string(),
            "exceeded max attempts (5)"
        );
        assert_eq!(
            Error::MissingField("image").to_string(),
            "field image is missing but it is required"
        );
        assert_eq!(Error::FailedJob("echo".into()).to_string(), "job echo failed");
        assert_eq!(
            Error::BadPodName("echo".into()).to_string(),
            "no pod for job echo exists"
        );
    }
}
