//! Chart installs through the Helm CLI, scoped to one cluster credential.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, instrument};

use super::types::{ChartMap, HelmChart};
use crate::error::{Error, Result};
use crate::k8s::ChartInstaller;

/// Installs charts against the cluster behind `kubeconfig` and tracks
/// installed releases for diagnostics. No upgrade path, no rollback;
/// reinstalling under an existing release name is an error.
///
/// The storage driver is whatever `HELM_DRIVER` in the process
/// environment says; unset is fine.
pub struct HelmClient {
    kubeconfig: PathBuf,
    charts: ChartMap,
}

impl HelmClient {
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            charts: ChartMap::new(),
        }
    }

    /// Releases installed by this manager, keyed by release name.
    pub fn charts(&self) -> &ChartMap {
        &self.charts
    }
}

#[async_trait]
impl ChartInstaller for HelmClient {
    #[instrument(skip(self, path))]
    async fn install_chart(&mut self, name: &str, namespace: &str, path: &Path) -> Result<()> {
        if self.charts.contains_key(name) {
            return Err(Error::ExistingRelease(name.to_string()));
        }

        info!(release = name, namespace, "installing chart");
        let output = Command::new("helm")
            .arg("install")
            .arg(name)
            .arg(path)
            .arg("--namespace")
            .arg(namespace)
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!(release = name, %stderr, "helm install failed");
            return Err(Error::Helm(stderr));
        }

        self.charts.insert(
            name.to_string(),
            HelmChart::new(name, namespace, path.to_path_buf()),
        );

        info!(release = name, "chart installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reinstalling_a_release_is_an_error() {
        let mut client = HelmClient::new("/tmp/kubeconfig");
        client.charts.insert(
            "db".to_string(),
            HelmChart::new("db", "default", "/charts/db"),
        );

        let err = client
            .install_chart("db", "default", Path::new("/charts/db"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExistingRelease(name) if name == "db"));
    }

    #[test]
    fn chart_map_starts_empty() {
        let client = HelmClient::new("/tmp/kubeconfig");
        assert!(client.charts().is_empty());
    }
}
