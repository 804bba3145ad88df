//! Thin wrapper over the `kind` CLI.
//!
//! The provisioner boundary: create a node set from a rendered config,
//! delete it, and list the nodes backing a named cluster. The rendered
//! config is written to a temp file and handed to `kind --config`.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct KindProvider;

impl KindProvider {
    pub fn new() -> Self {
        Self
    }

    /// Create the node set for `name` from a rendered kind config,
    /// writing credentials to `kubeconfig`.
    #[instrument(skip(self, config))]
    pub async fn create_cluster(
        &self,
        name: &str,
        config: &str,
        kubeconfig: &Path,
    ) -> Result<()> {
        let config_file = std::env::temp_dir().join(format!("kind-config-{name}.yaml"));
        tokio::fs::write(&config_file, config).await?;

        info!(cluster = name, "creating kind cluster");
        let output = Command::new("kind")
            .arg("create")
            .arg("cluster")
            .arg("--name")
            .arg(name)
            .arg("--config")
            .arg(&config_file)
            .arg("--kubeconfig")
            .arg(kubeconfig)
            .arg("--wait")
            .arg("0s")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let _ = tokio::fs::remove_file(&config_file).await;

        if !output.status.success() {
            return Err(Error::Provisioner {
                action: "create cluster",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        info!(cluster = name, "kind cluster created");
        Ok(())
    }

    /// Delete the node set for `name` and drop its context from `kubeconfig`.
    #[instrument(skip(self))]
    pub async fn delete_cluster(&self, name: &str, kubeconfig: &Path) -> Result<()> {
        info!(cluster = name, "deleting kind cluster");
        let output = Command::new("kind")
            .arg("delete")
            .arg("cluster")
            .arg("--name")
            .arg(name)
            .arg("--kubeconfig")
            .arg(kubeconfig)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Provisioner {
                action: "delete cluster",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(())
    }

    /// List the container-runtime nodes backing `name`. An empty list means
    /// no cluster with that name exists.
    #[instrument(skip(self))]
    pub async fn list_nodes(&self, name: &str) -> Result<Vec<String>> {
        let output = Command::new("kind")
            .arg("get")
            .arg("nodes")
            .arg("--name")
            .arg(name)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !stderr.contains("No kind nodes found") {
            return Err(Error::Provisioner {
                action: "get nodes",
                stderr: stderr.into_owned(),
            });
        }

        let nodes: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        debug!(cluster = name, count = nodes.len(), "listed kind nodes");
        Ok(nodes)
    }
}
