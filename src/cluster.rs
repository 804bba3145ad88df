//! Cluster lifecycle orchestration.
//!
//! A [`KubeCluster`] composes the provisioner, the local registry, the
//! resource manager, and the chart installer into one descriptor with a
//! bring-up / configure / tear-down lifecycle. Construction goes through
//! [`KubeClusterBuilder`], which applies the documented defaults and then
//! the caller's overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use tracing::{info, instrument, warn};

use crate::docker::ClusterRegistry;
use crate::error::{Error, Result};
use crate::helm::{HelmChart, HelmClient};
use crate::k8s::{ChartInstaller, KubeResourceManager, KubeResources};
use crate::kind::{KindConfig, KindProvider, NodePort};

const DEFAULT_NAME: &str = "kind-cluster";
const DEFAULT_REGISTRY_NAME: &str = "kind-registry";
const DEFAULT_REGISTRY_PORT: u16 = 5000;
const DEFAULT_WORKER_COUNT: u32 = 1;
const DEFAULT_CONTROL_COUNT: u32 = 1;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Deadline on each post-bring-up namespace creation.
const NAMESPACE_DEADLINE: Duration = Duration::from_secs(10);

/// Liveness of the node set behind a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Alive,
    Dead,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterStatus::Alive => write!(f, "Alive"),
            ClusterStatus::Dead => write!(f, "Dead"),
        }
    }
}

impl fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCluster")
            .field("name", &self.name)
            .field("kubeconfig_path", &self.kubeconfig_path)
            .field("worker_count", &self.worker_count)
            .field("control_count", &self.control_count)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// One ephemeral kind cluster: its configuration, runtime state, and the
/// capability handles everything else goes through.
pub struct KubeCluster {
    provider: KindProvider,
    name: String,
    kubeconfig_path: PathBuf,
    worker_count: u32,
    control_count: u32,
    kind_config: KindConfig,
    max_start_attempts: u32,
    status: ClusterStatus,
    registry: ClusterRegistry,
    node_ports: Vec<NodePort>,
    namespaces: Vec<String>,
    charts: Vec<HelmChart>,
    resources: Box<dyn KubeResources + Send + Sync>,
    chart_installer: Box<dyn ChartInstaller + Send + Sync>,
}

impl KubeCluster {
    pub fn builder() -> KubeClusterBuilder {
        KubeClusterBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    pub fn control_count(&self) -> u32 {
        self.control_count
    }

    pub fn status(&self) -> ClusterStatus {
        self.status
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn node_ports(&self) -> &[NodePort] {
        &self.node_ports
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Charts installed through this descriptor, in install order.
    pub fn charts(&self) -> &[HelmChart] {
        &self.charts
    }

    /// Bring up the node set. A no-op when the descriptor is already
    /// Alive; fails when a cluster or credential file with this identity
    /// already exists.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn start(&mut self) -> Result<()> {
        if self.status == ClusterStatus::Alive {
            return Ok(());
        }

        bring_up(
            &self.provider,
            &self.name,
            &self.kind_config,
            &self.kubeconfig_path,
            self.max_start_attempts,
        )
        .await?;

        self.status = ClusterStatus::Alive;
        Ok(())
    }

    /// Tear down the node set, the credential file, and the registry
    /// container. A no-op when the descriptor is already Dead. Installed
    /// releases are not uninstalled; they die with the cluster.
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn delete(&mut self) -> Result<()> {
        if self.status == ClusterStatus::Dead {
            return Ok(());
        }

        if !self.provider.list_nodes(&self.name).await?.is_empty() {
            self.provider
                .delete_cluster(&self.name, &self.kubeconfig_path)
                .await?;
        }

        if tokio::fs::try_exists(&self.kubeconfig_path).await? {
            tokio::fs::remove_file(&self.kubeconfig_path).await?;
        }

        self.registry.delete().await?;

        self.status = ClusterStatus::Dead;
        info!("cluster deleted");
        Ok(())
    }

    /// Run a job to completion in `namespace`. See
    /// [`KubeResources::run_job`].
    pub async fn run_job(
        &self,
        namespace: &str,
        job: &Job,
        poll_interval: Duration,
    ) -> Result<()> {
        self.resources.run_job(namespace, job, poll_interval).await
    }

    pub async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<()> {
        self.resources.create_deployment(namespace, deployment).await
    }

    pub async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.resources.delete_deployment(namespace, name).await
    }

    pub async fn create_namespace(&self, name: &str) -> Result<()> {
        self.resources.create_namespace(name).await
    }

    /// Install a chart and record it on the descriptor.
    pub async fn install_chart(
        &mut self,
        name: &str,
        namespace: &str,
        path: &Path,
    ) -> Result<()> {
        self.chart_installer
            .install_chart(name, namespace, path)
            .await?;
        self.charts
            .push(HelmChart::new(name, namespace, path.to_path_buf()));
        Ok(())
    }
}

/// Configures and constructs a [`KubeCluster`].
///
/// Defaults: name `kind-cluster`, credential at
/// `$HOME/.kube/kind-config.yaml`, one control-plane and one worker node,
/// bring-up on build with up to 5 attempts, and a `kind-registry`
/// container on port 5000.
pub struct KubeClusterBuilder {
    name: String,
    kubeconfig_path: Option<PathBuf>,
    worker_count: u32,
    control_count: u32,
    start_on_create: bool,
    max_start_attempts: u32,
    registry: Option<ClusterRegistry>,
    registry_port: u16,
    resources: Option<Box<dyn KubeResources + Send + Sync>>,
    chart_installer: Option<Box<dyn ChartInstaller + Send + Sync>>,
    namespaces: Vec<String>,
    charts: Vec<HelmChart>,
    node_ports: Vec<NodePort>,
}

impl Default for KubeClusterBuilder {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            kubeconfig_path: None,
            worker_count: DEFAULT_WORKER_COUNT,
            control_count: DEFAULT_CONTROL_COUNT,
            start_on_create: true,
            max_start_attempts: DEFAULT_MAX_ATTEMPTS,
            registry: None,
            registry_port: DEFAULT_REGISTRY_PORT,
            resources: None,
            chart_installer: None,
            namespaces: Vec::new(),
            charts: Vec::new(),
            node_ports: Vec::new(),
        }
    }
}

impl KubeClusterBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kubeconfig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig_path = Some(path.into());
        self
    }

    pub fn worker_nodes(mut self, count: u32) -> Self {
        self.worker_count = count;
        self
    }

    pub fn control_nodes(mut self, count: u32) -> Self {
        self.control_count = count;
        self
    }

    /// When false the descriptor begins Alive and bring-up is skipped;
    /// the caller vouches that the cluster already exists.
    pub fn start_on_create(mut self, start: bool) -> Self {
        self.start_on_create = start;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_start_attempts = attempts;
        self
    }

    /// Adopt an already-started registry instead of launching the default.
    /// Its name and port drive the containerd mirror configuration.
    pub fn registry(mut self, registry: ClusterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Port for the default registry. Ignored when a registry is adopted
    /// via [`Self::registry`]; that registry's own port wins.
    pub fn registry_port(mut self, port: u16) -> Self {
        self.registry_port = port;
        self
    }

    /// Build the resource manager from this client instead of the
    /// credential file.
    pub fn kube_client(mut self, client: kube::Client) -> Self {
        self.resources = Some(Box::new(KubeResourceManager::from_client(client)));
        self
    }

    /// Substitute the cluster-resource capability, e.g. with a fake.
    pub fn kube_resources(
        mut self,
        resources: impl KubeResources + Send + Sync + 'static,
    ) -> Self {
        self.resources = Some(Box::new(resources));
        self
    }

    /// Substitute the chart capability, e.g. with a fake.
    pub fn chart_installer(
        mut self,
        installer: impl ChartInstaller + Send + Sync + 'static,
    ) -> Self {
        self.chart_installer = Some(Box::new(installer));
        self
    }

    /// Namespace to create after bring-up.
    pub fn namespace(mut self, name: impl Into<String>) -> Self {
        self.namespaces.push(name.into());
        self
    }

    /// Chart to install after bring-up, in call order.
    pub fn chart(mut self, chart: HelmChart) -> Self {
        self.charts.push(chart);
        self
    }

    /// Extra port mapping on the first control-plane node.
    pub fn node_port(mut self, host: u16, container: u16) -> Self {
        self.node_ports.push(NodePort::new(host, container));
        self
    }

    /// Validate the descriptor, bring the cluster up (unless pre-marked
    /// alive), launch the registry, bind the resource manager, create the
    /// declared namespaces, and install the queued charts, in that order.
    pub async fn build(self) -> Result<KubeCluster> {
        self.validate()?;

        let kubeconfig_path = match self.kubeconfig_path {
            Some(path) => path,
            None => default_kubeconfig_path()?,
        };

        // An adopted registry decides both the mirror address and port.
        let (registry_name, registry_port) = match self.registry.as_ref() {
            Some(registry) => (registry.name().to_string(), registry.port()),
            None => (DEFAULT_REGISTRY_NAME.to_string(), self.registry_port),
        };

        let kind_config = KindConfig::new(
            &self.name,
            self.control_count,
            self.worker_count,
            self.node_ports.clone(),
            &registry_name,
            registry_port,
        );

        let provider = KindProvider::new();

        if self.start_on_create {
            bring_up(
                &provider,
                &self.name,
                &kind_config,
                &kubeconfig_path,
                self.max_start_attempts,
            )
            .await?;
        }

        let registry = match self.registry {
            Some(registry) => registry,
            None => ClusterRegistry::launch(&registry_name, registry_port).await?,
        };

        let resources: Box<dyn KubeResources + Send + Sync> = match self.resources {
            Some(resources) => resources,
            None => Box::new(KubeResourceManager::new(&kubeconfig_path).await?),
        };

        for namespace in &self.namespaces {
            tokio::time::timeout(NAMESPACE_DEADLINE, resources.create_namespace(namespace))
                .await
                .map_err(|_| Error::NamespaceDeadline(namespace.clone()))??;
        }

        let chart_installer: Box<dyn ChartInstaller + Send + Sync> = match self.chart_installer {
            Some(installer) => installer,
            None => Box::new(HelmClient::new(&kubeconfig_path)),
        };

        let mut cluster = KubeCluster {
            provider,
            name: self.name,
            kubeconfig_path,
            worker_count: self.worker_count,
            control_count: self.control_count,
            kind_config,
            max_start_attempts: self.max_start_attempts,
            status: ClusterStatus::Alive,
            registry,
            node_ports: self.node_ports,
            namespaces: self.namespaces,
            charts: Vec::new(),
            resources,
            chart_installer,
        };

        for chart in self.charts {
            cluster
                .install_chart(&chart.name, &chart.namespace, &chart.path)
                .await?;
        }

        Ok(cluster)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::MissingField("name"));
        }
        if self.control_count < 1 {
            return Err(Error::InvalidConfig(
                "at least one control-plane node is required".to_string(),
            ));
        }
        if self.max_start_attempts < 1 {
            return Err(Error::InvalidConfig(
                "at least one bring-up attempt is required".to_string(),
            ));
        }

        let mut seen_hosts = std::collections::BTreeSet::new();
        for port in &self.node_ports {
            if port.host == 0 || port.container == 0 {
                return Err(Error::InvalidConfig(
                    "node ports must be between 1 and 65535".to_string(),
                ));
            }
            if !seen_hosts.insert(port.host) {
                return Err(Error::DuplicateHostPort(port.host));
            }
        }

        Ok(())
    }
}

fn default_kubeconfig_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        Error::InvalidConfig("home directory could not be determined".to_string())
    })?;
    Ok(home.join(".kube").join("kind-config.yaml"))
}

/// Create the node set for `name`, retrying up to `max_attempts` times.
async fn bring_up(
    provider: &KindProvider,
    name: &str,
    kind_config: &KindConfig,
    kubeconfig_path: &Path,
    max_attempts: u32,
) -> Result<()> {
    if !provider.list_nodes(name).await?.is_empty() {
        return Err(Error::ExistingCluster(name.to_string()));
    }

    create_kubeconfig(kubeconfig_path).await?;

    let rendered = kind_config.to_string();
    for attempt in 1..=max_attempts {
        match provider.create_cluster(name, &rendered, kubeconfig_path).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_attempts => {
                warn!(attempt, error = %err, "cluster bring-up failed, retrying");
            }
            Err(_) => break,
        }
    }

    Err(Error::ExceededMaxAttempts(max_attempts))
}

/// Touch the credential file the provisioner will populate, creating
/// parent directories as needed. An existing file is an error.
async fn create_kubeconfig(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        return Err(Error::ExistingKubeconfig(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::File::create(path).await?;
    info!(path = %path.display(), "created kubeconfig");
    Ok(())
}
