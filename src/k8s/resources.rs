//! Cluster API wrapper bound to the harness's credential file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use super::job;
use super::KubeResources;
use crate::error::Result;

/// Wrapper around `kube::Client` scoped to one ephemeral cluster.
///
/// The client is safe for concurrent use; `run_job` clones it into its
/// watcher tasks.
#[derive(Clone)]
pub struct KubeResourceManager {
    client: Client,
}

impl KubeResourceManager {
    /// Build a client from the credential file the provisioner populated.
    #[instrument]
    pub async fn new(kubeconfig_path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path)?;
        let config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;

        info!("connected to cluster");
        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one built by the caller.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeResources for KubeResourceManager {
    /// Submit `job` into `namespace`, tail its pod's logs to stdout, wait
    /// for a terminal status, and delete the job and pod.
    ///
    /// Success means the job reached `succeeded > 0` with no active pods.
    /// Cleanup runs exactly once on every exit path; a job failure takes
    /// precedence over a cleanup failure.
    #[instrument(skip(self, job), fields(job_name = %job.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn run_job(&self, namespace: &str, job: &Job, poll_interval: Duration) -> Result<()> {
        let jobs = self.jobs(namespace);
        let pods = self.pods(namespace);

        let created = jobs.create(&PostParams::default(), job).await?;
        let job_name = created.name_any();
        info!(%job_name, "job submitted");

        let pod = match job::discover_pod(&pods, &job_name, poll_interval).await {
            Ok(pod) => pod,
            Err(err) => {
                job::cleanup(&jobs, &pods, &job_name, None).await?;
                return Err(err);
            }
        };
        let pod_name = pod.name_any();
        info!(%pod_name, "job pod discovered");

        // First watcher error wins; the buffer holds exactly one.
        let (err_tx, err_rx) = mpsc::channel(1);
        let status_task = tokio::spawn(job::watch_status(
            jobs.clone(),
            job_name.clone(),
            poll_interval,
            err_tx.clone(),
        ));
        let log_task = tokio::spawn(job::tail_logs(
            pods.clone(),
            pod_name.clone(),
            poll_interval,
            err_tx,
        ));

        let outcome = job::await_watchers(status_task, log_task, err_rx).await;

        let cleanup = job::cleanup(&jobs, &pods, &job_name, Some(&pod_name)).await;

        outcome?;
        cleanup
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await?;
        info!(
            name = %deployment.metadata.name.as_deref().unwrap_or("unknown"),
            namespace,
            "created deployment"
        );
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        info!(name, namespace, "deleted deployment");
        Ok(())
    }

    /// Create a namespace. A conflict with an existing namespace is
    /// surfaced to the caller, not swallowed.
    #[instrument(skip(self))]
    async fn create_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    [(
                        "app.kubernetes.io/managed-by".to_string(),
                        "kindling".to_string(),
                    )]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        namespaces.create(&PostParams::default(), &ns).await?;
        info!(namespace = name, "created namespace");
        Ok(())
    }
}
