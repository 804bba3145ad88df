//! Programmable harness for ephemeral Kubernetes clusters.
//!
//! kindling brings up throwaway multi-node [kind] clusters backed by
//! local containers, fronts them with a private image registry on the
//! kind network, and drives workloads into them: Helm charts into
//! declared namespaces, batch jobs run synchronously with their logs
//! tailed to stdout, and deployments created and deleted on demand.
//!
//! The entry point is [`KubeCluster`], built through
//! [`KubeCluster::builder`]:
//!
//! ```no_run
//! use std::time::Duration;
//! use kindling::KubeCluster;
//!
//! # async fn demo(job: k8s_openapi::api::batch::v1::Job) -> kindling::Result<()> {
//! let mut cluster = KubeCluster::builder()
//!     .name("ci")
//!     .worker_nodes(2)
//!     .namespace("batch")
//!     .build()
//!     .await?;
//!
//! cluster.run_job("batch", &job, Duration::from_secs(1)).await?;
//! cluster.delete().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The host must have the `kind` and `helm` binaries on `PATH` and a
//! reachable Docker engine.
//!
//! [kind]: https://kind.sigs.k8s.io

pub mod cluster;
pub mod docker;
pub mod error;
pub mod helm;
pub mod k8s;
pub mod kind;

pub use cluster::{ClusterStatus, KubeCluster, KubeClusterBuilder};
pub use docker::{lookup_by_name, ClusterRegistry, Container, ContainerBuilder};
pub use error::{Error, Result};
pub use helm::{ChartMap, HelmChart, HelmClient};
pub use k8s::{ChartInstaller, KubeResourceManager, KubeResources};
pub use kind::{KindConfig, KindProvider, NodePort};
