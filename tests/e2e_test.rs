//! End-to-end lifecycle tests against a real `kind` + Docker host.
//!
//! These bring up actual clusters, so they are ignored by default. Run
//! them one at a time with:
//!
//! ```text
//! cargo test --test e2e_test -- --ignored --test-threads=1
//! ```

use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use kindling::{lookup_by_name, Error, KubeCluster};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn kubeconfig_in(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("kind-config.yaml")
}

fn echo_job(name: &str, command: &str) -> Job {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": name },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": name,
                        "image": "busybox:1.36",
                        "command": ["sh", "-c", command],
                    }],
                }
            }
        }
    }))
    .unwrap()
}

#[tokio::test]
#[ignore = "requires kind, helm, and a Docker engine"]
async fn cluster_lifecycle_with_job() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut cluster = KubeCluster::builder()
        .name("kindling-e2e")
        .kubeconfig_path(kubeconfig_in(&dir))
        .namespace("batch")
        .node_port(30080, 80)
        .build()
        .await
        .unwrap();

    // The registry container is resolvable by name while the cluster is up.
    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let id = lookup_by_name(&docker, cluster.registry().name())
        .await
        .unwrap();
    assert!(!id.is_empty());

    cluster
        .run_job("batch", &echo_job("hello", "echo hello"), Duration::from_secs(1))
        .await
        .unwrap();

    let registry_name = cluster.registry().name().to_string();
    cluster.delete().await.unwrap();
    assert!(!kubeconfig_in(&dir).exists());
    let err = lookup_by_name(&docker, &registry_name).await.unwrap_err();
    assert!(matches!(err, Error::BadContainerName(_)));
}

#[tokio::test]
#[ignore = "requires kind, helm, and a Docker engine"]
async fn failed_job_is_reported_and_cleaned_up() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut cluster = KubeCluster::builder()
        .name("kindling-e2e-fail")
        .kubeconfig_path(kubeconfig_in(&dir))
        .namespace("batch")
        .build()
        .await
        .unwrap();

    let err = cluster
        .run_job("batch", &echo_job("doomed", "exit 1"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FailedJob(name) if name == "doomed"));

    cluster.delete().await.unwrap();
}

#[tokio::test]
#[ignore = "requires kind, helm, and a Docker engine"]
async fn second_cluster_with_same_name_is_rejected() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut cluster = KubeCluster::builder()
        .name("kindling-e2e-dup")
        .kubeconfig_path(kubeconfig_in(&dir))
        .build()
        .await
        .unwrap();

    let err = KubeCluster::builder()
        .name("kindling-e2e-dup")
        .kubeconfig_path(dir.path().join("other.yaml"))
        .registry_port(5002)
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExistingCluster(_)));

    cluster.delete().await.unwrap();
    // Deleting twice is a no-op.
    cluster.delete().await.unwrap();
}
