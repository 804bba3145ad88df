//! Watchers backing the synchronous job run.
//!
//! A run spawns two concurrent pollers: one watching the job object for a
//! terminal status, one waiting for the pod to leave Pending and then
//! tailing its log stream to stdout. Either watcher reports its first
//! error on a capacity-one channel; later errors are dropped.

use std::time::Duration;

use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

/// List attempts before pod discovery gives up.
const DISCOVER_ATTEMPTS: u32 = 3;

/// Find the pod the job controller created for `job_name`, matching on
/// the pod's generate-name prefix `<job_name>-`.
pub(super) async fn discover_pod(
    pods: &Api<Pod>,
    job_name: &str,
    poll_interval: Duration,
) -> Result<Pod> {
    let prefix = format!("{job_name}-");

    for attempt in 1..=DISCOVER_ATTEMPTS {
        let list = pods.list(&ListParams::default()).await?;
        if let Some(pod) = list
            .items
            .into_iter()
            .find(|pod| pod.metadata.generate_name.as_deref() == Some(prefix.as_str()))
        {
            return Ok(pod);
        }

        debug!(job_name, attempt, "job pod not visible yet");
        if attempt < DISCOVER_ATTEMPTS {
            tokio::time::sleep(poll_interval).await;
        }
    }

    Err(Error::BadPodName(job_name.to_string()))
}

/// Poll the job until it reaches a terminal status. Success is
/// `succeeded > 0` with no active pods; `failed > 0` with no active pods
/// reports [`Error::FailedJob`]. Fetch errors are fatal to the watcher.
pub(super) async fn watch_status(
    jobs: Api<Job>,
    name: String,
    poll_interval: Duration,
    errors: mpsc::Sender<Error>,
) {
    loop {
        let job = match jobs.get(&name).await {
            Ok(job) => job,
            Err(err) => {
                let _ = errors.try_send(err.into());
                return;
            }
        };

        let status = job.status.unwrap_or_default();
        let active = status.active.unwrap_or(0);

        if status.succeeded.unwrap_or(0) > 0 && active == 0 {
            return;
        }

        if status.failed.unwrap_or(0) > 0 && active == 0 {
            let _ = errors.try_send(Error::FailedJob(name));
            return;
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Wait for the pod to leave the Pending phase, then copy its log stream
/// to stdout until EOF.
pub(super) async fn tail_logs(
    pods: Api<Pod>,
    name: String,
    poll_interval: Duration,
    errors: mpsc::Sender<Error>,
) {
    loop {
        let pod = match pods.get(&name).await {
            Ok(pod) => pod,
            Err(err) => {
                let _ = errors.try_send(err.into());
                return;
            }
        };

        let phase = pod.status.and_then(|status| status.phase);
        if phase.as_deref() != Some("Pending") {
            break;
        }

        tokio::time::sleep(poll_interval).await;
    }

    let stream = match pods.log_stream(&name, &LogParams::default()).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = errors.try_send(err.into());
            return;
        }
    };

    let mut lines = stream.lines();
    loop {
        match lines.try_next().await {
            Ok(Some(line)) => println!("{line}"),
            Ok(None) => return,
            Err(err) => {
                let _ = errors.try_send(err.into());
                return;
            }
        }
    }
}

/// Wait for both watchers, surfacing the first reported error.
///
/// The watchers report via `try_send` and then return, so both select
/// branches can be ready on the same poll. The join branch therefore
/// drains the channel before declaring success; a queued error always
/// wins over a clean join.
pub(super) async fn await_watchers(
    mut status_task: tokio::task::JoinHandle<()>,
    mut log_task: tokio::task::JoinHandle<()>,
    mut errors: mpsc::Receiver<Error>,
) -> Result<()> {
    tokio::select! {
        _ = async {
            let _ = (&mut status_task).await;
            let _ = (&mut log_task).await;
        } => match errors.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        },
        Some(err) = errors.recv() => {
            status_task.abort();
            log_task.abort();
            Err(err)
        }
    }
}

/// Delete the job and, when one was discovered, its pod.
pub(super) async fn cleanup(
    jobs: &Api<Job>,
    pods: &Api<Pod>,
    job_name: &str,
    pod_name: Option<&str>,
) -> Result<()> {
    jobs.delete(job_name, &DeleteParams::default()).await?;

    if let Some(pod_name) = pod_name {
        pods.delete(pod_name, &DeleteParams::default()).await?;
    }

    debug!(job_name, "job cleaned up");
    Ok(())
}
