use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::client::JobClient;
use crate::error::{KubeError, Result};
use crate::job::{JobPhase, JobSnapshot, JobTemplate};

/// Used when `started + timeout` would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodLog {
    pub pod: String,
    pub log: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub snapshot: JobSnapshot,
    pub logs: Vec<PodLog>,
}

/// Poll `name` until it succeeds, fails, or `opts.timeout` elapses.
///
/// Returns the terminal snapshot on success. A failed job yields
/// [`KubeError::JobFailed`] with the condition message.
pub async fn wait_for_job<C: JobClient>(
    client: &C,
    namespace: &str,
    name: &str,
    opts: WaitOptions,
) -> Result<JobSnapshot> {
    let started = Instant::now();
    let deadline = started
        .checked_add(opts.timeout)
        .unwrap_or_else(|| started + FAR_FUTURE);
    let mut last_phase = None;

    loop {
        let snap = client.job_snapshot(namespace, name).await?;
        if last_phase != Some(snap.phase) {
            tracing::debug!(
                namespace,
                name,
                phase = snap.phase.as_str(),
                active = snap.active,
                "job phase"
            );
            last_phase = Some(snap.phase);
        }

        match snap.phase {
            JobPhase::Succeeded => return Ok(snap),
            JobPhase::Failed => {
                let message = snap
                    .message
                    .unwrap_or_else(|| format!("{} pod(s) failed", snap.failed));
                return Err(KubeError::JobFailed {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    message,
                });
            }
            JobPhase::Pending | JobPhase::Running => {}
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::info!(namespace, name, waited = ?opts.timeout, "gave up waiting for job");
            return Err(KubeError::WaitTimedOut {
                namespace: namespace.to_string(),
                name: name.to_string(),
                waited: now - started,
            });
        }
        tokio::time::sleep(opts.poll_interval.min(deadline - now)).await;
    }
}

/// Fetch logs from every pod of job `name`, sorted by pod name.
pub async fn collect_job_logs<C: JobClient>(
    client: &C,
    namespace: &str,
    name: &str,
    tail_lines: Option<i64>,
) -> Result<Vec<PodLog>> {
    let pods = client.job_pods(namespace, name).await?;
    let mut logs = Vec::with_capacity(pods.len());
    for pod in pods {
        let log = client.pod_logs(namespace, &pod, tail_lines).await?;
        logs.push(PodLog { pod, log });
    }
    Ok(logs)
}

/// Create the job described by `template`, wait for it, then gather logs.
pub async fn run_job<C: JobClient>(
    client: &C,
    template: &JobTemplate,
    opts: WaitOptions,
    tail_lines: Option<i64>,
) -> Result<JobRun> {
    let job = template.build()?;
    client.create_job(&job).await?;
    let snapshot = wait_for_job(client, &template.namespace, &template.name, opts).await?;
    let logs = collect_job_logs(client, &template.namespace, &template.name, tail_lines).await?;
    Ok(JobRun { snapshot, logs })
}
