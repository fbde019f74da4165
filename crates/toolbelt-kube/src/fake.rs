//! In-memory [`JobClient`] with scripted job status sequences.
//!
//! Each poll of [`JobClient::job_snapshot`] consumes the next scripted
//! snapshot; the last one repeats forever.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use k8s_openapi::api::batch::v1::Job;
use kube::core::ErrorResponse;

use crate::client::JobClient;
use crate::error::{KubeError, Result};
use crate::job::{JobPhase, JobSnapshot};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct FakeState {
    scripts: BTreeMap<Key, VecDeque<JobSnapshot>>,
    polls: BTreeMap<Key, usize>,
    pods: BTreeMap<Key, Vec<String>>,
    logs: BTreeMap<Key, String>,
    created: Vec<Job>,
    deleted: Vec<Key>,
}

#[derive(Default)]
pub struct FakeJobClient {
    state: Mutex<FakeState>,
}

/// A snapshot with counts consistent with `phase`.
pub fn snapshot(namespace: &str, name: &str, phase: JobPhase) -> JobSnapshot {
    let (active, succeeded, failed) = match phase {
        JobPhase::Pending => (0, 0, 0),
        JobPhase::Running => (1, 0, 0),
        JobPhase::Succeeded => (0, 1, 0),
        JobPhase::Failed => (0, 0, 1),
    };
    JobSnapshot {
        namespace: namespace.to_string(),
        name: name.to_string(),
        phase,
        active,
        succeeded,
        failed,
        started_at: None,
        completed_at: None,
        message: (phase == JobPhase::Failed).then(|| "BackoffLimitExceeded".to_string()),
    }
}

impl FakeJobClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script the phases `name` reports on successive polls.
    pub fn script(
        &self,
        namespace: &str,
        name: &str,
        phases: impl IntoIterator<Item = JobPhase>,
    ) -> &Self {
        let snapshots = phases
            .into_iter()
            .map(|p| snapshot(namespace, name, p))
            .collect();
        self.script_snapshots(namespace, name, snapshots)
    }

    pub fn script_snapshots(
        &self,
        namespace: &str,
        name: &str,
        snapshots: Vec<JobSnapshot>,
    ) -> &Self {
        self.state()
            .scripts
            .insert(key(namespace, name), snapshots.into());
        self
    }

    /// Attach a pod with its log output to job `job`.
    pub fn add_pod(&self, namespace: &str, job: &str, pod: &str, log: &str) -> &Self {
        let mut state = self.state();
        state
            .pods
            .entry(key(namespace, job))
            .or_default()
            .push(pod.to_string());
        state.logs.insert(key(namespace, pod), log.to_string());
        self
    }

    pub fn created(&self) -> Vec<Job> {
        self.state().created.clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state().deleted.clone()
    }

    /// Number of snapshot requests made for `name`.
    pub fn polls(&self, namespace: &str, name: &str) -> usize {
        self.state()
            .polls
            .get(&key(namespace, name))
            .copied()
            .unwrap_or(0)
    }
}

fn api_error(code: u16, reason: &str, message: String) -> KubeError {
    KubeError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

impl JobClient for FakeJobClient {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let name = job.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        let already = state.created.iter().any(|j| {
            j.metadata.namespace.as_deref() == Some(namespace.as_str())
                && j.metadata.name.as_deref() == Some(name.as_str())
        });
        if already {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("jobs.batch \"{name}\" already exists"),
            ));
        }
        state
            .scripts
            .entry(key(&namespace, &name))
            .or_insert_with(|| VecDeque::from([snapshot(&namespace, &name, JobPhase::Pending)]));
        state.created.push(job.clone());
        Ok(())
    }

    async fn job_snapshot(&self, namespace: &str, name: &str) -> Result<JobSnapshot> {
        let k = key(namespace, name);
        let mut state = self.state();
        *state.polls.entry(k.clone()).or_default() += 1;
        let Some(script) = state.scripts.get_mut(&k) else {
            return Err(KubeError::JobNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };
        let snap = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        snap.ok_or_else(|| KubeError::JobNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn job_pods(&self, namespace: &str, name: &str) -> Result<Vec<String>> {
        let mut pods = self
            .state()
            .pods
            .get(&key(namespace, name))
            .cloned()
            .unwrap_or_default();
        pods.sort();
        Ok(pods)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: Option<i64>) -> Result<String> {
        let state = self.state();
        let Some(log) = state.logs.get(&key(namespace, pod)) else {
            return Err(api_error(
                404,
                "NotFound",
                format!("pods \"{pod}\" not found"),
            ));
        };
        let Some(tail) = tail_lines else {
            return Ok(log.clone());
        };
        let lines: Vec<&str> = log.lines().collect();
        let skip = lines.len().saturating_sub(usize::try_from(tail).unwrap_or(0));
        let mut out = lines[skip..].join("\n");
        if !out.is_empty() && log.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let k = key(namespace, name);
        let mut state = self.state();
        if state.scripts.remove(&k).is_none() {
            return Err(KubeError::JobNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        state.created.retain(|j| {
            j.metadata.namespace.as_deref() != Some(namespace)
                || j.metadata.name.as_deref() != Some(name)
        });
        state.deleted.push(k);
        Ok(())
    }
}
