use std::future::Future;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, PropagationPolicy};
use kube::Client;

use crate::error::{KubeError, Result};
use crate::job::JobSnapshot;

/// The slice of the Kubernetes API the job helpers need.
///
/// Implemented by [`KubeJobClient`] against a real cluster and by
/// [`crate::fake::FakeJobClient`] in memory.
pub trait JobClient: Send + Sync {
    fn create_job(&self, job: &Job) -> impl Future<Output = Result<()>> + Send;

    fn job_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<JobSnapshot>> + Send;

    /// Names of the pods the job controller created for `name`.
    fn job_pods(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: Option<i64>,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Delete the job and, in the background, its pods.
    fn delete_job(&self, namespace: &str, name: &str) -> impl Future<Output = Result<()>> + Send;
}

/// [`JobClient`] backed by a `kube::Client`.
#[derive(Clone)]
pub struct KubeJobClient {
    client: Client,
}

impl KubeJobClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster config or the local kubeconfig.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl JobClient for KubeJobClient {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let namespace = job
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| KubeError::InvalidTemplate("job has no namespace".into()))?;
        self.jobs(namespace)
            .create(&PostParams::default(), job)
            .await?;
        tracing::info!(
            namespace,
            name = job.metadata.name.as_deref().unwrap_or_default(),
            "created job"
        );
        Ok(())
    }

    async fn job_snapshot(&self, namespace: &str, name: &str) -> Result<JobSnapshot> {
        let job = self
            .jobs(namespace)
            .get(name)
            .await
            .map_err(|e| KubeError::from_get(e, namespace, name))?;
        Ok(JobSnapshot::from_job(&job))
    }

    async fn job_pods(&self, namespace: &str, name: &str) -> Result<Vec<String>> {
        let selector = format!("job-name={name}");
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;
        let mut names: Vec<String> = pods
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: Option<i64>) -> Result<String> {
        let params = LogParams {
            tail_lines,
            ..Default::default()
        };
        Ok(self.pods(namespace).logs(pod, &params).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        self.jobs(namespace)
            .delete(name, &params)
            .await
            .map_err(|e| KubeError::from_get(e, namespace, name))?;
        tracing::info!(namespace, name, "deleted job");
        Ok(())
    }
}
