use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;

use crate::error::{KubeError, Result};

/// Label stamped on every job and pod this crate creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "toolbelt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Running => "running",
            JobPhase::Succeeded => "succeeded",
            JobPhase::Failed => "failed",
        }
    }
}

/// Point-in-time view of a Job, flattened from its status block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub namespace: String,
    pub name: String,
    pub phase: JobPhase,
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Message of the terminal condition, if any.
    pub message: Option<String>,
}

impl JobSnapshot {
    pub fn from_job(job: &Job) -> Self {
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let name = job.metadata.name.clone().unwrap_or_default();
        let status = job.status.clone().unwrap_or_default();

        let active = status.active.unwrap_or(0);
        let succeeded = status.succeeded.unwrap_or(0);
        let failed = status.failed.unwrap_or(0);

        let conditions = status.conditions.unwrap_or_default();
        let terminal = conditions
            .iter()
            .filter(|c| c.status == "True")
            .find_map(|c| match c.type_.as_str() {
                "Complete" => Some((JobPhase::Succeeded, c)),
                "Failed" => Some((JobPhase::Failed, c)),
                _ => None,
            });

        let (phase, message) = match terminal {
            Some((phase, cond)) => (
                phase,
                cond.message.clone().or_else(|| cond.reason.clone()),
            ),
            None if active > 0 => (JobPhase::Running, None),
            None => (JobPhase::Pending, None),
        };

        Self {
            namespace,
            name,
            phase,
            active,
            succeeded,
            failed,
            started_at: status.start_time.map(|t| t.0),
            completed_at: status.completion_time.map(|t| t.0),
            message,
        }
    }
}

/// Declarative description of a one-container batch Job.
#[derive(Debug, Clone, Default)]
pub struct JobTemplate {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub backoff_limit: Option<i32>,
    pub ttl_seconds_after_finished: Option<i32>,
    pub active_deadline_seconds: Option<i64>,
}

impl JobTemplate {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            image: image.into(),
            backoff_limit: Some(0),
            ..Default::default()
        }
    }

    pub fn build(&self) -> Result<Job> {
        if self.name.trim().is_empty() {
            return Err(KubeError::InvalidTemplate("name is empty".into()));
        }
        if self.image.trim().is_empty() {
            return Err(KubeError::InvalidTemplate("image is empty".into()));
        }

        let mut labels = self.labels.clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

        let env: Vec<EnvVar> = self
            .env
            .iter()
            .map(|(k, v)| EnvVar {
                name: k.clone(),
                value: Some(v.clone()),
                ..Default::default()
            })
            .collect();

        let container = Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            command: (!self.command.is_empty()).then(|| self.command.clone()),
            args: (!self.args.is_empty()).then(|| self.args.clone()),
            env: (!env.is_empty()).then_some(env),
            ..Default::default()
        };

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: self.backoff_limit,
                ttl_seconds_after_finished: self.ttl_seconds_after_finished,
                active_deadline_seconds: self.active_deadline_seconds,
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn job_with_status(status: JobStatus) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("migrate".into()),
                namespace: Some("ci".into()),
                ..Default::default()
            },
            status: Some(status),
            ..Default::default()
        }
    }

    fn condition(type_: &str, status: &str, message: Option<&str>) -> JobCondition {
        JobCondition {
            type_: type_.into(),
            status: status.into(),
            message: message.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn no_status_is_pending() {
        let job = Job {
            metadata: ObjectMeta {
                name: Some("fresh".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let snap = JobSnapshot::from_job(&job);
        assert_eq!(snap.phase, JobPhase::Pending);
        assert_eq!(snap.name, "fresh");
        assert_eq!(snap.active, 0);
    }

    #[test]
    fn active_pods_mean_running() {
        let snap = JobSnapshot::from_job(&job_with_status(JobStatus {
            active: Some(1),
            ..Default::default()
        }));
        assert_eq!(snap.phase, JobPhase::Running);
        assert!(!snap.phase.is_terminal());
    }

    #[test]
    fn complete_condition_means_succeeded() {
        let started = Utc::now();
        let snap = JobSnapshot::from_job(&job_with_status(JobStatus {
            succeeded: Some(1),
            start_time: Some(Time(started)),
            completion_time: Some(Time(started)),
            conditions: Some(vec![condition("Complete", "True", None)]),
            ..Default::default()
        }));
        assert_eq!(snap.phase, JobPhase::Succeeded);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.started_at, Some(started));
        assert_eq!(snap.namespace, "ci");
    }

    #[test]
    fn failed_condition_carries_message() {
        let snap = JobSnapshot::from_job(&job_with_status(JobStatus {
            failed: Some(1),
            conditions: Some(vec![
                condition("Complete", "False", None),
                condition("Failed", "True", Some("BackoffLimitExceeded")),
            ]),
            ..Default::default()
        }));
        assert_eq!(snap.phase, JobPhase::Failed);
        assert_eq!(snap.message.as_deref(), Some("BackoffLimitExceeded"));
    }

    #[test]
    fn template_builds_never_restarting_job() {
        let mut template = JobTemplate::new("ci", "db-migrate", "migrate:1.4");
        template.command = vec!["/bin/migrate".into()];
        template.args = vec!["up".into()];
        template.env.insert("DB_HOST".into(), "postgres".into());
        template.ttl_seconds_after_finished = Some(300);

        let job = template.build().unwrap();
        assert_eq!(job.metadata.name.as_deref(), Some("db-migrate"));
        assert_eq!(
            job.metadata.labels.as_ref().unwrap()[MANAGED_BY_LABEL],
            MANAGED_BY_VALUE
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("migrate:1.4"));
        assert_eq!(container.command.as_ref().unwrap(), &vec!["/bin/migrate".to_string()]);
        assert_eq!(container.env.as_ref().unwrap()[0].name, "DB_HOST");
    }

    #[test]
    fn template_requires_name_and_image() {
        assert!(matches!(
            JobTemplate::new("ci", "", "img").build(),
            Err(KubeError::InvalidTemplate(_))
        ));
        assert!(matches!(
            JobTemplate::new("ci", "job", " ").build(),
            Err(KubeError::InvalidTemplate(_))
        ));
    }
}
