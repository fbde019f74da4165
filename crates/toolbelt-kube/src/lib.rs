pub mod client;
pub mod error;
pub mod fake;
pub mod job;
pub mod wait;

pub use client::{JobClient, KubeJobClient};
pub use error::{KubeError, Result};
pub use job::{JobPhase, JobSnapshot, JobTemplate};
pub use wait::{collect_job_logs, run_job, wait_for_job, JobRun, PodLog, WaitOptions};
