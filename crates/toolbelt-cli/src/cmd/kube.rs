use crate::cmd::{block_on, parse_duration_arg, parse_kv};
use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use std::time::Duration;
use toolbelt_core::config::{Config, KubeConfig};
use toolbelt_kube::{
    collect_job_logs, run_job, wait_for_job, JobClient, JobSnapshot, JobTemplate, KubeJobClient,
    PodLog, WaitOptions,
};

#[derive(Subcommand)]
pub enum KubeSubcommand {
    /// Show a job's phase and pod counts
    Status { job: String },
    /// Block until a job succeeds or fails
    Wait {
        job: String,
        /// Give up after this long (default: kube.wait_timeout_ms)
        #[arg(long, value_parser = parse_duration_arg)]
        timeout: Option<Duration>,
        /// Poll interval (default: kube.poll_interval_ms)
        #[arg(long, value_parser = parse_duration_arg)]
        interval: Option<Duration>,
    },
    /// Print logs from every pod of a job
    Logs {
        job: String,
        /// Only the last N lines of each pod
        #[arg(long)]
        tail: Option<i64>,
    },
    /// Delete a job and its pods
    Delete { job: String },
    /// Create a job, wait for it, and print its logs
    Run {
        job: String,
        #[arg(long)]
        image: String,
        /// Environment variable for the container (repeatable)
        #[arg(long = "env", value_parser = parse_kv)]
        env: Vec<(String, String)>,
        /// Retries before the job is marked failed
        #[arg(long, default_value_t = 0)]
        backoff_limit: i32,
        /// Seconds the finished job is kept before the cluster removes it
        #[arg(long)]
        ttl: Option<i32>,
        #[arg(long, value_parser = parse_duration_arg)]
        timeout: Option<Duration>,
        #[arg(long, value_parser = parse_duration_arg)]
        interval: Option<Duration>,
        #[arg(long)]
        tail: Option<i64>,
        /// Container command and arguments (after --)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

pub fn run(
    root: &Path,
    namespace: Option<String>,
    subcmd: KubeSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let namespace = namespace.unwrap_or_else(|| config.kube.namespace.clone());
    block_on(async {
        let client = KubeJobClient::try_default()
            .await
            .context("failed to connect to the Kubernetes API")?;
        dispatch(&client, &config.kube, &namespace, subcmd, json).await
    })?
}

fn wait_options(kube: &KubeConfig, timeout: Option<Duration>, interval: Option<Duration>) -> WaitOptions {
    WaitOptions {
        poll_interval: interval.unwrap_or(Duration::from_millis(kube.poll_interval_ms)),
        timeout: timeout.unwrap_or(Duration::from_millis(kube.wait_timeout_ms)),
    }
}

async fn dispatch<C: JobClient>(
    client: &C,
    kube: &KubeConfig,
    namespace: &str,
    subcmd: KubeSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        KubeSubcommand::Status { job } => {
            let snap = client.job_snapshot(namespace, &job).await?;
            print_snapshot(&snap, json)
        }
        KubeSubcommand::Wait {
            job,
            timeout,
            interval,
        } => {
            let snap = wait_for_job(client, namespace, &job, wait_options(kube, timeout, interval))
                .await?;
            print_snapshot(&snap, json)
        }
        KubeSubcommand::Logs { job, tail } => {
            let logs = collect_job_logs(client, namespace, &job, tail).await?;
            print_logs(&logs, json)
        }
        KubeSubcommand::Delete { job } => {
            client.delete_job(namespace, &job).await?;
            if json {
                print_json(&serde_json::json!({ "deleted": job, "namespace": namespace }))
            } else {
                println!("Deleted job {namespace}/{job}");
                Ok(())
            }
        }
        KubeSubcommand::Run {
            job,
            image,
            env,
            backoff_limit,
            ttl,
            timeout,
            interval,
            tail,
            command,
        } => {
            let mut template = JobTemplate::new(namespace, job, image);
            template.env = env.into_iter().collect();
            template.backoff_limit = Some(backoff_limit);
            template.ttl_seconds_after_finished = ttl;
            if let Some((program, args)) = command.split_first() {
                template.command = vec![program.clone()];
                template.args = args.to_vec();
            }
            let run = run_job(client, &template, wait_options(kube, timeout, interval), tail).await?;
            if json {
                return print_json(&run);
            }
            print_logs(&run.logs, false)?;
            print_snapshot(&run.snapshot, false)
        }
    }
}

fn print_snapshot(snap: &JobSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(snap);
    }
    print_table(
        &["JOB", "PHASE", "ACTIVE", "SUCCEEDED", "FAILED", "STARTED", "MESSAGE"],
        vec![vec![
            format!("{}/{}", snap.namespace, snap.name),
            snap.phase.as_str().to_string(),
            snap.active.to_string(),
            snap.succeeded.to_string(),
            snap.failed.to_string(),
            or_dash(snap.started_at.map(|t| t.format("%Y-%m-%d %H:%M:%S"))),
            or_dash(snap.message.as_deref()),
        ]],
    );
    Ok(())
}

fn print_logs(logs: &[PodLog], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&logs);
    }
    if logs.is_empty() {
        println!("No pods found.");
    }
    for entry in logs {
        println!("==> {} <==", entry.pod);
        print!("{}", entry.log);
        if !entry.log.is_empty() && !entry.log.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbelt_kube::fake::FakeJobClient;
    use toolbelt_kube::JobPhase;

    fn fast_config() -> KubeConfig {
        KubeConfig {
            poll_interval_ms: 5,
            wait_timeout_ms: 5_000,
            ..KubeConfig::default()
        }
    }

    #[test]
    fn wait_options_prefer_flags() {
        let kube = KubeConfig::default();
        let opts = wait_options(&kube, Some(Duration::from_secs(9)), None);
        assert_eq!(opts.timeout, Duration::from_secs(9));
        assert_eq!(opts.poll_interval, Duration::from_millis(kube.poll_interval_ms));
    }

    #[tokio::test]
    async fn run_splits_command_into_command_and_args() {
        let fake = FakeJobClient::new();
        fake.script("ci", "seed", [JobPhase::Running, JobPhase::Succeeded]);
        let subcmd = KubeSubcommand::Run {
            job: "seed".into(),
            image: "busybox:1.36".into(),
            env: vec![("MODE".into(), "fast".into())],
            backoff_limit: 2,
            ttl: Some(60),
            timeout: None,
            interval: None,
            tail: None,
            command: vec!["sh".into(), "-c".into(), "echo seeded".into()],
        };
        dispatch(&fake, &fast_config(), "ci", subcmd, true)
            .await
            .unwrap();

        let created = fake.created();
        let spec = created[0].spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(2));
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.command.as_deref(), Some(&["sh".to_string()][..]));
        assert_eq!(
            container.args.as_deref(),
            Some(&["-c".to_string(), "echo seeded".to_string()][..])
        );
    }

    #[tokio::test]
    async fn failed_job_surfaces_as_error() {
        let fake = FakeJobClient::new();
        fake.script("ci", "bad", [JobPhase::Failed]);
        let subcmd = KubeSubcommand::Wait {
            job: "bad".into(),
            timeout: None,
            interval: None,
        };
        let err = dispatch(&fake, &fast_config(), "ci", subcmd, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed"), "{err}");
    }
}
