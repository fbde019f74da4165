mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, file::FileSubcommand, git::GitSubcommand, kube::KubeSubcommand,
    run::RunExit,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "toolbelt",
    about = "Run commands under a hard deadline, plus git, file, and Kubernetes Job helpers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from toolbelt.yaml or .git/)
    #[arg(long, global = true, env = "TOOLBELT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log at info level (RUST_LOG still applies)
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program, killing it and its stray copies when the deadline passes
    Run {
        /// Deadline such as 500ms, 30s, 2m (default: runner.timeout_ms)
        #[arg(long, short = 't', value_parser = cmd::parse_duration_arg)]
        timeout: Option<Duration>,

        /// Capture stdout only and let stderr pass through
        #[arg(long)]
        stdout_only: bool,

        /// Start the program in its own process group and kill the group
        #[arg(long)]
        process_group: bool,

        /// How long to wait for output pipes after a kill
        #[arg(long, value_parser = cmd::parse_duration_arg)]
        kill_grace: Option<Duration>,

        /// Program and arguments (after --)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Resolve programs through PATH
    Which {
        #[arg(required = true)]
        programs: Vec<String>,
    },

    /// Show which of git, kubectl, docker, and helm are installed
    Tools,

    /// Git queries and tagging
    Git {
        #[command(subcommand)]
        subcommand: GitSubcommand,
    },

    /// File inspection helpers
    File {
        #[command(subcommand)]
        subcommand: FileSubcommand,
    },

    /// Kubernetes Job helpers
    Kube {
        /// Namespace (default: kube.namespace)
        #[arg(long, short = 'n', global = true)]
        namespace: Option<String>,

        #[command(subcommand)]
        subcommand: KubeSubcommand,
    },

    /// Show, create, or validate toolbelt.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run {
            timeout,
            stdout_only,
            process_group,
            kill_grace,
            command,
        } => cmd::run::run(
            &root,
            cmd::run::RunArgs {
                timeout,
                stdout_only,
                process_group,
                kill_grace,
                command,
            },
            cli.json,
        ),
        Commands::Which { programs } => cmd::tools::which(&programs, cli.json),
        Commands::Tools => cmd::tools::list(cli.json),
        Commands::Git { subcommand } => cmd::git::run(&root, subcommand, cli.json),
        Commands::File { subcommand } => cmd::file::run(&root, subcommand, cli.json),
        Commands::Kube {
            namespace,
            subcommand,
        } => cmd::kube::run(&root, namespace, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<RunExit>()
            .map(RunExit::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
