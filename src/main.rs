// ABOUTME: sqlrs command-line entry point
// ABOUTME: Parses flags, initializes logging, dispatches commands, maps errors to exit codes

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sqlrs::args::ProcessStdin;
use sqlrs::config::{ExecutionContext, FileConfig, Mode, Overrides};
use sqlrs::console::Console;
use sqlrs::pipeline::steps::parse_steps;
use sqlrs::pipeline::PipelineExecutor;
use sqlrs::prepare::{watch_job, WatchOptions};
use sqlrs::remote::RemoteClient;
use sqlrs::wsl::{converter_for, WslExe};
use sqlrs::{commands, CliError};

#[derive(Parser)]
#[command(
    name = "sqlrs",
    about = "Prepare, run and tear down PostgreSQL instances on a provisioning engine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SQLRS_CONFIG")]
    config: Option<PathBuf>,

    /// Execution mode: local or remote
    #[arg(long, global = true)]
    mode: Option<Mode>,

    /// Engine base URL
    #[arg(long, global = true, env = "SQLRS_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token sent to the engine
    #[arg(long, global = true, env = "SQLRS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Workspace root; file arguments must stay inside it
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// How long to wait for a local engine to become healthy, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    startup_timeout: Option<u64>,

    /// Give up watching a prepare job after this many seconds (0 = never)
    #[arg(long, global = true, value_name = "SECS")]
    watch_timeout: Option<u64>,

    /// Debug logging and plain progress output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-attach to a prepare job and wait for it to finish
    Watch { job_id: String },
    /// Delete an instance
    Rm {
        instance_id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List instances
    Ls,
    /// Show engine health
    Status,
    /// prepare:<kind> [args...] [run:<kind> [args...]]
    #[command(external_subcommand)]
    Pipeline(Vec<String>),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "sqlrs=debug" } else { "sqlrs=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_context(cli: &Cli) -> Result<ExecutionContext> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let overrides = Overrides {
        mode: cli.mode,
        endpoint: cli.endpoint.clone(),
        auth_token: cli.token.clone(),
        workspace: cli.workspace.clone(),
        request_timeout_secs: cli.timeout,
        startup_timeout_secs: cli.startup_timeout,
        watch_timeout_secs: cli.watch_timeout,
        verbose: cli.verbose,
    };
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(ExecutionContext::resolve(file, overrides, cwd)?)
}

fn confirm_removal(instance_id: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(format!("Delete instance {}?", instance_id))
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

async fn run(cli: Cli) -> Result<i32> {
    let ctx = load_context(&cli)?;
    debug!(
        "Mode {:?}, endpoint {}, workspace {:?}",
        ctx.mode, ctx.endpoint, ctx.workspace_root
    );

    let client = RemoteClient::new(&ctx)?;
    let console = Console::stdio();

    let code = match cli.command {
        Commands::Watch { job_id } => {
            ensure_ready(&client, &ctx).await?;
            watch_job(&client, &console, WatchOptions::from_context(&ctx), &job_id).await?
        }
        Commands::Rm { instance_id, yes } => {
            if !yes && std::io::stdin().is_terminal() && !confirm_removal(&instance_id)? {
                console.err_line("Aborted");
                return Ok(1);
            }
            ensure_ready(&client, &ctx).await?;
            commands::remove_instance(&client, &console, ctx.verbose, &instance_id).await?
        }
        Commands::Ls => {
            ensure_ready(&client, &ctx).await?;
            commands::list_instances(&client, &console).await?
        }
        Commands::Status => commands::engine_status(&client, &console).await?,
        Commands::Pipeline(tokens) => {
            let steps = parse_steps(&tokens)?;
            let stdin = ProcessStdin::new(ctx.request_timeout);
            let convert = converter_for(&ctx, &WslExe);
            let executor = PipelineExecutor::new(&client, &ctx, &console, &stdin, convert.as_deref());
            // Argument errors must surface before the engine is contacted.
            let planned = executor.plan(steps)?;
            ensure_ready(&client, &ctx).await?;
            executor.run(planned).await?
        }
    };
    Ok(code)
}

/// A local engine may still be starting; remote endpoints are used as-is.
async fn ensure_ready(client: &RemoteClient, ctx: &ExecutionContext) -> Result<(), CliError> {
    if ctx.mode == Mode::Local {
        client.wait_ready(ctx.startup_timeout).await?;
    }
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map(CliError::exit_code)
        .unwrap_or(1)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code(&e)
        }
    };
    std::process::exit(code);
}
