use clap::Parser;
use lroctl_core::{
    Config, OperationRef, Poller, RetrySchedule, StageSpec, StagedPoller, Tracker, WaitOptions,
    Waiter, WithResourcePoller, WithoutResourcePoller, trace_polls_enabled,
};
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod error;
mod http;
mod output;

use cli::{Cli, Commands, ConfigCommands, WaitArgs};
use error::{LroctlError, Result};
use http::HttpOperations;
use output::print_output;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity level
    init_tracing(cli.verbose);

    let code = match execute_command(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            e.print_diagnostic(trace_polls_enabled());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: u8) {
    // Check for RUST_LOG env var first, then fall back to verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "lroctl=warn,lroctl_core=warn",
            1 => "lroctl=info,lroctl_core=info",
            2 => "lroctl=debug,lroctl_core=debug",
            _ => "lroctl=trace,lroctl_core=trace",
        };
        tracing_subscriber::EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .init();

    debug!("Tracing initialized with verbosity level: {}", verbose);
}

/// Explicit `--config-file`, else the default location
fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config_file {
        Some(config_file) => Ok(PathBuf::from(config_file)),
        None => Ok(Config::config_path()?),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = config_path(cli)?;
    debug!("Loading config from {:?}", path);
    Ok(Config::load_from_path(&path)?)
}

async fn execute_command(cli: &Cli) -> Result<()> {
    trace!("Executing command: {:?}", cli.command);

    let start = std::time::Instant::now();
    let result = match &cli.command {
        Commands::Wait(args) => execute_wait(cli, args).await,
        Commands::Config(ConfigCommands::Path) => {
            println!("{}", config_path(cli)?.display());
            Ok(())
        }
        Commands::Config(ConfigCommands::Show) => {
            let config = load_config(cli)?;
            print_output(&config, cli.output)?;
            Ok(())
        }
    };

    debug!("Command finished in {:?}", start.elapsed());
    result
}

/// Parse `KEY` or `KEY=MESSAGE` stage declarations
fn parse_stages(raw: &[String]) -> Result<Vec<StageSpec>> {
    raw.iter()
        .map(|entry| {
            let (key, message) = entry
                .split_once('=')
                .unwrap_or((entry.as_str(), entry.as_str()));
            if key.trim().is_empty() {
                return Err(LroctlError::InvalidInput {
                    message: format!("Stage '{}' has an empty key", entry),
                });
            }
            Ok(StageSpec::new(key.trim(), message.trim()))
        })
        .collect()
}

/// Merge the config file schedule with command-line overrides
fn effective_schedule(config: &Config, args: &WaitArgs) -> Result<RetrySchedule> {
    let mut schedule = config.schedule.clone();
    schedule.apply_overrides(args.timeout, args.poll_interval, args.max_attempts);
    schedule.validate()?;
    Ok(schedule)
}

async fn execute_wait(cli: &Cli, args: &WaitArgs) -> Result<()> {
    let format = cli.output;
    let operation: OperationRef = args.operation.parse()?;

    // --async never touches the config file
    if args.no_wait {
        info!("Not waiting for operation {}", operation);
        let mut reference = serde_json::json!({ "name": operation.to_string() });
        if operation.base.is_some() {
            reference["selfLink"] = Value::String(operation.self_link());
        }
        print_output(&reference, format)?;
        return Ok(());
    }

    let config = load_config(cli)?;

    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| operation.base.clone())
        .ok_or_else(|| LroctlError::InvalidInput {
            message: "--endpoint is required when OPERATION is not a full URL".to_string(),
        })?;
    let service = HttpOperations::new(&endpoint)?;

    let schedule = effective_schedule(&config, args)?;
    let stages = parse_stages(&args.stages)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Received ctrl-c, cancelling wait");
            on_ctrl_c.cancel();
        }
    });

    let waiter = Waiter::new(
        WaitOptions::default()
            .with_schedule(schedule)
            .with_retry_budget(config.retry_budget.clone())
            .with_cancellation(cancel),
    );
    let style = args.progress.unwrap_or(config.progress.style);
    let mut tracker = Tracker::stderr(style);
    let message = args
        .message
        .clone()
        .unwrap_or_else(|| format!("Waiting for operation [{}]", operation));

    info!("Waiting for operation {} at {}", operation, service.endpoint());
    let result = if args.resource {
        let poller = WithResourcePoller::<_, _, Value>::new(service.clone(), service);
        run_wait(&waiter, poller, stages, &operation, &message, &mut tracker).await?
    } else {
        let poller = WithoutResourcePoller::new(service);
        let snapshot = run_wait(&waiter, poller, stages, &operation, &message, &mut tracker).await?;
        serde_json::to_value(snapshot).map_err(|e| LroctlError::OutputError {
            message: e.to_string(),
        })?
    };

    print_output(&result, format)?;
    Ok(())
}

/// Wait with or without declared stages
async fn run_wait<P: Poller>(
    waiter: &Waiter,
    poller: P,
    stages: Vec<StageSpec>,
    operation: &OperationRef,
    message: &str,
    tracker: &mut Tracker,
) -> Result<P::Output> {
    if stages.is_empty() {
        return Ok(waiter.wait_for(&poller, operation, message, tracker).await?);
    }
    let staged = StagedPoller::new(poller, stages);
    let hook = staged.hook();
    Ok(waiter
        .wait_for_with_hook(&staged, operation, message, tracker, &hook)
        .await?)
}
