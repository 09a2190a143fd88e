//! CLI structure and command definitions

use clap::{Args, Parser, Subcommand};
use lroctl_core::TrackerStyle;

use crate::output::OutputFormat;

/// Wait on long-running cloud operations
#[derive(Parser, Debug)]
#[command(name = "lroctl")]
#[command(version, about = "Wait on long-running cloud operations")]
#[command(long_about = "
Wait on long-running cloud operations

Polls an operations endpoint until the operation finishes, showing progress
on stderr and printing the result on stdout.

EXAMPLES:
    # Wait for a zonal operation
    lroctl wait projects/p1/zones/us-central1-a/operations/op-123 \\
        --endpoint https://compute.example.com/compute/v1

    # Fetch the created resource once done
    lroctl wait projects/p1/global/operations/op-9 --endpoint URL --resource

    # Show server-reported steps as stages
    lroctl wait OPERATION --endpoint URL --stage BUILD=Building --stage DEPLOY=Deploying

    # Give up after five minutes, plain progress lines, YAML result
    lroctl wait OPERATION --endpoint URL --timeout 300 --progress lines -o yaml

EXIT CODES:
    0    operation succeeded
    1    operation failed or could not be polled
    2    timed out waiting (the operation may still be running)
    130  interrupted by ctrl-c
")]
pub struct Cli {
    /// Path to alternate configuration file
    #[arg(long, global = true, env = "LROCTL_CONFIG_FILE")]
    pub config_file: Option<String>,

    /// Output format
    #[arg(long, short = 'o', global = true, value_enum, default_value = "json")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wait for an operation to finish
    Wait(WaitArgs),

    /// Configuration file commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Operation name (projects/P/{global|regions/R|zones/Z|locations/L}/operations/ID) or URL
    pub operation: String,

    /// Base URL of the operations API
    ///
    /// Optional when OPERATION is a full URL.
    #[arg(long, env = "LROCTL_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Fetch the resource the operation points at once it finishes
    #[arg(long)]
    pub resource: bool,

    /// Progress message
    #[arg(long)]
    pub message: Option<String>,

    /// Declare a stage fed from the operation's metadata.step (KEY or KEY=MESSAGE)
    #[arg(long = "stage", value_name = "KEY[=MESSAGE]")]
    pub stages: Vec<String>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// First poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_interval: Option<u64>,

    /// Give up after this many retrials
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Print the operation reference and exit without waiting
    #[arg(long = "async")]
    pub no_wait: bool,

    /// Progress presentation
    #[arg(long, value_enum)]
    pub progress: Option<TrackerStyle>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Show the configuration file location
    Path,
}
