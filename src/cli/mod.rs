//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parallel detection test harness
#[derive(Parser, Debug)]
#[command(name = "detection-harness")]
#[command(version)]
#[command(about = "Test detection content in parallel across isolated instances")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run detection tests
    Test(TestArgs),

    /// Show the configuration derived for each instance
    Instances(InstancesArgs),

    /// Manage configuration files
    Config(ConfigArgs),
}

/// Arguments for test command
#[derive(Parser, Debug)]
pub struct TestArgs {
    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of instances testing in parallel
    #[arg(short, long)]
    pub num_containers: Option<usize>,

    /// Post-test behavior (always_pause, pause_on_failure, never_pause)
    #[arg(short, long)]
    pub behavior: Option<String>,

    /// Detection testing mode (all, selected)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Detection file to test, relative to the repository (implies selected mode)
    #[arg(short, long = "detection")]
    pub detections: Vec<PathBuf>,

    /// Record every detection as skipped without running anything
    #[arg(long)]
    pub mock: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Write a JSON report when the run stops
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Also write the formatted results to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Seconds between progress lines
    #[arg(long, default_value = "10")]
    pub progress_interval: u64,
}

/// Arguments for instances command
#[derive(Parser, Debug)]
pub struct InstancesArgs {
    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of instances
    #[arg(short, long)]
    pub num_containers: Option<usize>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "detection-harness.yml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        /// Configuration file (defaults to the first one found)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show environment overrides instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Check a configuration file
    Validate {
        /// Configuration file (defaults to the first one found)
        file: Option<PathBuf>,
    },
}
