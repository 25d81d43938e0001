//! Detection Harness - parallel detection content testing
//!
//! Tests a repository of detection rules across a fixed pool of isolated
//! instances. Every instance pulls detections from one shared queue, so the
//! pool drains the content as fast as its slowest member allows.
//!
//! ## Usage
//!
//! ```bash
//! # Test all detections on two instances
//! detection-harness test --num-containers 2 --behavior never_pause
//!
//! # Test selected detections and keep a JSON report
//! detection-harness test -d detections/endpoint/a.yml --report out/run.json
//!
//! # Show the ports and names each instance would use
//! detection-harness instances --num-containers 4
//!
//! # Write an example configuration
//! detection-harness config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod cli;
mod config;
mod content;
mod executor;
mod models;
mod output;
mod utils;

use cli::Args;
use config::{print_env_help, DetectionTestingMode, EnvConfig, PostTestBehavior, RunConfig};
use content::{ContentLoader, DirectoryLoader};
use executor::{factory_for, JsonReportView, OrchestrationManager, ProgressView, View};
use output::{write_results_to_file, OutputFormat, ResultFormatter};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        args.log_level
            .as_deref()
            .or(env.log_level.as_deref())
            .and_then(LogLevel::from_str)
            .unwrap_or_default()
    };
    init_logger(level);

    match args.command {
        cli::Command::Test(test_args) => {
            let passed = run_tests(test_args, &env).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        cli::Command::Instances(instances_args) => {
            list_instances(instances_args, &env)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, &env)?;
        }
    }

    Ok(())
}

/// Load the base configuration: explicit file, then environment, then discovery
fn load_config(path: Option<&Path>, env: &EnvConfig) -> Result<RunConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    let mut config = match path {
        Some(path) => RunConfig::load(&path)?,
        None => RunConfig::load_default()?,
    };
    env.apply(&mut config);
    Ok(config)
}

fn resolve_format(flag: Option<&str>, env: &EnvConfig) -> Result<OutputFormat> {
    match flag.or(env.format.as_deref()) {
        Some(name) => {
            OutputFormat::from_str(name).ok_or_else(|| anyhow::anyhow!("Unknown output format: {name}"))
        }
        None => Ok(OutputFormat::Table),
    }
}

/// Run the orchestration. Returns whether the run passed.
async fn run_tests(args: cli::TestArgs, env: &EnvConfig) -> Result<bool> {
    let mut config = load_config(args.config.as_deref(), env)?;

    if let Some(n) = args.num_containers {
        config = config.with_containers(n);
    }
    if let Some(behavior) = &args.behavior {
        let behavior = PostTestBehavior::from_str(behavior)
            .ok_or_else(|| anyhow::anyhow!("Unknown post-test behavior: {behavior}"))?;
        config = config.with_behavior(behavior);
    }
    if let Some(mode) = &args.mode {
        config.mode = DetectionTestingMode::from_str(mode)
            .ok_or_else(|| anyhow::anyhow!("Unknown detection testing mode: {mode}"))?;
    }
    if !args.detections.is_empty() {
        config = config.with_selected(args.detections.clone());
    }
    if args.mock {
        config = config.with_mock(true);
    }

    let format = resolve_format(args.format.as_deref(), env)?;

    info!(
        "Testing {} with {} instances ({} mode, {})",
        config.repo_path.display(),
        config.num_containers,
        config.mode,
        config.post_test_behavior
    );
    if config.mock {
        warn!("Mock run: detections are recorded as skipped and nothing is executed");
    }

    let content = DirectoryLoader::new()
        .load(&config)
        .context("Failed to load detection content")?;
    let factory = factory_for(&config)?;

    let mut views: Vec<Arc<dyn View>> = vec![Arc::new(ProgressView::new(Duration::from_secs(
        args.progress_interval.max(1),
    )))];
    if let Some(report) = args.report {
        views.push(Arc::new(JsonReportView::new(report)));
    }

    let mut manager = OrchestrationManager::new(factory);
    manager.setup(&config, content, views).await?;
    let state = manager.execute().await?;

    let summary = state.summary();
    let formatter = ResultFormatter::new(format);
    println!("{}", formatter.format_summary(&summary)?);

    if let Some(path) = args.output {
        write_results_to_file(&path, &summary, format)?;
        println!("Results written to: {}", path.display());
    }

    Ok(!summary.has_failures())
}

fn list_instances(args: cli::InstancesArgs, env: &EnvConfig) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), env)?;
    if let Some(n) = args.num_containers {
        config = config.with_containers(n);
    }

    let configs = executor::derive_all(&config)?;
    let formatter = ResultFormatter::new(resolve_format(args.format.as_deref(), env)?);
    println!("{}", formatter.format_instances(&configs)?);

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            RunConfig::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show {
            config,
            env: show_env,
            format,
        } => {
            if show_env {
                env.print_summary();
                println!();
                print_env_help();
            } else {
                let config = load_config(config.as_deref(), env)?;
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(config::find_config)
                .unwrap_or_else(|| PathBuf::from("./detection-harness.yml"));

            match RunConfig::load(&path).and_then(|c| c.validate().map_err(Into::into)) {
                Ok(()) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_format() {
        let env = EnvConfig::default();
        assert_eq!(resolve_format(None, &env).unwrap(), OutputFormat::Table);
        assert_eq!(resolve_format(Some("csv"), &env).unwrap(), OutputFormat::Csv);
        assert!(resolve_format(Some("xml"), &env).is_err());

        let env = EnvConfig {
            format: Some("json".to_string()),
            ..EnvConfig::default()
        };
        assert_eq!(resolve_format(None, &env).unwrap(), OutputFormat::Json);
        assert_eq!(resolve_format(Some("summary"), &env).unwrap(), OutputFormat::Summary);
    }

    #[test]
    fn test_load_config_applies_env_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.yml");
        RunConfig::default().with_containers(1).save(&path).unwrap();

        let env = EnvConfig {
            num_containers: Some(4),
            mock: Some(true),
            ..EnvConfig::default()
        };
        let config = load_config(Some(path.as_path()), &env).unwrap();
        assert_eq!(config.num_containers, 4);
        assert!(config.mock);
    }

    #[tokio::test]
    async fn test_mock_run_passes() {
        let dir = tempdir().unwrap();
        let detections = dir.path().join("detections");
        std::fs::create_dir_all(&detections).unwrap();
        std::fs::write(detections.join("a.yml"), "name: a\ntests:\n  - name: tp\n").unwrap();

        let config_path = dir.path().join("run.yml");
        let mut config = RunConfig::default()
            .with_behavior(PostTestBehavior::NeverPause)
            .with_mock(true);
        config.repo_path = dir.path().to_path_buf();
        config.save(&config_path).unwrap();

        let report = dir.path().join("report.json");
        let args = cli::TestArgs {
            config: Some(config_path),
            num_containers: Some(2),
            behavior: None,
            mode: None,
            detections: vec![],
            mock: false,
            format: Some("summary".to_string()),
            report: Some(report.clone()),
            output: None,
            progress_interval: 60,
        };

        assert!(run_tests(args, &EnvConfig::default()).await.unwrap());

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(written["skipped"], 1);
    }
}
