//! Test instances
//!
//! An instance is one isolated environment that pulls detections from the
//! shared queue and tests them. The manager only knows the `Instance`
//! capability; two implementations ship with the tool.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::pool::InstanceConfig;
use super::state::SharedRunState;
use crate::config::{ConfigError, RunConfig};
use crate::models::{Detection, DetectionResult};
use crate::utils::Timer;

/// One isolated test-execution environment
#[async_trait]
pub trait Instance: Send + Sync {
    /// Hand the instance its configuration. Called once, before setup.
    fn configure(&mut self, config: InstanceConfig);

    /// Bring the environment up
    async fn setup(&self) -> Result<()>;

    /// Test detections from the shared queue until it is empty or the run terminates
    async fn execute(&self) -> Result<()>;
}

/// Creates unconfigured instances bound to a run
pub trait InstanceFactory: Send + Sync {
    fn create(&self, state: Arc<SharedRunState>) -> Box<dyn Instance>;
}

/// Block until the operator presses Enter or the pause is released.
///
/// Only one prompt is shown at a time across all instances.
pub async fn wait_for_operator(state: &SharedRunState, instance: &str, detection: &Detection) {
    let _prompt = state.pause_prompt().lock().await;

    let released = state.pause_released();
    if state.is_interrupted() {
        return;
    }

    println!(
        "[{instance}] Paused after testing '{}'. Press ENTER to continue...",
        detection.name
    );

    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        read = stdin.read_line(&mut line) => {
            if let Err(e) = read {
                warn!("Failed to read from stdin, continuing: {}", e);
            }
        }
        _ = released => {
            debug!("Pause on {} released by shutdown", instance);
        }
    }
}

/// Instance driven by shell commands on the local host.
///
/// `setup_command` runs once, `test_command` once per detection. Both see the
/// instance's resources through environment variables.
pub struct LocalInstance {
    state: Arc<SharedRunState>,
    config: Option<InstanceConfig>,
}

impl LocalInstance {
    pub fn new(state: Arc<SharedRunState>) -> Self {
        Self {
            state,
            config: None,
        }
    }

    fn config(&self) -> Result<&InstanceConfig> {
        self.config
            .as_ref()
            .context("instance used before it was configured")
    }

    fn command(&self, config: &InstanceConfig, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .current_dir(&config.run.repo_path)
            .env("INSTANCE_NAME", config.name())
            .env("INSTANCE_INDEX", config.index.to_string())
            .env("INSTANCE_ADDRESS", &config.run.test_instance_address)
            .env("INSTANCE_IMAGE", &config.run.full_image_path)
            .env("API_PORT", config.api_port().to_string())
            .env("HEC_PORT", config.hec_port().to_string())
            .env("WEB_UI_PORT", config.web_ui_port().to_string())
            .kill_on_drop(true);
        cmd
    }

    async fn test_detection(&self, config: &InstanceConfig, detection: &Detection) -> DetectionResult {
        let name = config.name();
        let Some(script) = config.run.test_command.as_deref() else {
            return DetectionResult::error(detection, name, "no test_command configured");
        };

        let timer = Timer::start(format!("{name}: {}", detection.name));
        let output = self
            .command(config, script)
            .env("DETECTION_NAME", &detection.name)
            .env("DETECTION_ID", &detection.id)
            .env("DETECTION_PATH", &detection.path)
            .output()
            .await;
        let elapsed = timer.stop();

        match output {
            Ok(output) if output.status.success() => DetectionResult::pass(detection, name, elapsed),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("test command exited with {}", output.status));
                DetectionResult::fail(detection, name, elapsed, reason)
            }
            Err(e) => DetectionResult::error(detection, name, format!("failed to run test command: {e}")),
        }
    }
}

#[async_trait]
impl Instance for LocalInstance {
    fn configure(&mut self, config: InstanceConfig) {
        self.config = Some(config);
    }

    async fn setup(&self) -> Result<()> {
        let config = self.config()?;
        if self.state.is_terminated() {
            info!("Skipping setup of {}, run is terminating", config.name());
            return Ok(());
        }

        let Some(script) = config.run.setup_command.as_deref() else {
            return Ok(());
        };

        info!("Setting up {}", config.name());
        let output = self
            .command(config, script)
            .output()
            .await
            .with_context(|| format!("Failed to run setup command for {}", config.name()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "setup command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    async fn execute(&self) -> Result<()> {
        let config = self.config()?;
        let behavior = config.run.post_test_behavior;

        while !self.state.is_terminated() {
            let Some(detection) = self.state.pop() else {
                break;
            };

            let result = if detection.has_tests() {
                self.test_detection(config, &detection).await
            } else {
                DetectionResult::skip(&detection, config.name(), "detection has no tests")
            };
            info!("  {}", result);

            let success = !result.status.is_failure();
            self.state.record_result(result);

            if behavior.should_pause(success) && !self.state.is_terminated() {
                wait_for_operator(&self.state, config.name(), &detection).await;
            }
        }

        debug!("{} finished, {} detections still pending", config.name(), self.state.pending());
        Ok(())
    }
}

/// Builds `LocalInstance`s
pub struct LocalInstanceFactory;

impl LocalInstanceFactory {
    /// Check that the configuration can drive local instances
    pub fn for_config(config: &RunConfig) -> Result<Self, ConfigError> {
        if config.test_command.is_none() {
            return Err(ConfigError::MissingTestCommand);
        }
        Ok(Self)
    }
}

impl InstanceFactory for LocalInstanceFactory {
    fn create(&self, state: Arc<SharedRunState>) -> Box<dyn Instance> {
        Box::new(LocalInstance::new(state))
    }
}

/// Instance used in mock mode: drains the queue recording every detection as skipped
pub struct DryRunInstance {
    state: Arc<SharedRunState>,
    name: String,
}

#[async_trait]
impl Instance for DryRunInstance {
    fn configure(&mut self, config: InstanceConfig) {
        self.name = config.name().to_string();
    }

    async fn setup(&self) -> Result<()> {
        debug!("Mock setup of {}", self.name);
        Ok(())
    }

    async fn execute(&self) -> Result<()> {
        while !self.state.is_terminated() {
            let Some(detection) = self.state.pop() else {
                break;
            };
            self.state
                .record_result(DetectionResult::skip(&detection, &self.name, "mock run"));
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Builds `DryRunInstance`s
pub struct DryRunFactory;

impl InstanceFactory for DryRunFactory {
    fn create(&self, state: Arc<SharedRunState>) -> Box<dyn Instance> {
        Box::new(DryRunInstance {
            state,
            name: String::new(),
        })
    }
}

/// Pick the factory matching the configuration
pub fn factory_for(config: &RunConfig) -> Result<Arc<dyn InstanceFactory>, ConfigError> {
    if config.mock {
        Ok(Arc::new(DryRunFactory))
    } else {
        Ok(Arc::new(LocalInstanceFactory::for_config(config)?))
    }
}
