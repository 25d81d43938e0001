//! Environment variable configuration
//!
//! Provides environment variable overrides for the run configuration.

use std::env;
use tracing::warn;

use super::{DetectionTestingMode, PostTestBehavior, RunConfig};

/// Environment variable prefix
const ENV_PREFIX: &str = "DETECTION_HARNESS";

/// Overrides read from DETECTION_HARNESS_* variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from DETECTION_HARNESS_CONFIG
    pub config_file: Option<String>,
    /// Instance count from DETECTION_HARNESS_NUM_CONTAINERS
    pub num_containers: Option<usize>,
    /// Post-test behavior from DETECTION_HARNESS_BEHAVIOR
    pub behavior: Option<String>,
    /// Testing mode from DETECTION_HARNESS_MODE
    pub mode: Option<String>,
    /// Mock flag from DETECTION_HARNESS_MOCK
    pub mock: Option<bool>,
    /// Output format from DETECTION_HARNESS_FORMAT
    pub format: Option<String>,
    /// Log level from DETECTION_HARNESS_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG"),
            num_containers: get_env_parse("NUM_CONTAINERS"),
            behavior: get_env("BEHAVIOR"),
            mode: get_env("MODE"),
            mock: get_env_bool("MOCK"),
            format: get_env("FORMAT"),
            log_level: get_env("LOG"),
        }
    }

    /// Apply the overrides that map onto the run configuration
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(n) = self.num_containers {
            config.num_containers = n;
        }
        if let Some(behavior) = &self.behavior {
            match PostTestBehavior::from_str(behavior) {
                Some(b) => config.post_test_behavior = b,
                None => warn!("Ignoring unknown {ENV_PREFIX}_BEHAVIOR value '{behavior}'"),
            }
        }
        if let Some(mode) = &self.mode {
            match DetectionTestingMode::from_str(mode) {
                Some(m) => config.mode = m,
                None => warn!("Ignoring unknown {ENV_PREFIX}_MODE value '{mode}'"),
            }
        }
        if let Some(mock) = self.mock {
            config.mock = mock;
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_CONFIG:          {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_NUM_CONTAINERS:  {:?}", ENV_PREFIX, self.num_containers);
        println!("  {}_BEHAVIOR:        {:?}", ENV_PREFIX, self.behavior);
        println!("  {}_MODE:            {:?}", ENV_PREFIX, self.mode);
        println!("  {}_MOCK:            {:?}", ENV_PREFIX, self.mock);
        println!("  {}_FORMAT:          {:?}", ENV_PREFIX, self.format);
        println!("  {}_LOG:             {:?}", ENV_PREFIX, self.log_level);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn num_containers(mut self, n: usize) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_NUM_CONTAINERS"), n.to_string()));
        self
    }

    pub fn mock(mut self, mock: bool) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_MOCK"), mock.to_string()));
        self
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all DETECTION_HARNESS environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG          Path to configuration file");
    println!("  {ENV_PREFIX}_NUM_CONTAINERS  Number of parallel test instances");
    println!("  {ENV_PREFIX}_BEHAVIOR        always_pause, pause_on_failure, never_pause");
    println!("  {ENV_PREFIX}_MODE            all, selected");
    println!("  {ENV_PREFIX}_MOCK            Record detections as skipped (true/false)");
    println!("  {ENV_PREFIX}_FORMAT          Output format (table, json, csv, summary)");
    println!("  {ENV_PREFIX}_LOG             Log level (trace, debug, info, warn, error)");
}
