//! Configuration module
//!
//! Defines the base run configuration shared by every test instance,
//! together with the policies that shape a run.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{find_config, is_yaml_file};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Above this many parallel instances a resource warning is logged
pub const MAX_RECOMMENDED_CONTAINERS: usize = 2;

/// Placeholder substituted with the instance index in name templates
pub const NAME_PLACEHOLDER: &str = "%d";

/// Configuration errors. All of them are fatal and raised before any worker starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("num_containers must be at least 1, not {0}")]
    InvalidContainerCount(usize),

    #[error("container name template '{0}' must contain exactly one '%d'")]
    InvalidNameTemplate(String),

    #[error("{field} overflows for instance {index}")]
    PortOverflow { field: &'static str, index: usize },

    #[error("target infrastructure '{0}' is not supported yet")]
    UnsupportedTarget(String),

    #[error("unrecognized target infrastructure '{0}'")]
    UnknownTarget(String),

    #[error("mode is 'selected' but detections_list was not provided")]
    MissingDetectionsList,

    #[error("detections_list must be empty under mode '{mode}', found {count} entries")]
    UnexpectedDetectionsList { mode: DetectionTestingMode, count: usize },

    #[error("image '{0}' does not include a tag")]
    UntaggedImage(String),

    #[error("test_instance_address '{0}' must not include a protocol")]
    AddressWithProtocol(String),

    #[error("test_command is required unless mock mode is enabled")]
    MissingTestCommand,

    #[error("view name '{0}' is used more than once")]
    DuplicateViewName(String),
}

/// Where test instances are launched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetInfrastructure {
    Container,
    Server,
}

impl TargetInfrastructure {
    pub fn name(&self) -> &'static str {
        match self {
            TargetInfrastructure::Container => "container",
            TargetInfrastructure::Server => "server",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<TargetInfrastructure> {
        match s.to_lowercase().as_str() {
            "container" | "docker" => Some(TargetInfrastructure::Container),
            "server" => Some(TargetInfrastructure::Server),
            _ => None,
        }
    }
}

impl fmt::Display for TargetInfrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What an instance does after a test has completed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostTestBehavior {
    AlwaysPause,
    PauseOnFailure,
    NeverPause,
}

impl PostTestBehavior {
    pub fn name(&self) -> &'static str {
        match self {
            PostTestBehavior::AlwaysPause => "always_pause",
            PostTestBehavior::PauseOnFailure => "pause_on_failure",
            PostTestBehavior::NeverPause => "never_pause",
        }
    }

    pub fn from_str(s: &str) -> Option<PostTestBehavior> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "always_pause" | "always" => Some(PostTestBehavior::AlwaysPause),
            "pause_on_failure" | "on_failure" => Some(PostTestBehavior::PauseOnFailure),
            "never_pause" | "never" => Some(PostTestBehavior::NeverPause),
            _ => None,
        }
    }

    /// Whether this policy can ever block on an interactive prompt
    pub fn may_pause(&self) -> bool {
        !matches!(self, PostTestBehavior::NeverPause)
    }

    /// Whether a test with the given outcome should pause afterwards
    pub fn should_pause(&self, success: bool) -> bool {
        match self {
            PostTestBehavior::AlwaysPause => true,
            PostTestBehavior::PauseOnFailure => !success,
            PostTestBehavior::NeverPause => false,
        }
    }
}

impl fmt::Display for PostTestBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which detections are queued for testing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionTestingMode {
    All,
    Selected,
}

impl DetectionTestingMode {
    pub fn name(&self) -> &'static str {
        match self {
            DetectionTestingMode::All => "all",
            DetectionTestingMode::Selected => "selected",
        }
    }

    pub fn from_str(s: &str) -> Option<DetectionTestingMode> {
        match s.to_lowercase().as_str() {
            "all" => Some(DetectionTestingMode::All),
            "selected" => Some(DetectionTestingMode::Selected),
            _ => None,
        }
    }
}

impl fmt::Display for DetectionTestingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Base configuration for a test run.
///
/// Read-only to the orchestration manager. Each instance receives its own
/// derived copy with ports and name shifted by its index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Root of the content repository
    pub repo_path: PathBuf,

    /// Record every detection as skipped instead of running it
    pub mock: bool,

    /// Kind of infrastructure the instances run on (container, server)
    pub target_infrastructure: String,

    /// Image used for container instances
    pub full_image_path: String,

    /// Instance name template, `%d` is replaced by the instance index
    pub container_name: String,

    /// What to do after each test
    pub post_test_behavior: PostTestBehavior,

    /// Which detections to test
    pub mode: DetectionTestingMode,

    /// Paths (relative to `repo_path`) tested under `selected` mode
    pub detections_list: Option<Vec<PathBuf>>,

    /// Number of instances run in parallel
    pub num_containers: usize,

    /// Management API port, allocated two per instance
    pub api_port: u16,

    /// Event ingestion port, allocated two per instance
    pub hec_port: u16,

    /// Web UI port, one per instance starting one above the base
    pub web_ui_port: u16,

    /// Host the instances are reachable on
    pub test_instance_address: String,

    /// Command run once per instance before any test
    pub setup_command: Option<String>,

    /// Command run for every detection
    pub test_command: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            mock: false,
            target_infrastructure: TargetInfrastructure::Container.name().to_string(),
            full_image_path: "registry.hub.docker.com/splunk/splunk:latest".to_string(),
            container_name: "detection_testing_%d".to_string(),
            post_test_behavior: PostTestBehavior::PauseOnFailure,
            mode: DetectionTestingMode::All,
            detections_list: None,
            num_containers: 1,
            api_port: 8089,
            hec_port: 8088,
            web_ui_port: 8000,
            test_instance_address: "127.0.0.1".to_string(),
            setup_command: None,
            test_command: None,
        }
    }
}

impl RunConfig {
    pub fn with_containers(mut self, num_containers: usize) -> Self {
        self.num_containers = num_containers;
        self
    }

    pub fn with_behavior(mut self, behavior: PostTestBehavior) -> Self {
        self.post_test_behavior = behavior;
        self
    }

    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    pub fn with_selected(mut self, detections: Vec<PathBuf>) -> Self {
        self.mode = DetectionTestingMode::Selected;
        self.detections_list = Some(detections);
        self
    }

    /// Parsed target kind, `None` when the value is not recognized
    pub fn target(&self) -> Option<TargetInfrastructure> {
        TargetInfrastructure::from_str(&self.target_infrastructure)
    }

    /// Check field constraints that do not depend on the environment
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_containers < 1 {
            return Err(ConfigError::InvalidContainerCount(self.num_containers));
        }
        if self.num_containers > MAX_RECOMMENDED_CONTAINERS {
            warn!(
                "Running {} instances in parallel may use a large amount of resources \
                 (suggested maximum is {})",
                self.num_containers, MAX_RECOMMENDED_CONTAINERS
            );
        }

        if self.container_name.matches(NAME_PLACEHOLDER).count() != 1 {
            return Err(ConfigError::InvalidNameTemplate(self.container_name.clone()));
        }

        match (self.mode, &self.detections_list) {
            (DetectionTestingMode::Selected, None) => {
                return Err(ConfigError::MissingDetectionsList)
            }
            // An empty list is still rejected outside selected mode
            (DetectionTestingMode::All, Some(list)) => {
                return Err(ConfigError::UnexpectedDetectionsList {
                    mode: self.mode,
                    count: list.len(),
                })
            }
            _ => {}
        }

        if self.target() != Some(TargetInfrastructure::Server)
            && !self.full_image_path.contains(':')
        {
            return Err(ConfigError::UntaggedImage(self.full_image_path.clone()));
        }

        if self.test_instance_address.starts_with("http") {
            return Err(ConfigError::AddressWithProtocol(
                self.test_instance_address.clone(),
            ));
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            num_containers: 2,
            post_test_behavior: PostTestBehavior::NeverPause,
            setup_command: Some("docker start $INSTANCE_NAME".to_string()),
            test_command: Some("./run_detection_test.sh \"$DETECTION_PATH\"".to_string()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl RunConfig {
    pub fn with_ports(mut self, api: u16, hec: u16, web_ui: u16) -> Self {
        self.api_port = api;
        self.hec_port = hec;
        self.web_ui_port = web_ui;
        self
    }

    pub fn with_name_template(mut self, template: impl Into<String>) -> Self {
        self.container_name = template.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_infrastructure = target.into();
        self
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = Some(command.into());
        self
    }
}
