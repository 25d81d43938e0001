//! Instance pool and resource numbering
//!
//! Every instance gets its own copy of the base configuration with ports
//! and name shifted by its index, so instances sharing one host never
//! collide.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::instance::{Instance, InstanceFactory};
use super::state::SharedRunState;
use crate::config::{ConfigError, RunConfig, TargetInfrastructure, NAME_PLACEHOLDER};

/// Configuration owned by a single instance
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstanceConfig {
    pub index: usize,
    /// Base configuration with ports shifted and `container_name` resolved
    pub run: RunConfig,
}

impl InstanceConfig {
    pub fn name(&self) -> &str {
        &self.run.container_name
    }

    pub fn api_port(&self) -> u16 {
        self.run.api_port
    }

    pub fn hec_port(&self) -> u16 {
        self.run.hec_port
    }

    pub fn web_ui_port(&self) -> u16 {
        self.run.web_ui_port
    }
}

fn shift_port(
    base: u16,
    offset: Option<usize>,
    field: &'static str,
    index: usize,
) -> Result<u16, ConfigError> {
    offset
        .and_then(|o| u16::try_from(o).ok())
        .and_then(|o| base.checked_add(o))
        .ok_or(ConfigError::PortOverflow { field, index })
}

/// Substitute the instance index into a `%d` name template
pub fn resolve_name(template: &str, index: usize) -> Result<String, ConfigError> {
    if template.matches(NAME_PLACEHOLDER).count() != 1 {
        return Err(ConfigError::InvalidNameTemplate(template.to_string()));
    }
    Ok(template.replacen(NAME_PLACEHOLDER, &index.to_string(), 1))
}

/// Derive the configuration of instance `index` from the base configuration.
///
/// API and HEC ports are allocated two per instance, the web UI port one per
/// instance starting one above the base.
pub fn derive(base: &RunConfig, index: usize) -> Result<InstanceConfig, ConfigError> {
    let mut run = base.clone();
    run.api_port = shift_port(base.api_port, index.checked_mul(2), "api_port", index)?;
    run.hec_port = shift_port(base.hec_port, index.checked_mul(2), "hec_port", index)?;
    run.web_ui_port = shift_port(base.web_ui_port, index.checked_add(1), "web_ui_port", index)?;
    run.container_name = resolve_name(&base.container_name, index)?;

    Ok(InstanceConfig { index, run })
}

/// Derive one configuration per instance
pub fn derive_all(base: &RunConfig) -> Result<Vec<InstanceConfig>, ConfigError> {
    if base.num_containers < 1 {
        return Err(ConfigError::InvalidContainerCount(base.num_containers));
    }
    (0..base.num_containers).map(|i| derive(base, i)).collect()
}

/// One instance in the pool
#[derive(Clone)]
pub struct PoolMember {
    pub name: String,
    pub instance: Arc<dyn Instance>,
}

/// Fixed-size set of configured instances
pub struct InstancePool {
    members: Vec<PoolMember>,
}

impl InstancePool {
    /// Validate the base configuration and create one configured instance per index
    pub fn build(
        base: &RunConfig,
        state: &Arc<SharedRunState>,
        factory: &dyn InstanceFactory,
    ) -> Result<Self, ConfigError> {
        base.validate()?;

        match base.target() {
            Some(TargetInfrastructure::Container) => {}
            Some(TargetInfrastructure::Server) => {
                return Err(ConfigError::UnsupportedTarget(
                    base.target_infrastructure.clone(),
                ))
            }
            None => {
                return Err(ConfigError::UnknownTarget(
                    base.target_infrastructure.clone(),
                ))
            }
        }

        // Derive everything first so a bad index creates no instance at all
        let configs = derive_all(base)?;
        let mut members = Vec::with_capacity(configs.len());

        for config in configs {
            debug!(
                "Instance {}: api={} hec={} web={}",
                config.name(),
                config.api_port(),
                config.hec_port(),
                config.web_ui_port()
            );
            let name = config.name().to_string();

            let mut instance = factory.create(Arc::clone(state));
            instance.configure(config);
            state.register_instance(name.clone());

            members.push(PoolMember {
                name,
                instance: Arc::from(instance),
            });
        }

        info!("Built pool of {} instances", members.len());
        Ok(Self { members })
    }

    pub fn members(&self) -> &[PoolMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}
