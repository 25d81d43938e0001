//! Test run orchestration
//!
//! A fixed pool of instances drains a shared queue of detections while views
//! watch progress. `OrchestrationManager` owns the run lifecycle.

mod instance;
mod manager;
mod pool;
mod state;
mod view;

pub use instance::factory_for;
pub use manager::OrchestrationManager;
pub use pool::{derive_all, InstanceConfig};
pub use view::{JsonReportView, ProgressView, View};
