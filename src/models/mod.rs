//! Data models for detection testing
//!
//! This module contains the data structures shared by the runner, its
//! instances and its views.

mod detection;
mod test_result;

pub use detection::Detection;
pub use test_result::{
    Completion, DetectionResult, Failure, InstanceState, Participant, Phase, RunSummary,
    TestStatus, ViewState,
};
