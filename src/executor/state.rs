//! State shared by every participant of a test run
//!
//! The manager, all instances and all views hold the same
//! `Arc<SharedRunState>`. Locks are never held across an await point.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::models::{
    Completion, Detection, DetectionResult, Failure, InstanceState, Phase, RunSummary,
    ViewState,
};

/// Pending queue, termination flag and result sinks of a single run
#[derive(Debug)]
pub struct SharedRunState {
    started_at: DateTime<Utc>,
    queue: Mutex<VecDeque<Detection>>,
    terminated: AtomicBool,
    interrupted: AtomicBool,
    termination: Notify,
    pause_release: Notify,
    pause_prompt: tokio::sync::Mutex<()>,
    instances: Mutex<Vec<(String, InstanceState)>>,
    views: Mutex<Vec<(String, ViewState)>>,
    results: Mutex<Vec<DetectionResult>>,
    failures: Mutex<Vec<Failure>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking worker must not take the whole run state down with it
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedRunState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            queue: Mutex::new(VecDeque::new()),
            terminated: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            termination: Notify::new(),
            pause_release: Notify::new(),
            pause_prompt: tokio::sync::Mutex::new(()),
            instances: Mutex::new(Vec::new()),
            views: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    // ---- pending queue ----

    /// Replace the pending queue with the given content, keeping its order
    pub fn install_content(&self, content: Vec<Detection>) {
        let mut queue = lock(&self.queue);
        *queue = content.into();
        debug!("Installed {} detections into the pending queue", queue.len());
    }

    /// Take the next pending detection
    pub fn pop(&self) -> Option<Detection> {
        lock(&self.queue).pop_front()
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    // ---- termination ----

    /// Set the termination flag. Returns true only for the call that flipped it.
    pub fn mark_terminated(&self) -> bool {
        let first = !self.terminated.swap(true, Ordering::SeqCst);
        if first {
            info!("Test run is terminating");
        }
        self.termination.notify_waiters();
        first
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Resolves once the termination flag is set
    pub async fn terminated(&self) {
        loop {
            let notified = self.termination.notified();
            if self.is_terminated() {
                return;
            }
            notified.await;
        }
    }

    /// Record an operator interrupt and terminate the run
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.mark_terminated();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    // ---- interactive pause ----

    /// Serializes pause prompts so only one instance prompts at a time
    pub(crate) fn pause_prompt(&self) -> &tokio::sync::Mutex<()> {
        &self.pause_prompt
    }

    /// Future completing on the next `release_pauses` call
    pub fn pause_released(&self) -> Notified<'_> {
        self.pause_release.notified()
    }

    /// Unblock every pause prompt currently waiting for the operator
    pub fn release_pauses(&self) {
        self.pause_release.notify_waiters();
    }

    // ---- lifecycle tables ----

    pub fn register_instance(&self, name: impl Into<String>) {
        lock(&self.instances).push((name.into(), InstanceState::Configured));
    }

    pub fn set_instance_state(&self, name: &str, state: InstanceState) {
        let mut instances = lock(&self.instances);
        if let Some(entry) = instances.iter_mut().find(|(n, _)| n == name) {
            debug!("Instance {} is now {}", name, state);
            entry.1 = state;
        }
    }

    pub fn instance_states(&self) -> Vec<(String, InstanceState)> {
        lock(&self.instances).clone()
    }

    pub fn register_view(&self, name: impl Into<String>) {
        lock(&self.views).push((name.into(), ViewState::Uninitialized));
    }

    pub fn set_view_state(&self, name: &str, state: ViewState) {
        if let Some(entry) = lock(&self.views).iter_mut().find(|(n, _)| n == name) {
            entry.1 = state;
        }
    }

    pub fn view_states(&self) -> Vec<(String, ViewState)> {
        lock(&self.views).clone()
    }

    // ---- sinks ----

    pub fn record_result(&self, result: DetectionResult) {
        lock(&self.results).push(result);
    }

    pub fn record_failure(&self, failure: Failure) {
        lock(&self.failures).push(failure);
    }

    pub fn results(&self) -> Vec<DetectionResult> {
        lock(&self.results).clone()
    }

    pub fn failures(&self) -> Vec<Failure> {
        lock(&self.failures).clone()
    }

    pub fn completed(&self) -> usize {
        lock(&self.results).len()
    }

    /// How the run ended, as far as the state can tell
    pub fn completion(&self) -> Completion {
        if self.is_interrupted() {
            Completion::Interrupted
        } else if lock(&self.failures)
            .iter()
            .any(|f| f.is_instance_failure() && f.phase == Phase::InstanceSetup)
        {
            Completion::SetupFailed
        } else {
            Completion::Finished
        }
    }

    /// Snapshot of the run so far
    pub fn summary(&self) -> RunSummary {
        RunSummary::new(
            self.started_at,
            self.completion(),
            self.pending(),
            self.failures(),
            self.results(),
        )
    }
}

impl Default for SharedRunState {
    fn default() -> Self {
        Self::new()
    }
}
