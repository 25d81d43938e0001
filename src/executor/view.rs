//! Views observe a run without taking part in its outcome

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

use super::state::SharedRunState;
use crate::models::InstanceState;

/// Observer of run progress.
///
/// `setup` may run for the whole run; `stop` is called exactly once, after the
/// termination flag is set.
#[async_trait]
pub trait View: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self, state: Arc<SharedRunState>) -> Result<()>;

    async fn stop(&self, state: Arc<SharedRunState>) -> Result<()>;
}

/// Logs a progress line at a fixed interval until the run ends
pub struct ProgressView {
    interval: Duration,
    stopped: AtomicBool,
    stop_signal: Notify,
}

impl ProgressView {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    fn report(state: &SharedRunState) {
        let instances = state.instance_states();
        let running = instances
            .iter()
            .filter(|(_, s)| *s == InstanceState::Executing)
            .count();
        let failed = state.results().iter().filter(|r| r.status.is_failure()).count();

        info!(
            "Progress: {} tested, {} failed, {} pending, {}/{} instances executing",
            state.completed(),
            failed,
            state.pending(),
            running,
            instances.len()
        );
    }
}

impl Default for ProgressView {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl View for ProgressView {
    fn name(&self) -> &str {
        "progress"
    }

    async fn setup(&self, state: Arc<SharedRunState>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            let stop = self.stop_signal.notified();
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => Self::report(&state),
                _ = state.terminated() => break,
                _ = stop => break,
            }
        }
        Ok(())
    }

    async fn stop(&self, state: Arc<SharedRunState>) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
        Self::report(&state);
        Ok(())
    }
}

/// Writes the run summary as JSON when the run stops
pub struct JsonReportView {
    path: PathBuf,
}

impl JsonReportView {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl View for JsonReportView {
    fn name(&self) -> &str {
        "json-report"
    }

    async fn setup(&self, _state: Arc<SharedRunState>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        info!("Report will be written to {}", self.path.display());
        Ok(())
    }

    async fn stop(&self, state: Arc<SharedRunState>) -> Result<()> {
        let summary = state.summary();
        let content =
            serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write report: {}", self.path.display()))?;
        info!("Wrote report to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Detection, DetectionResult};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_progress_view_ends_on_termination() {
        let state = Arc::new(SharedRunState::new());
        let view = Arc::new(ProgressView::new(Duration::from_millis(5)));

        let handle = {
            let (view, state) = (view.clone(), state.clone());
            tokio::spawn(async move { view.setup(state).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.mark_terminated();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("view did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_progress_view_ends_on_stop() {
        let state = Arc::new(SharedRunState::new());
        let view = Arc::new(ProgressView::new(Duration::from_secs(60)));

        let handle = {
            let (view, state) = (view.clone(), state.clone());
            tokio::spawn(async move { view.setup(state).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        view.stop(state.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("view did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_json_report_written_on_stop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");

        let state = Arc::new(SharedRunState::new());
        let detection = Detection::new("a", "a.yml");
        state.record_result(DetectionResult::pass(&detection, "c-0", 12));
        state.mark_terminated();

        let view = JsonReportView::new(&path);
        view.setup(state.clone()).await.unwrap();
        view.stop(state).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["passed"], 1);
        assert_eq!(written["completion"], "finished");
    }
}
