//! Terminal summary of a workflow run.

use crate::step::{StepName, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Aggregate status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a caller gets back from [`Engine::run_workflow`](crate::Engine::run_workflow).
///
/// `outputs` holds every step that succeeded; `errors` lists one description
/// per permanently failed step, in the order the failures were observed.
/// Once terminal, `steps_completed + steps_failed + steps_skipped ==
/// steps_total`.
///
/// # Examples
///
/// ```
/// use kumiito::{WorkflowResult, WorkflowStatus};
///
/// let mut result = WorkflowResult::<String>::new("run-1", "outline", 2);
/// result.record_success("premise", "a lighthouse keeper".to_string());
/// result.record_success("outline", "three acts".to_string());
/// let result = result.finish();
///
/// assert_eq!(result.status, WorkflowStatus::Completed);
/// assert!(result.success());
/// assert_eq!(result.steps_completed, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult<T> {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps_total: usize,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub outputs: HashMap<StepName, T>,
    pub errors: Vec<String>,
    /// Final status of every step, sorted by name.
    pub step_statuses: BTreeMap<StepName, StepStatus>,
    pub metadata: HashMap<String, String>,
    /// Set when a required step failed permanently.
    #[serde(default)]
    required_failed: bool,
}

impl<T> WorkflowResult<T> {
    /// Starts a result in the `Running` state.
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        steps_total: usize,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: WorkflowStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            steps_total,
            steps_completed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            outputs: HashMap::new(),
            errors: Vec::new(),
            step_statuses: BTreeMap::new(),
            metadata: HashMap::new(),
            required_failed: false,
        }
    }

    /// Builds a terminal `Failed` result carrying a single error, for runs
    /// that never reached the engine (e.g. a failed lifecycle hook).
    pub fn failed(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(workflow_id, workflow_name, 0);
        result.errors.push(error.into());
        result.required_failed = true;
        result.finish()
    }

    pub fn record_success(&mut self, step: impl Into<StepName>, output: T) {
        let step = step.into();
        self.steps_completed += 1;
        self.step_statuses.insert(step.clone(), StepStatus::Succeeded);
        self.outputs.insert(step, output);
    }

    pub fn record_failure(&mut self, step: impl Into<StepName>, required: bool, error: String) {
        self.steps_failed += 1;
        self.step_statuses.insert(step.into(), StepStatus::Failed);
        self.errors.push(error);
        self.required_failed |= required;
    }

    pub fn record_skipped(&mut self, step: impl Into<StepName>) {
        self.steps_skipped += 1;
        self.step_statuses.insert(step.into(), StepStatus::Skipped);
    }

    /// Stamps `completed_at` and settles the terminal status.
    pub fn finish(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self.status = if self.required_failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        self
    }

    pub fn success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    /// Wall-clock time between start and completion. Zero while running.
    pub fn duration(&self) -> Duration {
        self.completed_at
            .and_then(|done| (done - self.started_at).to_std().ok())
            .unwrap_or_default()
    }

    pub fn output(&self, step: &str) -> Option<&T> {
        self.outputs.get(step)
    }

    pub fn step_status(&self, step: &str) -> Option<StepStatus> {
        self.step_statuses.get(step).copied()
    }

    /// Names of the steps that ended in `status`, sorted.
    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&StepName> {
        self.step_statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(name, _)| name)
            .collect()
    }
}

impl<T> fmt::Display for WorkflowResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "workflow '{}' ({}) {}: {}/{} steps completed, {} failed, {} skipped",
            self.workflow_name,
            self.workflow_id,
            self.status,
            self.steps_completed,
            self.steps_total,
            self.steps_failed,
            self.steps_skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_failure_keeps_completed() {
        let mut result = WorkflowResult::<u32>::new("id", "wf", 2);
        result.record_success("a", 1);
        result.record_failure("b", false, "b broke".to_string());
        let result = result.finish();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.errors, vec!["b broke".to_string()]);
        assert_eq!(result.step_status("b"), Some(StepStatus::Failed));
    }

    #[test]
    fn test_required_failure_fails() {
        let mut result = WorkflowResult::<u32>::new("id", "wf", 2);
        result.record_failure("a", true, "a broke".to_string());
        result.record_skipped("b");
        let result = result.finish();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(!result.success());
        assert_eq!(
            result.steps_completed + result.steps_failed + result.steps_skipped,
            result.steps_total
        );
        assert_eq!(result.steps_with_status(StepStatus::Skipped), vec!["b"]);
    }

    #[test]
    fn test_failed_constructor() {
        let result = WorkflowResult::<u32>::failed("id", "wf", "setup exploded");
        assert!(result.status.is_terminal());
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.completed_at.is_some());
    }

    #[test]
    fn test_duration_and_display() {
        let running = WorkflowResult::<u32>::new("id", "wf", 0);
        assert_eq!(running.duration(), Duration::ZERO);
        assert!(!running.status.is_terminal());

        let done = running.finish();
        assert_eq!(
            done.to_string(),
            "workflow 'wf' (id) completed: 0/0 steps completed, 0 failed, 0 skipped"
        );
    }
}
