//! Execution engine: validates a workflow's dependency graph and runs its
//! steps, either in concurrent waves or one at a time in topological order.

use crate::context::Context;
use crate::error::WorkflowError;
use crate::result::WorkflowResult;
use crate::step::{RetryPolicy, Step, StepName, StepStatus};
use crate::workflow::Workflow;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Engine-wide settings.
///
/// Deserialisable so it can be embedded in an application's config file;
/// missing fields take their defaults.
///
/// ```
/// use kumiito::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default().with_default_timeout(Duration::from_secs(120));
/// assert!(config.parallel);
/// assert_eq!(config.default_timeout, Some(Duration::from_secs(120)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for steps that do not set their own. `None` means unbounded.
    pub default_timeout: Option<Duration>,
    /// Execution mode used by [`Engine::run`].
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            parallel: true,
        }
    }
}

impl EngineConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// Runs workflows.
///
/// The engine holds no per-run state, so one instance can drive any number
/// of workflows, including concurrently.
///
/// # Examples
///
/// ```
/// use kumiito::{step_fn, Context, Engine, Workflow};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), kumiito::WorkflowError> {
/// let mut workflow = Workflow::<u32>::new("scores");
/// workflow
///     .add_step("a", step_fn(|_: &Context<u32>| Ok(1)), &[])?
///     .add_step("b", step_fn(|ctx: &Context<u32>| Ok(ctx.get("a").copied().unwrap_or(0) + 1)), &["a"])?;
///
/// let result = Engine::new().run_workflow(&mut workflow, true).await?;
/// assert!(result.success());
/// assert_eq!(result.output("b"), Some(&2));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

struct StepTask<T> {
    name: StepName,
    step: Arc<dyn Step<T>>,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
}

struct StepOutcome<T> {
    index: usize,
    attempts: u32,
    result: Result<T, WorkflowError>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a workflow in the configured default mode.
    pub async fn run<T>(&self, workflow: &mut Workflow<T>) -> Result<WorkflowResult<T>, WorkflowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.run_workflow(workflow, self.config.parallel).await
    }

    /// Validates and runs a workflow.
    ///
    /// Returns `Err` only for configuration problems (unknown dependency,
    /// cycle, reused instance), in which case no step has run. Step failures
    /// are reported through the returned [`WorkflowResult`].
    pub async fn run_workflow<T>(
        &self,
        workflow: &mut Workflow<T>,
        parallel: bool,
    ) -> Result<WorkflowResult<T>, WorkflowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if workflow.is_executed() {
            return Err(WorkflowError::AlreadyExecuted(workflow.name().to_string()));
        }
        let order = workflow.plan().map_err(|e| {
            warn!("Workflow '{}' rejected: {}", workflow.name(), e);
            e
        })?;
        workflow.mark_executed();

        info!(
            workflow_id = workflow.id(),
            steps = workflow.step_count(),
            parallel,
            "Starting workflow '{}'",
            workflow.name()
        );

        let mut result = WorkflowResult::new(workflow.id(), workflow.name(), workflow.step_count());
        if parallel {
            self.run_waves(workflow, &mut result).await;
        } else {
            self.run_sequential(workflow, &order, &mut result).await;
        }
        result.metadata = workflow.context().metadata().clone();
        let result = result.finish();

        if result.success() {
            info!(
                workflow_id = workflow.id(),
                "Workflow '{}' completed: {}/{} steps succeeded",
                workflow.name(),
                result.steps_completed,
                result.steps_total
            );
        } else {
            warn!(
                workflow_id = workflow.id(),
                errors = result.errors.len(),
                "Workflow '{}' failed",
                workflow.name()
            );
        }
        Ok(result)
    }

    async fn run_waves<T>(&self, workflow: &mut Workflow<T>, result: &mut WorkflowResult<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut wave = 0usize;
        loop {
            skip_blocked(workflow, result);

            let ready = ready_steps(workflow);
            if ready.is_empty() {
                break;
            }
            debug!(
                workflow_id = workflow.id(),
                wave,
                steps = ready.len(),
                "processing wave"
            );

            let snapshot = workflow.context_snapshot();
            let mut launched = Vec::with_capacity(ready.len());
            for &index in &ready {
                workflow.set_status(index, StepStatus::Running);
                let task = self.task_for(workflow, index);
                launched.push(execute_step(index, task, Arc::clone(&snapshot)));
            }
            drop(snapshot);

            // join_all keeps launch order, so merges happen in registration order.
            for outcome in join_all(launched).await {
                apply_outcome(workflow, result, outcome);
            }
            wave += 1;
        }

        // Only reachable for steps whose dependencies can never succeed.
        let stranded: Vec<usize> = pending_steps(workflow).collect();
        for index in stranded {
            mark_skipped(workflow, result, index);
        }
    }

    async fn run_sequential<T>(
        &self,
        workflow: &mut Workflow<T>,
        order: &[usize],
        result: &mut WorkflowResult<T>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        for &index in order {
            if !dependencies_succeeded(workflow, index) {
                mark_skipped(workflow, result, index);
                continue;
            }
            workflow.set_status(index, StepStatus::Running);
            let task = self.task_for(workflow, index);
            let outcome = execute_step(index, task, workflow.context_snapshot()).await;
            apply_outcome(workflow, result, outcome);
        }
    }

    fn task_for<T>(&self, workflow: &Workflow<T>, index: usize) -> StepTask<T> {
        let entry = &workflow.entries()[index];
        StepTask {
            name: entry.name.clone(),
            step: Arc::clone(&entry.step),
            timeout: entry.config.timeout.or(self.config.default_timeout),
            retry_policy: entry.config.retry_policy.clone(),
        }
    }
}

fn dependencies_succeeded<T>(workflow: &Workflow<T>, index: usize) -> bool {
    workflow.entries()[index]
        .dependencies
        .iter()
        .all(|dep| workflow.step_status(dep.as_str()) == Some(StepStatus::Succeeded))
}

fn pending_steps<T>(workflow: &Workflow<T>) -> impl Iterator<Item = usize> + '_ {
    workflow
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status == StepStatus::Pending)
        .map(|(i, _)| i)
}

fn ready_steps<T>(workflow: &Workflow<T>) -> Vec<usize> {
    pending_steps(workflow)
        .filter(|&i| dependencies_succeeded(workflow, i))
        .collect()
}

/// Marks every pending step with a failed or skipped dependency as skipped,
/// repeating until the skip has reached all transitive dependents.
fn skip_blocked<T>(workflow: &mut Workflow<T>, result: &mut WorkflowResult<T>) {
    loop {
        let blocked: Vec<usize> = pending_steps(workflow)
            .filter(|&i| {
                workflow.entries()[i].dependencies.iter().any(|dep| {
                    matches!(
                        workflow.step_status(dep.as_str()),
                        Some(StepStatus::Failed | StepStatus::Skipped)
                    )
                })
            })
            .collect();
        if blocked.is_empty() {
            return;
        }
        for index in blocked {
            mark_skipped(workflow, result, index);
        }
    }
}

fn mark_skipped<T>(workflow: &mut Workflow<T>, result: &mut WorkflowResult<T>, index: usize) {
    let name = workflow.entries()[index].name.clone();
    warn!(
        workflow_id = workflow.id(),
        "Skipping step '{}': a dependency did not succeed", name
    );
    workflow.set_status(index, StepStatus::Skipped);
    result.record_skipped(name);
}

fn apply_outcome<T: Clone>(
    workflow: &mut Workflow<T>,
    result: &mut WorkflowResult<T>,
    outcome: StepOutcome<T>,
) {
    let entry = &workflow.entries()[outcome.index];
    let name = entry.name.clone();
    let required = entry.config.required;

    match outcome.result {
        Ok(output) => {
            workflow.store_output(outcome.index, output.clone());
            result.record_success(name, output);
        }
        Err(error) => {
            workflow.set_status(outcome.index, StepStatus::Failed);
            if !required {
                info!("Optional step '{}' failed; workflow continues", name);
            }
            let description = format!(
                "Step '{}' failed after {} attempt(s): {}",
                name, outcome.attempts, error
            );
            result.record_failure(name, required, description);
        }
    }
}

/// Runs one step to completion: attempts, timeouts and retries.
async fn execute_step<T>(index: usize, task: StepTask<T>, ctx: Arc<Context<T>>) -> StepOutcome<T>
where
    T: Send + Sync + 'static,
{
    let max_retries = task.retry_policy.max_retries();
    let mut attempt = 0u32;

    loop {
        match run_attempt(&task, &ctx).await {
            Ok(output) => {
                info!("Step '{}' completed successfully", task.name);
                return StepOutcome {
                    index,
                    attempts: attempt + 1,
                    result: Ok(output),
                };
            }
            Err(error) => {
                if attempt < max_retries {
                    log_and_wait_for_retry(&task, attempt, &error).await;
                    attempt += 1;
                    continue;
                }
                warn!(
                    "Step '{}' failed after {} retries: {}",
                    task.name, attempt, error
                );
                return StepOutcome {
                    index,
                    attempts: attempt + 1,
                    result: Err(error),
                };
            }
        }
    }
}

/// A single attempt runs on its own task so a panicking step body is
/// contained and reported instead of unwinding through the scheduler.
async fn run_attempt<T>(task: &StepTask<T>, ctx: &Arc<Context<T>>) -> Result<T, WorkflowError>
where
    T: Send + Sync + 'static,
{
    let step = Arc::clone(&task.step);
    let ctx = Arc::clone(ctx);
    let limit = task.timeout;

    let handle = tokio::spawn(async move {
        match limit {
            Some(limit) => timeout(limit, step.execute(&ctx)).await.ok(),
            None => Some(step.execute(&ctx).await),
        }
    });

    match handle.await {
        Ok(Some(Ok(output))) => Ok(output),
        Ok(Some(Err(e))) => Err(WorkflowError::StepError {
            step_name: task.name.clone(),
            details: e.to_string(),
        }),
        Ok(None) => Err(WorkflowError::Timeout {
            step_name: task.name.clone(),
        }),
        Err(join_error) => Err(WorkflowError::Panicked {
            step_name: task.name.clone(),
            details: if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                join_error.to_string()
            },
        }),
    }
}

async fn log_and_wait_for_retry<T>(task: &StepTask<T>, attempt: u32, error: &WorkflowError) {
    info!(
        "Step '{}' attempt failed ({}), retrying ({}/{})",
        task.name,
        error,
        attempt + 1,
        task.retry_policy.max_retries()
    );
    if let Some(delay) = task.retry_policy.delay_for_attempt(attempt) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::step::{step_fn, StepConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Step<u32> for Counting {
        async fn execute(&self, _ctx: &Context<u32>) -> Result<u32, StepError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                Err(StepError::msg(format!("attempt {n} failed")))
            } else {
                Ok(n)
            }
        }
    }

    struct Panicking;

    #[async_trait]
    impl Step<u32> for Panicking {
        async fn execute(&self, _ctx: &Context<u32>) -> Result<u32, StepError> {
            panic!("step exploded");
        }
    }

    #[tokio::test]
    async fn test_retry_budget_is_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut workflow = Workflow::new("retry");
        workflow
            .add_configured(
                "flaky",
                Counting {
                    calls: Arc::clone(&calls),
                    fail: true,
                },
                &[],
                StepConfig::default().with_retry_count(3),
            )
            .unwrap();

        let result = Engine::new().run_workflow(&mut workflow, false).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("after 4 attempt(s)"));
        assert!(result.errors[0].contains("attempt 4 failed"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let mut workflow = Workflow::new("panic");
        workflow
            .add_step("boom", Panicking, &[])
            .unwrap()
            .add_step("after", step_fn(|_: &Context<u32>| Ok(1)), &["boom"])
            .unwrap();

        let result = Engine::new().run_workflow(&mut workflow, true).await.unwrap();

        assert!(!result.success());
        assert!(result.errors[0].contains("step exploded"));
        assert_eq!(workflow.step_status("boom"), Some(StepStatus::Failed));
        assert_eq!(workflow.step_status("after"), Some(StepStatus::Skipped));
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        struct Slow;

        #[async_trait]
        impl Step<u32> for Slow {
            async fn execute(&self, _ctx: &Context<u32>) -> Result<u32, StepError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(0)
            }
        }

        let mut workflow = Workflow::new("slow");
        workflow.add_step("slow", Slow, &[]).unwrap();

        let engine = Engine::with_config(
            EngineConfig::default().with_default_timeout(Duration::from_millis(20)),
        );
        let result = engine.run(&mut workflow).await.unwrap();

        assert!(!result.success());
        assert!(result.errors[0].contains("Timeout occurred in step: slow"));
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert!(config.parallel);
        assert_eq!(config.default_timeout, None);
        assert!(!config.sequential().parallel);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
