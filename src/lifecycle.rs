//! Setup → execute → cleanup template for workflows that own resources.

use crate::context::Context;
use crate::error::{LifecyclePhase, WorkflowError};
use crate::result::WorkflowResult;
use crate::workflow::Workflow;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

/// A workflow with explicit resource management.
///
/// Implementors wrap a [`Workflow`] and provide the three hooks; a
/// [`Lifecycle`] drives them and guarantees `cleanup` runs.
///
/// # Examples
///
/// ```
/// use kumiito::prelude::*;
/// use async_trait::async_trait;
///
/// struct Outline {
///     workflow: Workflow<String>,
///     connection_open: bool,
/// }
///
/// #[async_trait]
/// impl ManagedWorkflow for Outline {
///     type Output = String;
///
///     fn workflow(&self) -> &Workflow<String> {
///         &self.workflow
///     }
///
///     fn workflow_mut(&mut self) -> &mut Workflow<String> {
///         &mut self.workflow
///     }
///
///     fn required_context_keys(&self) -> &[&str] {
///         &["premise"]
///     }
///
///     async fn execute(&mut self) -> Result<WorkflowResult<String>, WorkflowError> {
///         self.connection_open = true;
///         Engine::new().run(&mut self.workflow).await
///     }
///
///     async fn cleanup(&mut self) -> Result<(), WorkflowError> {
///         self.connection_open = false;
///         Ok(())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), WorkflowError> {
/// let mut ctx = Context::new();
/// ctx.insert("premise", "a lighthouse keeper".to_string());
/// let mut workflow = Workflow::with_context("outline", ctx);
/// workflow.add_step(
///     "outline",
///     step_fn(|ctx: &Context<String>| Ok(format!("act one: {}", ctx.get("premise").cloned().unwrap_or_default()))),
///     &[],
/// )?;
///
/// let mut lifecycle = Lifecycle::new(Outline { workflow, connection_open: false });
/// let result = lifecycle.run().await?;
///
/// assert!(result.success());
/// assert!(lifecycle.cleanup_complete());
/// assert!(!lifecycle.inner().connection_open);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ManagedWorkflow: Send {
    /// Output type of the wrapped workflow's steps.
    type Output: Clone + Send + Sync + 'static;

    fn workflow(&self) -> &Workflow<Self::Output>;

    fn workflow_mut(&mut self) -> &mut Workflow<Self::Output>;

    /// Context keys that must be present before execution.
    fn required_context_keys(&self) -> &[&str] {
        &[]
    }

    /// Validates preconditions and prepares resources.
    ///
    /// The default checks [`required_context_keys`](Self::required_context_keys).
    async fn setup(&mut self) -> Result<(), WorkflowError> {
        validate_context(self.workflow().context(), self.required_context_keys())
    }

    /// Runs the workflow, through the engine or by hand.
    async fn execute(&mut self) -> Result<WorkflowResult<Self::Output>, WorkflowError>;

    /// Releases resources. Called once per [`Lifecycle`], on every exit path.
    async fn cleanup(&mut self) -> Result<(), WorkflowError> {
        Ok(())
    }
}

/// Fails with [`WorkflowError::MissingContextKeys`] naming every key in
/// `required` that `context` lacks.
///
/// ```
/// use kumiito::{validate_context, Context, WorkflowError};
///
/// let mut ctx = Context::new();
/// ctx.insert("scene", 1u8);
///
/// assert!(validate_context(&ctx, &["scene"]).is_ok());
/// match validate_context(&ctx, &["scene", "voice", "model"]) {
///     Err(WorkflowError::MissingContextKeys(keys)) => assert_eq!(keys, ["voice", "model"]),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub fn validate_context<T>(context: &Context<T>, required: &[&str]) -> Result<(), WorkflowError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|key| !context.contains_key(key))
        .map(|key| key.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::MissingContextKeys(missing))
    }
}

/// Drives a [`ManagedWorkflow`] through setup, execute and cleanup.
///
/// Cleanup runs exactly once per `Lifecycle`, whether setup or execute
/// succeeded, returned an error, or panicked. A panic is resumed after
/// cleanup has finished.
#[derive(Debug)]
pub struct Lifecycle<W> {
    inner: W,
    setup_complete: bool,
    cleanup_complete: bool,
}

impl<W: ManagedWorkflow> Lifecycle<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            setup_complete: false,
            cleanup_complete: false,
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn setup_complete(&self) -> bool {
        self.setup_complete
    }

    pub fn cleanup_complete(&self) -> bool {
        self.cleanup_complete
    }

    /// Runs `setup → execute`, then always `cleanup`.
    ///
    /// Returns what `execute` produced, or the setup/execute error once
    /// cleanup has run. A cleanup error is returned only when the body
    /// succeeded; otherwise it is logged and the body's error wins.
    pub async fn run(&mut self) -> Result<WorkflowResult<W::Output>, WorkflowError> {
        self.run_phases().await.map_err(|(_, e)| e)
    }

    /// Like [`run`](Self::run), but a setup or execute error becomes a
    /// `Failed` [`WorkflowResult`] carrying the error description.
    pub async fn run_to_result(&mut self) -> Result<WorkflowResult<W::Output>, WorkflowError> {
        match self.run_phases().await {
            Ok(result) => Ok(result),
            Err((LifecyclePhase::Cleanup, e)) => Err(e),
            Err((phase, e)) => {
                let workflow = self.inner.workflow();
                let error = WorkflowError::Lifecycle {
                    workflow: workflow.name().to_string(),
                    phase,
                    details: e.to_string(),
                };
                Ok(WorkflowResult::failed(
                    workflow.id(),
                    workflow.name(),
                    error.to_string(),
                ))
            }
        }
    }

    async fn run_phases(
        &mut self,
    ) -> Result<WorkflowResult<W::Output>, (LifecyclePhase, WorkflowError)> {
        let body = AssertUnwindSafe(self.setup_and_execute())
            .catch_unwind()
            .await;
        let cleanup = self.cleanup_once().await;

        match body {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(Err(error)) => {
                if let Err(cleanup_error) = cleanup {
                    warn!(
                        "Cleanup of workflow '{}' also failed: {}",
                        self.inner.workflow().name(),
                        cleanup_error
                    );
                }
                Err(error)
            }
            Ok(Ok(result)) => {
                cleanup.map_err(|e| (LifecyclePhase::Cleanup, e))?;
                Ok(result)
            }
        }
    }

    async fn setup_and_execute(
        &mut self,
    ) -> Result<WorkflowResult<W::Output>, (LifecyclePhase, WorkflowError)> {
        let name = self.inner.workflow().name().to_string();

        info!("Setting up workflow '{}'", name);
        self.inner
            .setup()
            .await
            .map_err(|e| (LifecyclePhase::Setup, e))?;
        self.setup_complete = true;

        info!("Executing workflow '{}'", name);
        self.inner
            .execute()
            .await
            .map_err(|e| (LifecyclePhase::Execute, e))
    }

    async fn cleanup_once(&mut self) -> Result<(), WorkflowError> {
        if self.cleanup_complete {
            return Ok(());
        }
        let name = self.inner.workflow().name().to_string();
        info!("Cleaning up workflow '{}'", name);
        self.cleanup_complete = true;
        self.inner
            .cleanup()
            .await
            .map_err(|e| WorkflowError::Lifecycle {
                workflow: name,
                phase: LifecyclePhase::Cleanup,
                details: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::result::WorkflowStatus;
    use crate::step::step_fn;

    #[derive(Default)]
    struct Probe {
        setup_calls: u32,
        execute_calls: u32,
        cleanup_calls: u32,
    }

    enum Behaviour {
        Succeed,
        FailExecute,
        PanicExecute,
        FailCleanup,
    }

    struct TestWorkflow {
        workflow: Workflow<String>,
        behaviour: Behaviour,
        probe: Probe,
    }

    impl TestWorkflow {
        fn new(behaviour: Behaviour, context: Context<String>) -> Self {
            let mut workflow = Workflow::with_context("test", context);
            workflow
                .add_step("step1", step_fn(|_: &Context<String>| Ok("result1".to_string())), &[])
                .expect("fresh workflow")
                .add_step(
                    "step2",
                    step_fn(|_: &Context<String>| Ok("result2".to_string())),
                    &["step1"],
                )
                .expect("fresh workflow");
            Self {
                workflow,
                behaviour,
                probe: Probe::default(),
            }
        }
    }

    #[async_trait]
    impl ManagedWorkflow for TestWorkflow {
        type Output = String;

        fn workflow(&self) -> &Workflow<String> {
            &self.workflow
        }

        fn workflow_mut(&mut self) -> &mut Workflow<String> {
            &mut self.workflow
        }

        fn required_context_keys(&self) -> &[&str] {
            &["test_param"]
        }

        async fn setup(&mut self) -> Result<(), WorkflowError> {
            self.probe.setup_calls += 1;
            validate_context(self.workflow.context(), self.required_context_keys())
        }

        async fn execute(&mut self) -> Result<WorkflowResult<String>, WorkflowError> {
            self.probe.execute_calls += 1;
            match self.behaviour {
                Behaviour::FailExecute => Err(WorkflowError::Configuration("Test error".into())),
                Behaviour::PanicExecute => panic!("execute blew up"),
                _ => Engine::new().run_workflow(&mut self.workflow, false).await,
            }
        }

        async fn cleanup(&mut self) -> Result<(), WorkflowError> {
            self.probe.cleanup_calls += 1;
            match self.behaviour {
                Behaviour::FailCleanup => Err(WorkflowError::Configuration("disk full".into())),
                _ => Ok(()),
            }
        }
    }

    fn context_with_param() -> Context<String> {
        let mut ctx = Context::new();
        ctx.insert("test_param", "value".to_string());
        ctx
    }

    #[tokio::test]
    async fn test_lifecycle_success() {
        let mut lifecycle = Lifecycle::new(TestWorkflow::new(Behaviour::Succeed, context_with_param()));
        let result = lifecycle.run().await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.steps_completed, 2);
        assert!(result.outputs.contains_key("step1"));
        assert!(result.outputs.contains_key("step2"));
        assert!(lifecycle.setup_complete());
        assert_eq!(lifecycle.inner().probe.cleanup_calls, 1);
    }

    #[tokio::test]
    async fn test_missing_context_keys_still_cleans_up() {
        let mut lifecycle = Lifecycle::new(TestWorkflow::new(Behaviour::Succeed, Context::new()));
        let err = lifecycle.run().await.unwrap_err();

        assert!(err.to_string().contains("Missing required context keys"));
        assert!(!lifecycle.setup_complete());
        let probe = &lifecycle.inner().probe;
        assert_eq!(probe.execute_calls, 0);
        assert_eq!(probe.cleanup_calls, 1);
    }

    #[tokio::test]
    async fn test_execute_error_still_cleans_up() {
        let mut lifecycle =
            Lifecycle::new(TestWorkflow::new(Behaviour::FailExecute, context_with_param()));
        let err = lifecycle.run().await.unwrap_err();

        assert!(matches!(err, WorkflowError::Configuration(ref m) if m == "Test error"));
        assert!(lifecycle.cleanup_complete());
        assert_eq!(lifecycle.inner().probe.cleanup_calls, 1);
    }

    #[tokio::test]
    async fn test_execute_panic_still_cleans_up() {
        let mut lifecycle =
            Lifecycle::new(TestWorkflow::new(Behaviour::PanicExecute, context_with_param()));
        let outcome = AssertUnwindSafe(lifecycle.run()).catch_unwind().await;

        assert!(outcome.is_err());
        assert_eq!(lifecycle.inner().probe.cleanup_calls, 1);
    }

    #[tokio::test]
    async fn test_cleanup_error_surfaces_after_success() {
        let mut lifecycle =
            Lifecycle::new(TestWorkflow::new(Behaviour::FailCleanup, context_with_param()));
        let err = lifecycle.run().await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Lifecycle {
                phase: LifecyclePhase::Cleanup,
                ..
            }
        ));
        assert_eq!(lifecycle.inner().probe.execute_calls, 1);
    }

    #[tokio::test]
    async fn test_run_to_result_captures_execute_error() {
        let mut lifecycle =
            Lifecycle::new(TestWorkflow::new(Behaviour::FailExecute, context_with_param()));
        let result = lifecycle.run_to_result().await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Lifecycle 'execute' failed in workflow 'test'"));
        assert_eq!(result.workflow_id, lifecycle.inner().workflow().id());
        assert_eq!(lifecycle.inner().probe.cleanup_calls, 1);
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_per_lifecycle() {
        let mut lifecycle = Lifecycle::new(TestWorkflow::new(Behaviour::Succeed, context_with_param()));
        lifecycle.run().await.unwrap();

        // The wrapped workflow is single-use, so the second run fails in execute.
        let err = lifecycle.run().await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyExecuted(_)));
        assert_eq!(lifecycle.inner().probe.cleanup_calls, 1);
    }
}
