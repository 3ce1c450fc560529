//! # Kumiito (組糸)
//!
//! A dependency-aware workflow engine for Rust.
//!
//! "Kumiito" are the threads braided together in kumihimo cord-making: each
//! strand may only be crossed once the strands it rests on are in place,
//! which is how this engine runs steps.
//!
//! ## Features
//!
//! - **Dependency graph**: steps declare the steps they depend on; unknown
//!   names and cycles are rejected before anything runs
//! - **Wave execution**: every step whose dependencies have succeeded runs
//!   concurrently, or one at a time in a stable topological order
//! - **Retry Support**: Configurable retry policies (immediate, fixed delay,
//!   exponential backoff)
//! - **Timeouts**: Per-step timeouts with an engine-wide default
//! - **Partial failure**: optional steps may fail without failing the
//!   workflow; dependents of a failed step are skipped
//! - **Lifecycle**: setup/execute/cleanup template with guaranteed cleanup
//!
//! ## Quick Start
//!
//! ```rust
//! use kumiito::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), WorkflowError> {
//! let mut workflow = Workflow::<String>::new("chapter");
//! workflow
//!     .add_step("draft", step_fn(|_: &Context<String>| Ok("It was a dark night.".to_string())), &[])?
//!     .add_step(
//!         "word_count",
//!         step_fn(|ctx: &Context<String>| {
//!             let draft = ctx.get("draft").ok_or_else(|| StepError::msg("no draft"))?;
//!             Ok(draft.split_whitespace().count().to_string())
//!         }),
//!         &["draft"],
//!     )?;
//!
//! let result = Engine::new().run_workflow(&mut workflow, true).await?;
//!
//! assert!(result.success());
//! assert_eq!(result.output("word_count").map(String::as_str), Some("5"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Async steps with a policy
//!
//! ```rust
//! use kumiito::prelude::*;
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct CallModel;
//!
//! #[async_trait]
//! impl Step<String> for CallModel {
//!     async fn execute(&self, ctx: &Context<String>) -> Result<String, StepError> {
//!         let prompt = ctx.get("prompt").cloned().unwrap_or_default();
//!         tokio::time::sleep(Duration::from_millis(1)).await;
//!         Ok(format!("response to {prompt}"))
//!     }
//!
//!     fn config(&self) -> StepConfig {
//!         StepConfig::default()
//!             .with_timeout(Duration::from_secs(60))
//!             .with_retry(RetryPolicy::exponential(3, Duration::from_millis(100)))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), WorkflowError> {
//! let mut ctx = Context::new();
//! ctx.insert("prompt", "describe the harbour".to_string());
//!
//! let mut workflow = Workflow::with_context("generate", ctx);
//! workflow.add_step("generate", CallModel, &[])?;
//!
//! let result = Engine::new().run(&mut workflow).await?;
//! assert_eq!(
//!     result.output("generate").map(String::as_str),
//!     Some("response to describe the harbour")
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Configuration problems come back as `Err`; step failures are recorded in
//! the [`WorkflowResult`]:
//!
//! ```rust
//! use kumiito::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut workflow = Workflow::<u32>::new("broken");
//! workflow
//!     .add_step("a", step_fn(|_: &Context<u32>| Err(StepError::msg("boom"))), &[])
//!     .expect("fresh workflow");
//!
//! match Engine::new().run(&mut workflow).await {
//!     Ok(result) if !result.success() => {
//!         for error in &result.errors {
//!             eprintln!("{error}");
//!         }
//!     }
//!     Ok(_) => {}
//!     Err(e) if e.is_configuration() => eprintln!("bad workflow: {e}"),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! # }
//! ```

mod context;
mod engine;
mod error;
mod lifecycle;
mod result;
mod step;
mod workflow;

pub mod prelude;

pub use context::{Context, ContextKey};
pub use engine::{Engine, EngineConfig};
pub use error::{BoxError, LifecyclePhase, StepError, WorkflowError};
pub use lifecycle::{validate_context, Lifecycle, ManagedWorkflow};
pub use result::{WorkflowResult, WorkflowStatus};
pub use step::{
    step_fn, FnStep, RetryPolicy, RetryPolicyError, Step, StepConfig, StepName, StepStatus,
};
pub use workflow::{Workflow, WorkflowBuilder, WorkflowDefinition};
