//! Generates a scene, stores it, and runs two analysis passes over it.
//!
//! Run with `RUST_LOG=debug cargo run --example manuscript_pipeline` to see
//! the individual waves.

use async_trait::async_trait;
use kumiito::prelude::*;
use kumiito::validate_context;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct GenerateScene;

#[async_trait]
impl Step<String> for GenerateScene {
    async fn execute(&self, ctx: &Context<String>) -> Result<String, StepError> {
        let premise = ctx
            .get("premise")
            .ok_or_else(|| StepError::msg("premise missing"))?;
        // Stand-in for a model call.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(format!(
            "The keeper climbed the stairs. {premise} waited at the top, silent."
        ))
    }

    fn config(&self) -> StepConfig {
        StepConfig::default()
            .with_timeout(Duration::from_secs(30))
            .with_retry(RetryPolicy::exponential(2, Duration::from_millis(100)))
    }
}

struct StoreScene {
    dir: std::path::PathBuf,
}

#[async_trait]
impl Step<String> for StoreScene {
    async fn execute(&self, ctx: &Context<String>) -> Result<String, StepError> {
        let scene = ctx
            .get("generate")
            .ok_or_else(|| StepError::msg("nothing generated"))?;
        let path = self.dir.join("scene-001.md");
        tokio::fs::write(&path, scene)
            .await
            .map_err(StepError::from_source)?;
        Ok(path.display().to_string())
    }
}

struct ScenePipeline {
    workflow: Workflow<String>,
    scratch: std::path::PathBuf,
}

impl ScenePipeline {
    fn new(premise: &str) -> Result<Self, WorkflowError> {
        let scratch = std::env::temp_dir().join(format!("kumiito-demo-{}", std::process::id()));

        let mut ctx = Context::new();
        ctx.insert("premise", premise.to_string());
        ctx.set_metadata("pipeline", "scene");

        let mut workflow = Workflow::with_context("scene_pipeline", ctx);
        workflow
            .add_step("generate", GenerateScene, &[])?
            .add_step(
                "store",
                StoreScene {
                    dir: scratch.clone(),
                },
                &["generate"],
            )?
            .add_step(
                "word_count",
                step_fn(|ctx: &Context<String>| {
                    let scene = ctx.get("generate").map(String::as_str).unwrap_or_default();
                    Ok(scene.split_whitespace().count().to_string())
                }),
                &["generate"],
            )?
            .add_configured(
                "style_check",
                step_fn(|_: &Context<String>| Err(StepError::msg("style model offline"))),
                &["generate"],
                StepConfig::default().optional().with_retry_count(1),
            )?
            .add_step(
                "summary",
                step_fn(|ctx: &Context<String>| {
                    let words = ctx.get("word_count").cloned().unwrap_or_default();
                    let stored = ctx.get("store").cloned().unwrap_or_default();
                    Ok(format!("{words} words stored at {stored}"))
                }),
                &["store", "word_count"],
            )?;

        Ok(Self { workflow, scratch })
    }
}

#[async_trait]
impl ManagedWorkflow for ScenePipeline {
    type Output = String;

    fn workflow(&self) -> &Workflow<String> {
        &self.workflow
    }

    fn workflow_mut(&mut self) -> &mut Workflow<String> {
        &mut self.workflow
    }

    fn required_context_keys(&self) -> &[&str] {
        &["premise"]
    }

    async fn setup(&mut self) -> Result<(), WorkflowError> {
        validate_context(self.workflow.context(), self.required_context_keys())?;
        tokio::fs::create_dir_all(&self.scratch)
            .await
            .map_err(|e| WorkflowError::Configuration(format!("scratch dir: {e}")))
    }

    async fn execute(&mut self) -> Result<WorkflowResult<String>, WorkflowError> {
        Engine::new().run_workflow(&mut self.workflow, true).await
    }

    async fn cleanup(&mut self) -> Result<(), WorkflowError> {
        match tokio::fs::remove_dir_all(&self.scratch).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkflowError::Configuration(format!("scratch dir: {e}"))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut lifecycle = Lifecycle::new(ScenePipeline::new("A stranger")?);
    let result = lifecycle.run().await?;

    println!("{result}");
    println!("took {:?}", result.duration());
    if let Some(summary) = result.output("summary") {
        println!("summary: {summary}");
    }
    for error in &result.errors {
        println!("warning: {error}");
    }

    Ok(())
}
