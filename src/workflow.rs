//! Workflow container: registered steps, their dependencies and the shared
//! context of one run.

use crate::context::Context;
use crate::error::WorkflowError;
use crate::step::{Step, StepConfig, StepName, StepStatus};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct StepEntry<T> {
    pub(crate) name: StepName,
    pub(crate) step: Arc<dyn Step<T>>,
    pub(crate) dependencies: Vec<StepName>,
    pub(crate) config: StepConfig,
    pub(crate) status: StepStatus,
}

/// A named set of steps sharing one context.
///
/// A workflow is single-use: running it fills `step_outputs` and the
/// context, and the engine rejects a second run of the same instance.
///
/// # Examples
///
/// ```
/// use kumiito::{step_fn, Context, Workflow};
///
/// let mut workflow = Workflow::<String>::new("outline");
/// workflow
///     .add_step("premise", step_fn(|_: &Context<String>| Ok("a lighthouse keeper".to_string())), &[])?
///     .add_step(
///         "outline",
///         step_fn(|ctx: &Context<String>| {
///             let premise = ctx.get("premise").cloned().unwrap_or_default();
///             Ok(format!("outline of {premise}"))
///         }),
///         &["premise"],
///     )?;
///
/// assert_eq!(workflow.step_count(), 2);
/// assert!(workflow.validate().is_ok());
/// # Ok::<(), kumiito::WorkflowError>(())
/// ```
pub struct Workflow<T> {
    name: String,
    id: String,
    context: Arc<Context<T>>,
    steps: Vec<StepEntry<T>>,
    index: HashMap<StepName, usize>,
    step_outputs: HashMap<StepName, T>,
    executed: bool,
}

impl<T> fmt::Debug for Workflow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("steps", &self.step_names().collect::<Vec<_>>())
            .field("executed", &self.executed)
            .finish()
    }
}

impl<T> Workflow<T> {
    /// Creates an empty workflow with a fresh time-ordered id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, Uuid::now_v7().to_string())
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            context: Arc::new(Context::new()),
            steps: Vec::new(),
            index: HashMap::new(),
            step_outputs: HashMap::new(),
            executed: false,
        }
    }

    /// Creates a workflow seeded with an initial context.
    pub fn with_context(name: impl Into<String>, context: Context<T>) -> Self {
        let mut workflow = Self::new(name);
        workflow.context = Arc::new(context);
        workflow
    }

    pub fn builder(name: impl Into<String>) -> WorkflowBuilder<T> {
        WorkflowBuilder::new(name)
    }

    /// Assembles a workflow from a [`WorkflowDefinition`].
    pub fn from_definition<D>(definition: &D) -> Result<Self, WorkflowError>
    where
        D: WorkflowDefinition<T> + ?Sized,
    {
        let mut workflow = Self::with_context(definition.name(), definition.initial_context());
        definition.define_steps(&mut workflow)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Registers a step using the policy returned by [`Step::config`].
    ///
    /// Fails with [`WorkflowError::DuplicateStep`] if `name` is taken.
    pub fn add_step<S>(
        &mut self,
        name: impl Into<StepName>,
        step: S,
        dependencies: &[&str],
    ) -> Result<&mut Self, WorkflowError>
    where
        S: Step<T> + 'static,
    {
        let config = step.config();
        self.add_configured(name, step, dependencies, config)
    }

    /// Registers a step with an explicit execution policy.
    pub fn add_configured<S>(
        &mut self,
        name: impl Into<StepName>,
        step: S,
        dependencies: &[&str],
        config: StepConfig,
    ) -> Result<&mut Self, WorkflowError>
    where
        S: Step<T> + 'static,
    {
        let dependencies = dependencies.iter().map(|d| StepName::new(*d)).collect();
        self.insert_entry(name.into(), Arc::new(step), dependencies, config)?;
        Ok(self)
    }

    fn insert_entry(
        &mut self,
        name: StepName,
        step: Arc<dyn Step<T>>,
        dependencies: Vec<StepName>,
        config: StepConfig,
    ) -> Result<(), WorkflowError> {
        if self.executed {
            return Err(WorkflowError::AlreadyExecuted(self.name.clone()));
        }
        if self.index.contains_key(&name) {
            return Err(WorkflowError::DuplicateStep(name));
        }
        self.index.insert(name.clone(), self.steps.len());
        self.steps.push(StepEntry {
            name,
            step,
            dependencies,
            config,
            status: StepStatus::Pending,
        });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &Context<T> {
        &self.context
    }

    /// Outputs of the steps that have succeeded so far.
    pub fn step_outputs(&self) -> &HashMap<StepName, T> {
        &self.step_outputs
    }

    /// Step names in registration order.
    pub fn step_names(&self) -> impl Iterator<Item = &StepName> {
        self.steps.iter().map(|e| &e.name)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.entry(name).map(|e| e.status)
    }

    pub fn dependencies_of(&self, name: &str) -> Option<&[StepName]> {
        self.entry(name).map(|e| e.dependencies.as_slice())
    }

    pub fn step_config(&self, name: &str) -> Option<&StepConfig> {
        self.entry(name).map(|e| &e.config)
    }

    /// Returns `true` once the engine has started running this instance.
    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Checks that every dependency is registered and the graph is acyclic.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.plan().map(|_| ())
    }

    /// Returns a dependency-respecting order of all steps.
    ///
    /// Ties are broken by registration order, so the result is stable for a
    /// given sequence of `add_step` calls.
    pub fn topological_order(&self) -> Result<Vec<StepName>, WorkflowError> {
        let order = self.plan()?;
        Ok(order.into_iter().map(|i| self.steps[i].name.clone()).collect())
    }

    fn entry(&self, name: &str) -> Option<&StepEntry<T>> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    /// Validates the graph and produces the stable topological order as
    /// indices into `steps` (Kahn's algorithm).
    pub(crate) fn plan(&self) -> Result<Vec<usize>, WorkflowError> {
        let mut in_degree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];

        for (i, entry) in self.steps.iter().enumerate() {
            for dep in &entry.dependencies {
                let d = self.index.get(dep).copied().ok_or_else(|| {
                    WorkflowError::UnknownDependency {
                        step_name: entry.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < self.steps.len() {
            let steps = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, &deg)| deg > 0)
                .map(|(i, _)| self.steps[i].name.clone())
                .collect();
            return Err(WorkflowError::CycleDetected { steps });
        }

        Ok(order)
    }

    pub(crate) fn entries(&self) -> &[StepEntry<T>] {
        &self.steps
    }

    pub(crate) fn set_status(&mut self, index: usize, status: StepStatus) {
        self.steps[index].status = status;
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed = true;
    }

    pub(crate) fn context_snapshot(&self) -> Arc<Context<T>> {
        Arc::clone(&self.context)
    }
}

impl<T: Clone> Workflow<T> {
    /// Mutable access to the context, for seeding values before a run.
    pub fn context_mut(&mut self) -> &mut Context<T> {
        Arc::make_mut(&mut self.context)
    }

    /// Records a successful output and makes it visible to dependents under
    /// the step's name.
    pub(crate) fn store_output(&mut self, index: usize, output: T) {
        let name = self.steps[index].name.clone();
        self.steps[index].status = StepStatus::Succeeded;
        Arc::make_mut(&mut self.context).insert(name.as_str(), output.clone());
        self.step_outputs.insert(name, output);
    }
}

/// A type that declares the steps of a workflow.
///
/// Implement this for reusable workflows and build instances with
/// [`Workflow::from_definition`]; each call yields a fresh single-use
/// workflow.
///
/// # Examples
///
/// ```
/// use kumiito::{step_fn, Context, Workflow, WorkflowDefinition, WorkflowError};
///
/// struct Pipeline;
///
/// impl WorkflowDefinition<u32> for Pipeline {
///     fn name(&self) -> &str {
///         "pipeline"
///     }
///
///     fn define_steps(&self, workflow: &mut Workflow<u32>) -> Result<(), WorkflowError> {
///         workflow
///             .add_step("load", step_fn(|_: &Context<u32>| Ok(1)), &[])?
///             .add_step(
///                 "score",
///                 step_fn(|ctx: &Context<u32>| Ok(ctx.get("load").copied().unwrap_or(0) * 10)),
///                 &["load"],
///             )?;
///         Ok(())
///     }
/// }
///
/// let workflow = Workflow::from_definition(&Pipeline)?;
/// assert_eq!(workflow.name(), "pipeline");
/// # Ok::<(), WorkflowError>(())
/// ```
pub trait WorkflowDefinition<T> {
    fn name(&self) -> &str;

    /// Registers the steps on a freshly created workflow.
    fn define_steps(&self, workflow: &mut Workflow<T>) -> Result<(), WorkflowError>;

    /// Context the workflow starts with. Empty by default.
    fn initial_context(&self) -> Context<T> {
        Context::new()
    }
}

struct PendingStep<T> {
    name: StepName,
    step: Arc<dyn Step<T>>,
    dependencies: Vec<StepName>,
    config: StepConfig,
}

/// Builder for constructing [`Workflow`] instances.
///
/// Registration errors are deferred to [`build`](WorkflowBuilder::build),
/// which also validates the dependency graph.
///
/// ```
/// use kumiito::{step_fn, Context, StepConfig, Workflow};
///
/// let workflow = Workflow::<i32>::builder("scoring")
///     .id("run-42")
///     .add_step("fetch", step_fn(|_: &Context<i32>| Ok(3)), &[])
///     .add_configured(
///         "score",
///         step_fn(|_: &Context<i32>| Ok(7)),
///         &["fetch"],
///         StepConfig::default().optional(),
///     )
///     .build()?;
///
/// assert_eq!(workflow.id(), "run-42");
/// # Ok::<(), kumiito::WorkflowError>(())
/// ```
pub struct WorkflowBuilder<T> {
    name: String,
    id: Option<String>,
    context: Context<T>,
    steps: Vec<PendingStep<T>>,
}

impl<T> WorkflowBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            context: Context::new(),
            steps: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn context(mut self, context: Context<T>) -> Self {
        self.context = context;
        self
    }

    pub fn add_step<S: Step<T> + 'static>(
        self,
        name: impl Into<StepName>,
        step: S,
        dependencies: &[&str],
    ) -> Self {
        let config = step.config();
        self.add_configured(name, step, dependencies, config)
    }

    pub fn add_configured<S: Step<T> + 'static>(
        mut self,
        name: impl Into<StepName>,
        step: S,
        dependencies: &[&str],
        config: StepConfig,
    ) -> Self {
        self.steps.push(PendingStep {
            name: name.into(),
            step: Arc::new(step),
            dependencies: dependencies.iter().map(|d| StepName::new(*d)).collect(),
            config,
        });
        self
    }

    pub fn build(self) -> Result<Workflow<T>, WorkflowError> {
        let mut workflow = match self.id {
            Some(id) => Workflow::with_id(self.name, id),
            None => Workflow::new(self.name),
        };
        workflow.context = Arc::new(self.context);

        for pending in self.steps {
            workflow.insert_entry(
                pending.name,
                pending.step,
                pending.dependencies,
                pending.config,
            )?;
        }

        workflow.validate()?;
        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::step_fn;

    fn constant(value: u32) -> impl Step<u32> {
        step_fn(move |_: &Context<u32>| Ok(value))
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut workflow = Workflow::new("dup");
        workflow.add_step("a", constant(1), &[]).unwrap();
        let err = workflow.add_step("a", constant(2), &[]).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateStep(ref n) if n == "a"));
        assert_eq!(workflow.step_count(), 1);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut workflow = Workflow::new("unknown");
        workflow
            .add_step("step1", constant(1), &[])
            .unwrap()
            .add_step("step2", constant(2), &["nonexistent"])
            .unwrap();

        match workflow.validate().unwrap_err() {
            WorkflowError::UnknownDependency {
                step_name,
                dependency,
            } => {
                assert_eq!(step_name, "step2");
                assert_eq!(dependency, "nonexistent");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_detected() {
        let mut workflow = Workflow::new("cycle");
        workflow
            .add_step("root", constant(0), &[])
            .unwrap()
            .add_step("a", constant(1), &["root", "c"])
            .unwrap()
            .add_step("b", constant(2), &["a"])
            .unwrap()
            .add_step("c", constant(3), &["b"])
            .unwrap();

        match workflow.validate().unwrap_err() {
            WorkflowError::CycleDetected { steps } => {
                assert_eq!(steps, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut workflow = Workflow::new("self");
        workflow.add_step("a", constant(1), &["a"]).unwrap();
        assert!(matches!(
            workflow.validate(),
            Err(WorkflowError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_topological_order_is_stable() {
        let mut workflow = Workflow::new("order");
        workflow
            .add_step("report", constant(0), &["score", "lint"])
            .unwrap()
            .add_step("lint", constant(0), &["load"])
            .unwrap()
            .add_step("load", constant(0), &[])
            .unwrap()
            .add_step("score", constant(0), &["load"])
            .unwrap()
            .add_step("banner", constant(0), &[])
            .unwrap();

        let order = workflow.topological_order().unwrap();
        assert_eq!(order, vec!["load", "lint", "score", "report", "banner"]);
    }

    #[test]
    fn test_builder_defers_errors() {
        let result = Workflow::<u32>::builder("b")
            .add_step("a", constant(1), &[])
            .add_step("a", constant(2), &[])
            .build();
        assert!(matches!(result, Err(WorkflowError::DuplicateStep(_))));

        let result = Workflow::<u32>::builder("b")
            .add_step("a", constant(1), &["missing"])
            .build();
        assert!(matches!(
            result,
            Err(WorkflowError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_builder_sets_id_and_context() {
        let mut ctx = Context::new();
        ctx.insert("seed", 5u32);

        let workflow = Workflow::builder("seeded")
            .id("fixed-id")
            .context(ctx)
            .add_step("a", constant(1), &[])
            .build()
            .unwrap();

        assert_eq!(workflow.id(), "fixed-id");
        assert_eq!(workflow.context().get("seed"), Some(&5));
        assert_eq!(workflow.step_status("a"), Some(StepStatus::Pending));
        assert_eq!(workflow.dependencies_of("a"), Some(&[][..]));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Workflow::<u32>::new("x");
        let b = Workflow::<u32>::new("x");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_context_mut_and_store_output() {
        let mut workflow = Workflow::new("ctx");
        workflow.add_step("a", constant(1), &[]).unwrap();
        workflow.context_mut().insert("seed", 9);

        workflow.store_output(0, 7);
        assert_eq!(workflow.context().get("a"), Some(&7));
        assert_eq!(workflow.context().get("seed"), Some(&9));
        assert_eq!(workflow.step_outputs().get("a"), Some(&7));
        assert_eq!(workflow.step_status("a"), Some(StepStatus::Succeeded));
    }
}
