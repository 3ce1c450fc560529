//! Commonly used types and traits

pub use crate::context::Context;
pub use crate::engine::{Engine, EngineConfig};
pub use crate::error::{StepError, WorkflowError};
pub use crate::lifecycle::{Lifecycle, ManagedWorkflow};
pub use crate::result::{WorkflowResult, WorkflowStatus};
pub use crate::step::{step_fn, RetryPolicy, Step, StepConfig, StepName, StepStatus};
pub use crate::workflow::{Workflow, WorkflowDefinition};
