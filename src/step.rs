use crate::context::Context;
use crate::error::StepError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Type-safe step name wrapper.
///
/// # Examples
///
/// ```
/// use kumiito::StepName;
///
/// let name = StepName::new("generate_outline");
/// assert_eq!(name.as_str(), "generate_outline");
///
/// let name: StepName = "persist_outline".into();
/// assert_eq!(name, "persist_outline");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&StepName> for StepName {
    fn from(s: &StepName) -> Self {
        s.clone()
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StepName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Retry policy for step execution.
///
/// `max_retries` is the number of additional attempts after the first
/// failure. The delay is slept between attempts.
///
/// # Examples
///
/// ```
/// use kumiito::RetryPolicy;
/// use std::time::Duration;
///
/// // No retry (default)
/// let policy = RetryPolicy::None;
///
/// // Retry twice, immediately
/// let policy = RetryPolicy::immediate(2);
/// assert_eq!(policy.max_retries(), 2);
///
/// // Fixed delay: retry 3 times with 1 second delay
/// let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
///
/// // Exponential backoff: retry 5 times starting at 100ms
/// let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// No retry - fail immediately on error.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Delay between each retry
        delay: Duration,
    },
    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Initial delay before first retry
        initial_delay: Duration,
        /// Maximum delay cap
        max_delay: Duration,
        /// Multiplier for each retry (e.g., 2 doubles the delay)
        multiplier: u32,
    },
}

/// Error returned when [`RetryPolicy`] configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyError(pub &'static str);

impl std::fmt::Display for RetryPolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryPolicyError {}

impl RetryPolicy {
    /// Retries up to `max_retries` times with no delay in between.
    pub fn immediate(max_retries: u32) -> Self {
        if max_retries == 0 {
            return RetryPolicy::None;
        }
        RetryPolicy::Fixed {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    /// Creates a fixed retry policy.
    ///
    /// ```
    /// use kumiito::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
    /// assert_eq!(policy.max_retries(), 3);
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(1)));
    /// ```
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates an exponential backoff retry policy with `multiplier=2` and
    /// `max_delay=60s`.
    ///
    /// ```
    /// use kumiito::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
    ///
    /// // Delays: 100ms, 200ms, 400ms, ...
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
    /// ```
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff retry policy with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if `multiplier` is 0 or greater than 10,
    /// or if `max_delay` is less than `initial_delay`.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(RetryPolicyError(
                "multiplier must be 10 or less to avoid overflow",
            ));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Returns the maximum number of retries for this policy.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Calculates the delay before the given retry (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = (*multiplier as u64).saturating_pow(attempt);
                let delay = (initial_delay.as_millis() as u64).saturating_mul(factor);
                Some(Duration::from_millis(
                    delay.min(max_delay.as_millis() as u64),
                ))
            }
        }
    }
}

/// Execution policy of a workflow step.
///
/// # Examples
///
/// ```
/// use kumiito::{StepConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = StepConfig::default()
///     .with_timeout(Duration::from_secs(60))
///     .with_retry(RetryPolicy::fixed(3, Duration::from_secs(1)))
///     .optional();
///
/// assert_eq!(config.retry_count(), 3);
/// assert!(!config.required);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepConfig {
    /// Maximum time allowed for one attempt. `None` falls back to the
    /// engine's default timeout, which is unbounded unless configured.
    pub timeout: Option<Duration>,
    /// Retry policy when an attempt fails. Default: no retry.
    pub retry_policy: RetryPolicy,
    /// Whether a permanent failure of this step fails the workflow.
    /// Default: `true`.
    pub required: bool,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            retry_policy: RetryPolicy::None,
            required: true,
        }
    }
}

impl StepConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Shorthand for [`RetryPolicy::immediate`].
    pub fn with_retry_count(self, retry_count: u32) -> Self {
        self.with_retry(RetryPolicy::immediate(retry_count))
    }

    /// Marks the step as optional: its failure is recorded but does not
    /// fail the workflow.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Number of additional attempts after the first failure.
    pub fn retry_count(&self) -> u32 {
        self.retry_policy.max_retries()
    }
}

/// Lifecycle state of a step within one run.
///
/// `Pending → Running → {Succeeded | Failed}`, with `Failed` attempts looping
/// back to `Running` while retries remain. A step whose dependency did not
/// succeed goes straight from `Pending` to `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// The body of a workflow step.
///
/// A step reads the shared context (which already holds the outputs of all
/// of its dependencies, keyed by step name) and produces one output value.
/// Returning `Err` counts as one failed attempt.
///
/// # Examples
///
/// ```
/// use kumiito::prelude::*;
/// use async_trait::async_trait;
///
/// struct CountWords;
///
/// #[async_trait]
/// impl Step<String> for CountWords {
///     async fn execute(&self, ctx: &Context<String>) -> Result<String, StepError> {
///         let draft = ctx.get("draft").ok_or_else(|| StepError::msg("no draft"))?;
///         Ok(draft.split_whitespace().count().to_string())
///     }
///
///     fn config(&self) -> StepConfig {
///         StepConfig::default().with_timeout(std::time::Duration::from_secs(5))
///     }
/// }
/// ```
#[async_trait]
pub trait Step<T>: Send + Sync {
    /// Executes one attempt of the step.
    async fn execute(&self, ctx: &Context<T>) -> Result<T, StepError>;

    /// Returns the step's default execution policy.
    ///
    /// Used by [`Workflow::add_step`](crate::Workflow::add_step);
    /// [`Workflow::add_configured`](crate::Workflow::add_configured)
    /// overrides it.
    fn config(&self) -> StepConfig {
        StepConfig::default()
    }
}

/// Step body backed by a synchronous closure. Built with [`step_fn`].
pub struct FnStep<F> {
    f: F,
}

impl<F> fmt::Debug for FnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").finish_non_exhaustive()
    }
}

/// Adapts a closure into a step body.
///
/// ```
/// use kumiito::{step_fn, Context, StepError};
///
/// let double = step_fn(|ctx: &Context<i64>| {
///     ctx.get("seed").map(|n| n * 2).ok_or_else(|| StepError::msg("no seed"))
/// });
/// # let _ = double;
/// ```
pub fn step_fn<T, F>(f: F) -> FnStep<F>
where
    F: Fn(&Context<T>) -> Result<T, StepError> + Send + Sync,
{
    FnStep { f }
}

#[async_trait]
impl<T, F> Step<T> for FnStep<F>
where
    T: Send + Sync + 'static,
    F: Fn(&Context<T>) -> Result<T, StepError> + Send + Sync,
{
    async fn execute(&self, ctx: &Context<T>) -> Result<T, StepError> {
        (self.f)(ctx)
    }
}
