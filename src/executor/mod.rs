//! Executor registry.
//!
//! An executor is the capability that actually performs a task. Each task
//! carries a type tag; the registry maps that tag to a factory producing a
//! fresh executor for every delivery. Unknown tags are a domain error and
//! send the task straight to `Failed`.

pub mod email;
pub mod query;

pub use email::SendEmail;
pub use query::{RandomSource, RunQuery};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::payload::Params;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Perform one attempt. Called again by the worker on each retry.
    async fn execute(&self, params: &Params) -> Result<()>;
}

/// Builds an executor for one delivery.
pub type ExecutorFactory = Arc<dyn Fn() -> Box<dyn Executor> + Send + Sync>;

/// Task types this crate ships executors for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SendEmail,
    RunQuery,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::SendEmail, TaskKind::RunQuery];

    pub fn tag(self) -> &'static str {
        match self {
            TaskKind::SendEmail => "send_email",
            TaskKind::RunQuery => "run_query",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.tag() == s)
            .ok_or_else(|| Error::UnknownTaskType(s.to_string()))
    }
}

/// Knobs for the built-in executors.
#[derive(Clone)]
pub struct ExecutorSettings {
    /// Simulated work duration.
    pub delay: Duration,
    /// Source of the 1..=100 draw used by `run_query`.
    pub random: RandomSource,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            random: query::thread_rng_source(),
        }
    }
}

impl fmt::Debug for ExecutorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSettings")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Tag -> factory map.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    factories: BTreeMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    /// Create an empty registry with no executors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `send_email` and `run_query`.
    pub fn with_defaults(settings: ExecutorSettings) -> Self {
        let mut registry = Self::new();
        let delay = settings.delay;
        registry.register(TaskKind::SendEmail.tag(), move || {
            Box::new(SendEmail::new(delay))
        });
        let random = settings.random;
        registry.register(TaskKind::RunQuery.tag(), move || {
            Box::new(RunQuery::new(delay, random.clone()))
        });
        registry
    }

    /// Register (or replace) the factory for `tag`.
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Executor> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
    }

    /// Construct an executor for `tag`.
    pub fn build(&self, tag: &str) -> Result<Box<dyn Executor>> {
        self.factories
            .get(tag)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownTaskType(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
