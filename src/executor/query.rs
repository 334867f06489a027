//! `run_query`: simulated query that fails one time in five.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::Executor;
use crate::error::{Error, Result};
use crate::payload::Params;

/// Draws run at or below this value fail.
pub const FAILURE_THRESHOLD: u32 = 20;

/// Yields a number in 1..=100 per call.
pub type RandomSource = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Default source backed by the thread-local RNG.
pub fn thread_rng_source() -> RandomSource {
    Arc::new(|| rand::rng().random_range(1..=100))
}

pub struct RunQuery {
    delay: Duration,
    random: RandomSource,
}

impl RunQuery {
    pub fn new(delay: Duration, random: RandomSource) -> Self {
        Self { delay, random }
    }
}

#[async_trait]
impl Executor for RunQuery {
    async fn execute(&self, params: &Params) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        let draw = (self.random)();
        debug!(query = params.get("query").map(String::as_str), draw, "query finished");
        if draw <= FAILURE_THRESHOLD {
            return Err(Error::Execution(format!("query failed (draw {draw})")));
        }
        Ok(())
    }
}
