//! `send_email`: simulated delivery that always succeeds.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::Executor;
use crate::error::Result;
use crate::payload::Params;

pub struct SendEmail {
    delay: Duration,
}

impl SendEmail {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Executor for SendEmail {
    async fn execute(&self, params: &Params) -> Result<()> {
        debug!(to = params.get("to").map(String::as_str), "sending email");
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
