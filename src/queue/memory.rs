//! In-memory dispatch queue for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::DispatchQueue;
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    channels: HashMap<String, VecDeque<String>>,
    fail_publish: bool,
}

/// FIFO channels behind a mutex. Same delivery semantics as the pgmq client:
/// a received message is gone from the queue.
#[derive(Default)]
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Other("in-memory queue mutex poisoned".to_string()))
    }

    /// Messages currently waiting on `channel`.
    pub fn len(&self, channel: &str) -> usize {
        self.lock()
            .map(|inner| inner.channels.get(channel).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel: &str) -> bool {
        self.len(channel) == 0
    }

    /// Copy of the messages waiting on `channel`, oldest first.
    pub fn peek_all(&self, channel: &str) -> Vec<String> {
        self.lock()
            .map(|inner| {
                inner
                    .channels
                    .get(channel)
                    .map(|q| q.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Make every subsequent publish fail, as if the broker were unreachable.
    pub fn set_fail_publish(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_publish = fail;
        }
    }
}

#[async_trait]
impl DispatchQueue for InMemoryQueue {
    async fn publish(&self, channel: &str, body: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.fail_publish {
            return Err(Error::Queue(format!("publish to {channel} refused")));
        }
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .push_back(body.to_string());
        Ok(())
    }

    async fn receive(&self, channel: &str, _consumer: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        Ok(inner.channels.get_mut(channel).and_then(VecDeque::pop_front))
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}
