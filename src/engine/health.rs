//! Liveness check across the worker's three collaborators.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::lock::DistributedLock;
use crate::queue::DispatchQueue;
use crate::store::TaskStore;

/// Result of pinging one collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: Vec<ComponentHealth>,
}

impl HealthReport {
    /// Names of the collaborators that failed their ping.
    pub fn failing(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| c.name)
            .collect()
    }
}

pub struct HealthCheck {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DispatchQueue>,
    lock: Arc<dyn DistributedLock>,
}

impl HealthCheck {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DispatchQueue>,
        lock: Arc<dyn DistributedLock>,
    ) -> Self {
        Self { store, queue, lock }
    }

    /// Ping store, queue and lock. Every collaborator is checked even when an
    /// earlier one fails.
    pub async fn check(&self) -> HealthReport {
        let (store, queue, lock) =
            tokio::join!(self.store.ping(), self.queue.ping(), self.lock.ping());

        let checks: Vec<ComponentHealth> = [("store", store), ("queue", queue), ("lock", lock)]
            .into_iter()
            .map(|(name, result)| match result {
                Ok(()) => ComponentHealth {
                    name,
                    healthy: true,
                    error: None,
                },
                Err(e) => {
                    warn!(component = name, error = %e, "health check failed");
                    ComponentHealth {
                        name,
                        healthy: false,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        HealthReport {
            healthy: checks.iter().all(|c| c.healthy),
            checks,
        }
    }
}
