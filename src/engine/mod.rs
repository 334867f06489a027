//! Task pipeline engine: submission, the worker loop, the recovery sweep and
//! the liveness check.

pub mod health;
pub mod recovery;
pub mod submit;
pub mod worker;

pub use health::{ComponentHealth, HealthCheck, HealthReport};
pub use recovery::{RecoveryReport, RecoveryRequest, RecoverySweeper};
pub use submit::TaskService;
pub use worker::{DeliveryOutcome, Worker, WorkerConfig};
