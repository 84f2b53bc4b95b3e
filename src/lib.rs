pub mod config;
pub mod coordination;
pub mod core;
pub mod error;
pub mod log;

pub use config::Config;
pub use coordination::{CoordinationBridge, HealthMonitor, MetricsAggregator, Orchestrator};
pub use crate::core::{Domain, DomainQueue, Priority, Task, TaskContext, TaskId};
pub use error::{Error, Result};
