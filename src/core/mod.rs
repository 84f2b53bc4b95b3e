//! Core domain models for cross-domain coordination.
//!
//! This module contains the fundamental data structures used throughout
//! the coordination system: the task model and the per-domain queue.

pub mod queue;
pub mod task;

pub use queue::{DomainQueue, DEFAULT_MAX_DEPTH};
pub use task::{Domain, Priority, Task, TaskContext, TaskId};
