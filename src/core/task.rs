//! Task data model for cross-domain coordination.
//!
//! Tasks are the atomic units of work exchanged between domains. A task
//! is immutable after creation: queue position and bridge records carry
//! all progress state, never the task itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One of the two independent orchestration contexts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Business,
    Technical,
}

impl Domain {
    /// Return the domain on the other side of the bridge.
    pub fn opposite(&self) -> Self {
        match self {
            Domain::Business => Domain::Technical,
            Domain::Technical => Domain::Business,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Business => "business",
            Domain::Technical => "technical",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "business" => Ok(Domain::Business),
            "technical" => Ok(Domain::Technical),
            other => Err(Error::Validation(format!("unknown domain: {}", other))),
        }
    }
}

/// Scheduling priority for a task.
///
/// Dequeue order is strictly by priority band (high before medium before
/// low); within a band tasks leave in arrival order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Priority {
    /// Numeric weight of the band (high = 2).
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::Validation(format!("unknown priority: {}", other))),
        }
    }
}

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Opaque key-value payload carried by a task.
///
/// The coordination layer never interprets, mutates, or drops fields; the
/// payload must survive a domain hop byte-for-byte. Integrity is checked
/// with a content hash over the canonical JSON encoding (the backing map
/// is key-sorted, so the hash is independent of insertion order).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskContext {
    fields: Map<String, Value>,
}

impl TaskContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning self for chaining.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Insert a field.
    pub fn insert(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    /// Look up a field by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Lowercase hex SHA-256 over the canonical JSON encoding.
    ///
    /// Equal contexts always hash equal; any change to any value changes
    /// the hash. The bridge records this at forward time and the receiving
    /// worker recomputes it at acknowledge time.
    pub fn content_hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.fields)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// A unit of work routed between domains.
///
/// Tasks are immutable after creation. The `type` field is free-form:
/// handler vocabularies (e.g. "validation", "deployment", "analysis")
/// belong to the consumers, not this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Domain that produced the task.
    pub origin_domain: Domain,
    /// Domain whose workers must process the task.
    pub target_domain: Domain,
    /// Free-form task type, used to select a handler.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Scheduling priority band.
    pub priority: Priority,
    /// Opaque payload, preserved byte-for-byte across hops.
    pub context: TaskContext,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with a generated id and current timestamp.
    pub fn new(
        origin_domain: Domain,
        target_domain: Domain,
        task_type: &str,
        priority: Priority,
        context: TaskContext,
    ) -> Self {
        Self {
            id: TaskId::new(),
            origin_domain,
            target_domain,
            task_type: task_type.to_string(),
            priority,
            context,
            created_at: Utc::now(),
        }
    }

    /// Whether the task must cross the bridge to reach its workers.
    pub fn is_cross_domain(&self) -> bool {
        self.origin_domain != self.target_domain
    }
}
