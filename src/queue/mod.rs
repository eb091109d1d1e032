//! # Work queue
//!
//! The worker drains a named queue of JSON task payloads, one at a time,
//! and forwards applied payloads to a downstream queue. The transport is
//! behind `TaskQueue`; `MemoryQueue` is the in-process implementation.
//!
//! A queue that can no longer be popped is fatal to the worker.

pub mod memory;
pub mod task;
pub mod worker;

use async_trait::async_trait;
use crate::Result;

pub use memory::{MemoryBroker, MemoryQueue};
pub use task::{Action, PitData, RelationParams, Task, TaskType};
pub use worker::{Worker, WorkerStats};

/// A FIFO of string payloads.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Queue name, for logging.
    fn name(&self) -> &str;

    /// Pop the oldest payload, waiting until one is available.
    ///
    /// Fails with `Error::Queue` once the transport is gone.
    async fn pop(&self) -> Result<String>;

    /// Append a payload.
    async fn push(&self, payload: String) -> Result<()>;

    /// Number of payloads waiting.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
