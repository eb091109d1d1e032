//! # histograph: PIT graph core
//!
//! Maintains a property graph of historical places ("points in time", PITs)
//! fed by a queue of add/update/delete tasks, and keeps derived relations in
//! step with asserted ones.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the engines and storage
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross all boundaries
//! 3. **Outcomes, not exceptions**: a rejected relation is a value, not an error
//! 4. **Taxonomy as data**: the primary → atomic table is an immutable `Taxonomy`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use histograph::{Histograph, MemoryRejectionLog, Task, TraversalRequest};
//!
//! # async fn example() -> histograph::Result<()> {
//! let rejections = Arc::new(MemoryRejectionLog::new());
//! let graph = Histograph::open_memory(rejections.clone()).await?;
//!
//! let task = Task::parse(r#"{"source": "tgn", "action": "add", "type": "pit",
//!     "data": {"id": "7006952", "name": "Amsterdam", "type": "hg:Place"}}"#)?;
//! graph.apply(&task).await?;
//!
//! let clusters = graph.traverse(&TraversalRequest { hgids: vec!["tgn/7006952".into()] }).await?;
//! println!("{}", serde_json::to_string(&clusters)?);
//! assert!(rejections.is_empty());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod tx;
pub mod index;
pub mod identity;
pub mod taxonomy;
pub mod reasoner;
pub mod mutation;
pub mod traversal;
pub mod queue;
pub mod sink;
pub mod config;
pub mod logging;

use std::sync::Arc;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap,
    NodeId, RelId, Direction,
};
pub use storage::{StorageBackend, ConstraintType, MemoryBackend};
pub use tx::{Transaction, TxMode, TxId};
pub use identity::IdMethod;
pub use taxonomy::{RelationType, Taxonomy};
pub use reasoner::TransitiveReport;
pub use mutation::{MutationEngine, MutationOutcome};
pub use traversal::{TraversalEngine, TraversalRequest, TraversalResponse};
pub use queue::{MemoryBroker, MemoryQueue, RelationParams, Task, TaskQueue, Worker};
pub use sink::{
    FailureKind, FailureSink, FileFailureLog, MemoryFailureLog,
    MemoryRejectionLog, QueueRejectionSink, RejectionRecord, RejectionSink,
};
pub use config::Config;

// ============================================================================
// Top-level Histograph handle
// ============================================================================

/// The primary entry point. Wraps a storage backend together with the
/// taxonomy and rejection sink the engines need.
///
/// Task application and the transitive pass share a maintenance lock and
/// never interleave. Traversal does not take it.
pub struct Histograph<B: StorageBackend> {
    backend: B,
    taxonomy: Arc<Taxonomy>,
    rejections: Arc<dyn RejectionSink>,
    maintenance: tokio::sync::Mutex<()>,
}

impl<B: StorageBackend> Histograph<B> {
    /// Create a handle with the default taxonomy. Relations that cannot be
    /// attached go to `rejections`. The backend schema is not touched.
    pub fn new(backend: B, rejections: Arc<dyn RejectionSink>) -> Self {
        Self {
            backend,
            taxonomy: Arc::new(Taxonomy::default()),
            rejections,
            maintenance: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = Arc::new(taxonomy);
        self
    }

    /// Uniqueness on `PIT.hgid`, equality index on `PIT.uri`.
    pub async fn install_schema(&self) -> Result<()> {
        use model::tokens::{pit, PIT_LABEL};
        self.backend.create_constraint(PIT_LABEL, pit::HGID, ConstraintType::Unique).await?;
        self.backend.create_index(PIT_LABEL, pit::URI, index::IndexType::Exact).await
    }

    /// Apply one task.
    pub async fn apply(&self, task: &Task) -> Result<MutationOutcome> {
        let _guard = self.maintenance.lock().await;
        MutationEngine::new(&self.backend, &self.taxonomy, self.rejections.as_ref())
            .apply(task)
            .await
    }

    /// Run the transitive pass to its fixed point with task application paused.
    pub async fn infer_transitive(&self) -> Result<TransitiveReport> {
        let _guard = self.maintenance.lock().await;
        reasoner::infer_transitive(&self.backend, &self.taxonomy).await
    }

    /// Cluster the given seeds.
    pub async fn traverse(&self, request: &TraversalRequest) -> Result<TraversalResponse> {
        TraversalEngine::new(&self.backend, &self.taxonomy).traverse(request).await
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn rejection_sink(&self) -> &Arc<dyn RejectionSink> {
        &self.rejections
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// In-memory graph for testing and embedding.
impl Histograph<storage::MemoryBackend> {
    pub async fn open_memory(rejections: Arc<dyn RejectionSink>) -> Result<Self> {
        let graph = Self::new(storage::MemoryBackend::new(), rejections);
        graph.install_schema().await?;
        Ok(graph)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
