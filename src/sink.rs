//! Outbound sinks: rejected relations and worker failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::identity::IdMethod;
use crate::queue::{RelationParams, TaskQueue};
use crate::taxonomy::RelationType;
use crate::Result;

// ============================================================================
// Rejected relations
// ============================================================================

/// A relation that could not be attached because an endpoint was missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub from: String,
    pub from_id_method: IdMethod,
    pub to: String,
    pub to_id_method: IdMethod,
    pub label: RelationType,
    pub source: String,
    /// The identifier that did not resolve.
    pub rejection_cause: String,
}

impl RejectionRecord {
    pub fn new(relation: &RelationParams, rejection_cause: impl Into<String>) -> Self {
        Self {
            from: relation.from.clone(),
            from_id_method: relation.from_id_method,
            to: relation.to.clone(),
            to_id_method: relation.to_id_method,
            label: relation.label,
            source: relation.source.clone(),
            rejection_cause: rejection_cause.into(),
        }
    }

    /// Queue envelope of the rejected-relations consumer.
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "action": "addToRejected",
            "type": "relation",
            "source": self.source,
            "data": {
                "from": self.from,
                "from_id_method": self.from_id_method,
                "to": self.to,
                "to_id_method": self.to_id_method,
                "label": self.label,
                "rejectionCause": self.rejection_cause,
            }
        })
    }
}

/// Append-only destination for rejected relations.
#[async_trait]
pub trait RejectionSink: Send + Sync {
    async fn reject(&self, record: RejectionRecord) -> Result<()>;
}

/// Keeps rejection records in memory.
#[derive(Default)]
pub struct MemoryRejectionLog {
    records: Mutex<Vec<RejectionRecord>>,
}

impl MemoryRejectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RejectionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RejectionSink for MemoryRejectionLog {
    async fn reject(&self, record: RejectionRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Pushes rejection envelopes onto a queue.
pub struct QueueRejectionSink {
    queue: Arc<dyn TaskQueue>,
}

impl QueueRejectionSink {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl RejectionSink for QueueRejectionSink {
    async fn reject(&self, record: RejectionRecord) -> Result<()> {
        self.queue.push(record.to_envelope().to_string()).await
    }
}

// ============================================================================
// Worker failures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The payload could not be parsed into a task.
    Parse,
    /// The task failed while being applied.
    Error,
    /// The task would have duplicated a canonical ID.
    Duplicate,
}

impl FailureKind {
    fn file_name(&self) -> &'static str {
        match self {
            FailureKind::Parse => "graphMsgParseErrors.txt",
            FailureKind::Error => "graphErrors.txt",
            FailureKind::Duplicate => "graphDuplicates.txt",
        }
    }

    fn header(&self) -> &'static str {
        match self {
            FailureKind::Duplicate => "Duplicate: ",
            FailureKind::Parse | FailureKind::Error => "Error: ",
        }
    }
}

/// Destination for tasks the worker could not apply.
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn report(&self, kind: FailureKind, message: &str) -> Result<()>;
}

/// Keeps failures in memory.
#[derive(Default)]
pub struct MemoryFailureLog {
    entries: Mutex<Vec<(FailureKind, String)>>,
}

impl MemoryFailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(FailureKind, String)> {
        self.entries.lock().clone()
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.entries.lock().iter().filter(|(k, _)| *k == kind).count()
    }
}

#[async_trait]
impl FailureSink for MemoryFailureLog {
    async fn report(&self, kind: FailureKind, message: &str) -> Result<()> {
        self.entries.lock().push((kind, message.to_owned()));
        Ok(())
    }
}

/// Appends timestamped lines to one file per failure kind.
pub struct FileFailureLog {
    dir: PathBuf,
    // Serializes appends from concurrent reporters.
    lock: tokio::sync::Mutex<()>,
}

impl FileFailureLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), lock: tokio::sync::Mutex::new(()) }
    }

    pub fn path_for(&self, kind: FailureKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl FailureSink for FileFailureLog {
    async fn report(&self, kind: FailureKind, message: &str) -> Result<()> {
        let stamp = chrono::Local::now().format("[%Y-%m-%d %H:%M:%S] ");
        let line = format!("{stamp}{}{message}\n", kind.header());

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(kind))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
