//! The queue worker: a single consumer applying tasks in arrival order.
//!
//! A task that fails is reported to the failure sink and skipped. Only a
//! queue failure stops the loop.
//!
//! Besides the downstream queue, two payload kinds are copied to the
//! rejected-relations queue: relation deletes as soon as they parse, and
//! PIT adds once the PIT exists. The consumer of that queue uses them to
//! drop or retry rejected relations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::{Task, TaskQueue};
use crate::mutation::MutationOutcome;
use crate::sink::{FailureKind, FailureSink};
use crate::storage::StorageBackend;
use crate::{Error, Histograph, Result};

/// Counters since the worker started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub applied: u64,
    pub rejected: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    applied: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

pub struct Worker<B: StorageBackend> {
    graph: Arc<Histograph<B>>,
    input: Arc<dyn TaskQueue>,
    downstream: Arc<dyn TaskQueue>,
    rejected: Arc<dyn TaskQueue>,
    failures: Arc<dyn FailureSink>,
    progress_interval: u64,
    counters: Counters,
}

impl<B: StorageBackend> Worker<B> {
    pub fn new(
        graph: Arc<Histograph<B>>,
        input: Arc<dyn TaskQueue>,
        downstream: Arc<dyn TaskQueue>,
        rejected: Arc<dyn TaskQueue>,
        failures: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            graph,
            input,
            downstream,
            rejected,
            failures,
            progress_interval: 100,
            counters: Counters::default(),
        }
    }

    pub fn with_progress_interval(mut self, every: u64) -> Self {
        self.progress_interval = every;
        self
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Drain the input queue until it fails. Always returns an error: the
    /// queue failure that ended the loop.
    pub async fn run(&self) -> Result<WorkerStats> {
        tracing::info!(queue = self.input.name(), "ready to take messages");
        loop {
            if let Err(e) = self.step().await {
                tracing::error!(error = %e, stats = ?self.stats(), "worker stopped");
                return Err(e);
            }
        }
    }

    /// Pop and handle one payload. Fails only on queue errors.
    pub async fn step(&self) -> Result<()> {
        let payload = self.input.pop().await?;
        self.handle(payload).await?;

        let processed = self.counters.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.progress_interval > 0 && processed % self.progress_interval == 0 {
            let left = self.input.len().await?;
            tracing::info!(processed, left, "progress");
        }
        Ok(())
    }

    async fn handle(&self, payload: String) -> Result<()> {
        let task = match Task::parse(&payload) {
            Ok(task) => task,
            Err(e) => {
                self.fail(FailureKind::Parse, &e).await;
                return Ok(());
            }
        };

        // A rejected row may exist even when the graph has no such relation.
        if matches!(task, Task::DeleteRelation(_)) {
            self.rejected.push(payload.clone()).await?;
        }

        match self.graph.apply(&task).await {
            Ok(MutationOutcome::RelationRejected { record }) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::info!(cause = %record.rejection_cause, label = %record.label, "relation rejected");
            }
            Ok(outcome) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                tracing::info!(action = ?task.action(), task_type = ?task.task_type(), ?outcome, "task applied");
                if matches!(outcome, MutationOutcome::PitAdded { .. }) {
                    self.rejected.push(payload.clone()).await?;
                }
            }
            Err(e @ Error::Queue(_)) => return Err(e),
            Err(e @ Error::DuplicateKey(_)) => self.fail(FailureKind::Duplicate, &e).await,
            Err(e) => self.fail(FailureKind::Error, &e).await,
        }

        self.downstream.push(payload).await
    }

    async fn fail(&self, kind: FailureKind, error: &Error) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(?kind, %error, "task failed");
        if let Err(e) = self.failures.report(kind, &error.to_string()).await {
            tracing::warn!(error = %e, "could not record failure");
        }
    }
}
