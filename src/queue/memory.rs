//! In-memory queues.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::TaskQueue;
use crate::{Error, Result};

#[derive(Default)]
struct QueueState {
    items: VecDeque<String>,
    closed: bool,
}

/// Blocking FIFO backed by a `VecDeque`.
///
/// After `close()` the remaining payloads can still be popped; once the
/// queue is empty `pop` fails with `Error::Queue`.
pub struct MemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Mark the transport as gone and wake every waiting consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<String> {
        self.state.lock().items.drain(..).collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pop(&self) -> Result<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(payload) = state.items.pop_front() {
                    return Ok(payload);
                }
                if state.closed {
                    return Err(Error::Queue(format!("queue {} closed", self.name)));
                }
            }
            notified.await;
        }
    }

    async fn push(&self, payload: String) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Queue(format!("queue {} closed", self.name)));
            }
            state.items.push_back(payload);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().items.len())
    }
}

/// Registry of named in-memory queues.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue called `name`, created on first use.
    pub fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryQueue::new(name)))
            .clone()
    }

    pub fn close_all(&self) {
        for queue in self.queues.lock().values() {
            queue.close();
        }
    }
}
