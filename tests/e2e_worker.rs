//! End-to-end tests for the queue worker over in-memory queues.

use std::sync::Arc;
use std::time::Duration;

use histograph::queue::WorkerStats;
use histograph::{
    Error, FailureKind, FileFailureLog, Histograph, MemoryBackend, MemoryBroker, MemoryFailureLog,
    QueueRejectionSink, StorageBackend, TaskQueue, TxMode, Worker,
};
use pretty_assertions::assert_eq;
use serde_json::json;

struct Harness {
    broker: MemoryBroker,
    graph: Arc<Histograph<MemoryBackend>>,
}

impl Harness {
    async fn new() -> Self {
        let broker = MemoryBroker::new();
        let rejected = broker.queue("histograph-pg");
        let graph = Histograph::new(MemoryBackend::new(), Arc::new(QueueRejectionSink::new(rejected)));
        graph.install_schema().await.unwrap();
        Self { broker, graph: Arc::new(graph) }
    }

    fn worker(&self, failures: Arc<dyn histograph::FailureSink>) -> Worker<MemoryBackend> {
        Worker::new(
            self.graph.clone(),
            self.broker.queue("histograph-graph"),
            self.broker.queue("histograph-es"),
            self.broker.queue("histograph-pg"),
            failures,
        )
        .with_progress_interval(2)
    }

    async fn push(&self, payload: impl Into<String>) {
        self.broker.queue("histograph-graph").push(payload.into()).await.unwrap();
    }
}

fn pit(id: &str) -> String {
    json!({ "source": "tgn", "action": "add", "type": "pit",
            "data": { "id": id, "name": id, "type": "hg:Place" } })
    .to_string()
}

fn relation(action: &str, from: &str, to: &str) -> String {
    json!({ "source": "tgn", "action": action, "type": "relation",
            "data": { "from": from, "to": to, "label": "hg:liesIn" } })
    .to_string()
}

#[tokio::test]
async fn test_worker_routes_every_outcome() {
    let h = Harness::new().await;
    let failures = Arc::new(MemoryFailureLog::new());
    let worker = h.worker(failures.clone());

    let payloads = [
        pit("a"),
        pit("a"),
        "garbage".to_string(),
        relation("add", "a", "missing"),
        relation("update", "a", "b"),
        pit("b"),
        relation("add", "a", "b"),
    ];
    for p in &payloads {
        h.push(p.clone()).await;
    }
    h.broker.queue("histograph-graph").close();

    let err = worker.run().await;
    assert!(matches!(err, Err(Error::Queue(_))), "got {err:?}");
    assert_eq!(worker.stats(), WorkerStats { processed: 7, applied: 3, rejected: 1, failed: 3 });

    assert_eq!(failures.count(FailureKind::Duplicate), 1);
    assert_eq!(failures.count(FailureKind::Parse), 1);
    assert_eq!(failures.count(FailureKind::Error), 1);

    // Every payload that parsed goes downstream, in order.
    let forwarded = h.broker.queue("histograph-es").drain();
    let expected: Vec<String> = payloads.iter().filter(|p| *p != "garbage").cloned().collect();
    assert_eq!(forwarded, expected);

    // Added PITs share the queue with the rejection records.
    let rejected = h.broker.queue("histograph-pg").drain();
    assert_eq!(rejected.len(), 3);
    assert_eq!(rejected[0], pit("a"));
    let envelope: serde_json::Value = serde_json::from_str(&rejected[1]).unwrap();
    assert_eq!(envelope["action"], "addToRejected");
    assert_eq!(envelope["data"]["rejectionCause"], "tgn/missing");
    assert_eq!(rejected[2], pit("b"));

    let db = h.graph.backend();
    let tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
    assert_eq!(db.node_count(&tx).await.unwrap(), 2);
    assert_eq!(db.relationship_count(&tx).await.unwrap(), 2);
}

#[tokio::test]
async fn test_worker_waits_for_tasks() {
    let h = Harness::new().await;
    let worker = Arc::new(h.worker(Arc::new(MemoryFailureLog::new())));

    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    h.push(pit("late")).await;

    let downstream = h.broker.queue("histograph-es");
    tokio::time::timeout(Duration::from_secs(5), async {
        while downstream.is_empty().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    h.broker.close_all();
    let result = running.await.unwrap();
    assert!(matches!(result, Err(Error::Queue(_))));
    assert_eq!(worker.stats().applied, 1);
}

/// Stand-in for the rejected-relations consumer: keeps rejected rows and
/// returns a retry for each row whose cause is a PIT that was just added.
fn retries_from(messages: Vec<String>) -> Vec<String> {
    let mut rows: Vec<serde_json::Value> = Vec::new();
    let mut retries = Vec::new();
    for message in messages {
        let envelope: serde_json::Value = serde_json::from_str(&message).unwrap();
        match envelope["action"].as_str().unwrap() {
            "addToRejected" => rows.push(envelope),
            "add" => {
                let hgid = format!(
                    "{}/{}",
                    envelope["source"].as_str().unwrap(),
                    envelope["data"]["id"].as_str().unwrap()
                );
                for row in rows.iter().filter(|r| r["data"]["rejectionCause"] == hgid.as_str()) {
                    let retry = json!({
                        "source": row["source"], "action": "add", "type": "relation",
                        "data": {
                            "from": row["data"]["from"], "to": row["data"]["to"],
                            "label": row["data"]["label"], "rejectionCause": row["data"]["rejectionCause"]
                        }
                    });
                    retries.push(retry.to_string());
                }
            }
            other => panic!("unexpected message kind {other}"),
        }
    }
    retries
}

#[tokio::test]
async fn test_rejected_relation_retried_after_pit_arrives() {
    let h = Harness::new().await;
    let worker = h.worker(Arc::new(MemoryFailureLog::new()));

    h.push(pit("a")).await;
    h.push(relation("add", "a", "b")).await;
    h.push(pit("b")).await;
    for _ in 0..3 {
        worker.step().await.unwrap();
    }

    // Adding tgn/b is what lets the consumer retry the rejected relation.
    let retries = retries_from(h.broker.queue("histograph-pg").drain());
    assert_eq!(retries.len(), 1);
    h.push(retries[0].clone()).await;
    worker.step().await.unwrap();

    assert_eq!(worker.stats(), WorkerStats { processed: 4, applied: 3, rejected: 1, failed: 0 });
    let db = h.graph.backend();
    let tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
    assert_eq!(db.relationships_by_type(&tx, "hg:liesIn").await.unwrap().len(), 1);
    assert!(h.broker.queue("histograph-pg").drain().is_empty());
}

#[tokio::test]
async fn test_relation_delete_forwarded_to_rejected_queue() {
    let h = Harness::new().await;
    let failures = Arc::new(MemoryFailureLog::new());
    let worker = h.worker(failures.clone());

    // Neither endpoint exists: only a rejected row could match.
    let delete = relation("delete", "a", "b");
    h.push(delete.clone()).await;
    worker.step().await.unwrap();
    assert_eq!(failures.count(FailureKind::Error), 1);

    assert_eq!(h.broker.queue("histograph-pg").drain(), vec![delete.clone()]);
    assert_eq!(h.broker.queue("histograph-es").drain(), vec![delete]);
}

#[tokio::test]
async fn test_failures_written_to_files() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(FileFailureLog::new(dir.path()));
    let h = Harness::new().await;
    let worker = h.worker(log.clone());

    h.push("{").await;
    h.push(pit("a")).await;
    h.push(pit("a")).await;
    for _ in 0..3 {
        worker.step().await.unwrap();
    }

    let parse = std::fs::read_to_string(log.path_for(FailureKind::Parse)).unwrap();
    assert!(parse.contains("Error: Malformed input"), "{parse}");
    let duplicates = std::fs::read_to_string(log.path_for(FailureKind::Duplicate)).unwrap();
    assert_eq!(duplicates.lines().count(), 1);
    assert!(duplicates.contains("Duplicate: "));
    assert!(!log.path_for(FailureKind::Error).exists());
}
