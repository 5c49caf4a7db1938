//! Concurrency Safety Tests
//!
//! - Concurrent inserts are all stored exactly once
//! - Caller input is never aliased by stored state
//! - Mixed concurrent reads and writes stay within the read limiter
//! - Queued mutations apply in call order regardless of await order

use std::time::Duration;

use emberdb::{Database, DatabaseConfig, FieldDef, FieldType, FindOptions};
use futures_util::future::join_all;
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn config() -> DatabaseConfig {
    DatabaseConfig::new(vec![
        FieldDef::number("id"),
        FieldDef::string("owner"),
        FieldDef::new("labels", FieldType::StringArray),
    ])
    .with_indexes(["id", "owner", "labels"])
    .with_buffer_size(16)
}

fn record(i: usize) -> Value {
    json!({
        "id": i,
        "owner": format!("user{}", i % 4),
        "labels": ["shared", format!("l{}", i)],
    })
}

// =============================================================================
// Inserts
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_concurrent_inserts() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("c.jsonl"), config()).await.unwrap();

    let inputs: Vec<Value> = (0..100).map(record).collect();
    let originals = inputs.clone();

    let tasks: Vec<_> = inputs
        .iter()
        .map(|input| {
            let insert = db.insert(input);
            tokio::spawn(insert)
        })
        .collect();
    for task in join_all(tasks).await {
        assert_eq!(task.unwrap().unwrap(), 1);
    }

    assert_eq!(inputs, originals, "caller input must not be modified");
    assert_eq!(db.record_count().await, 100);

    let mut ids: Vec<u64> = db
        .find(&Value::Null, FindOptions::default())
        .await
        .unwrap()
        .iter()
        .map(|r| r["id"].as_u64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..100).collect::<Vec<u64>>());
    assert_eq!(db.count(&json!({"labels": "shared"})).await.unwrap(), 100);

    // Mutating a returned record leaves stored state alone
    let mut first = db.find_one(&json!({"id": 0})).await.unwrap().unwrap();
    first["owner"] = json!("mallory");
    assert_eq!(db.count(&json!({"owner": "mallory"})).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finds_and_inserts() {
    let dir = TempDir::new().unwrap();
    let cfg = DatabaseConfig {
        max_read_concurrency: 2,
        ..config()
    };
    let db = Database::open(dir.path().join("mixed.jsonl"), cfg).await.unwrap();
    let seed: Vec<Value> = (0..200).map(record).collect();
    db.insert_many(&seed).await.unwrap();
    db.flush().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..100 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                db.insert(&record(200 + i)).await.map(|_| 0)
            } else {
                let owner = format!("user{}", i % 4);
                db.find(&json!({"owner": owner}), FindOptions::default())
                    .await
                    .map(|found| found.len())
            }
        }));
    }
    for handle in join_all(handles).await {
        let outcome = handle.unwrap();
        assert!(outcome.is_ok(), "operation failed: {:?}", outcome.err());
    }

    db.wait_for_completion(Some(Duration::from_secs(30))).await.unwrap();
    assert_eq!(db.record_count().await, 250);
    let stats = db.stats().await;
    assert_eq!(stats.queue.failed, 0);
    assert_eq!(stats.metrics.records_inserted, 250);
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_mutations_apply_in_call_order() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("order.jsonl"), config()).await.unwrap();

    let insert = db.insert(&record(1));
    let update = db.update(&json!({"id": 1}), &json!({"owner": "zed"}));
    let delete = db.delete(&json!({"owner": "user1"}));

    // Awaited in reverse: the update still sees the insert, and the delete
    // runs after the update renamed the owner.
    assert_eq!(delete.await.unwrap(), 0);
    assert_eq!(update.await.unwrap(), 1);
    assert_eq!(insert.await.unwrap(), 1);

    let stored = db.find_one(&json!({"id": 1})).await.unwrap().unwrap();
    assert_eq!(stored["owner"], "zed");
}

#[tokio::test]
async fn test_dropped_future_still_runs() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("detached.jsonl"), config()).await.unwrap();

    drop(db.insert(&record(5)));
    db.wait_for_completion(None).await.unwrap();
    assert_eq!(db.record_count().await, 1);
}

#[tokio::test]
async fn test_close_drains_queue_and_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("close.jsonl");
    {
        let db = Database::open(&path, config()).await.unwrap();
        let pending: Vec<_> = (0..40).map(|i| db.insert(&record(i))).collect();
        db.close().await.unwrap();
        for result in join_all(pending).await {
            result.unwrap();
        }
        assert_eq!(db.stats().await.queue.pending, 0);
    }

    let db = Database::open(&path, config()).await.unwrap();
    assert_eq!(db.record_count().await, 40);
    assert_eq!(db.stats().await.metrics.index_rebuilds, 0);
}
