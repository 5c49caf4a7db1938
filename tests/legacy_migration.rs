//! Legacy Migration Tests
//!
//! - A single-file legacy database is split into data + index on open
//! - Inconsistent legacy offsets still open, via an index rebuild
//! - Migration can write a compressed index
//! - Files that already have an index are never touched

use emberdb::{Database, DatabaseConfig, FieldDef, FindOptions};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const ROWS: &str = "[\"a\",1]\n[\"b\",2]\n[\"a\",3]\n";

fn config() -> DatabaseConfig {
    DatabaseConfig::new(vec![FieldDef::string("name"), FieldDef::number("n")])
        .with_indexes(["name"])
        .with_term_mapping(false)
}

fn legacy(offsets: &str) -> String {
    format!(
        "{}{}\n{}\n",
        ROWS, r#"{"data":{"name":{"a":[[0,2],[]],"b":[[1],[]]}}}"#, offsets
    )
}

// =============================================================================
// Migration on open
// =============================================================================

#[tokio::test]
async fn test_legacy_file_is_split_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.jsonl");
    std::fs::write(&path, legacy("[0,8,16]")).unwrap();

    let db = Database::open(&path, config()).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), ROWS);
    assert!(dir.path().join("old.idx.jsonl").exists());

    assert_eq!(db.record_count().await, 3);
    assert_eq!(db.stats().await.metrics.index_rebuilds, 0);
    let found = db
        .find(&json!({"name": "a"}), FindOptions::default())
        .await
        .unwrap();
    assert_eq!(found, vec![json!({"name": "a", "n": 1}), json!({"name": "a", "n": 3})]);

    db.insert(&json!({"name": "b", "n": 4})).await.unwrap();
    db.close().await.unwrap();

    let reopened = Database::open(&path, config()).await.unwrap();
    assert_eq!(reopened.count(&json!({"name": "b"})).await.unwrap(), 2);
    assert_eq!(reopened.stats().await.metrics.index_rebuilds, 0);
}

#[tokio::test]
async fn test_offsets_mismatch_rebuilds_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.jsonl");
    std::fs::write(&path, legacy("[0,8]")).unwrap();

    let db = Database::open(&path, config()).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), ROWS);
    assert_eq!(db.stats().await.metrics.index_rebuilds, 1);
    assert_eq!(db.count(&json!({"name": "a"})).await.unwrap(), 2);
    assert_eq!(db.count(&json!({"n": {"$gt": 1}})).await.unwrap(), 2);
}

#[tokio::test]
async fn test_compressed_migration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.jsonl");
    std::fs::write(&path, legacy("[0,8,16]")).unwrap();

    let db = Database::open(&path, config().with_compression(true)).await.unwrap();
    let index = std::fs::read(dir.path().join("old.idx.jsonl")).unwrap();
    assert_ne!(index.first(), Some(&b'{'));
    assert_eq!(db.count(&json!({"name": "b"})).await.unwrap(), 1);
    assert_eq!(db.stats().await.metrics.index_rebuilds, 0);
}

#[tokio::test]
async fn test_plain_database_is_not_migrated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.jsonl");
    std::fs::write(&path, ROWS).unwrap();

    let db = Database::open(&path, config()).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), ROWS);
    assert_eq!(db.record_count().await, 3);
    assert_eq!(db.find_one(&json!({"n": 2})).await.unwrap().unwrap()["name"], "b");
}
