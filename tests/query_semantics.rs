//! Query Semantics Tests
//!
//! - Strict mode rejects unindexed fields before any read
//! - Permissive mode falls back to streaming
//! - `exists` agrees with `find(.., limit 1)`
//! - Operators behave the same on indexed and streaming fields

use emberdb::planner::PlannerErrorCode;
use emberdb::{Database, DatabaseConfig, DbError, ExistsOptions, FieldDef, FieldType, FindOptions, IndexedQueryMode};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn fields() -> Vec<FieldDef> {
    vec![
        FieldDef::string("name"),
        FieldDef::number("age"),
        FieldDef::string("title"),
        FieldDef::new("tags", FieldType::StringArray),
    ]
}

fn staff() -> Vec<Value> {
    vec![
        json!({"name": "Ann", "age": 31, "title": "engineer", "tags": ["rust", "db"]}),
        json!({"name": "bob", "age": 45, "title": "manager", "tags": ["people"]}),
        json!({"name": "Cy", "age": 28, "title": "engineer", "tags": ["go", "db"]}),
        json!({"name": "dee", "age": 52, "title": "director"}),
        json!({"name": "eve", "age": 28, "title": "analyst", "tags": ["sql", "db", "rust"]}),
    ]
}

async fn open_with(dir: &TempDir, file: &str, config: DatabaseConfig) -> Database {
    let db = Database::open(dir.path().join(file), config).await.unwrap();
    db.insert_many(&staff()).await.unwrap();
    db
}

async fn names(db: &Database, criteria: Value) -> Vec<String> {
    db.find(&criteria, FindOptions::default())
        .await
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// Indexed query mode
// =============================================================================

#[tokio::test]
async fn test_strict_mode_names_offending_field() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new(fields())
        .with_indexes(["name", "age"])
        .with_mode(IndexedQueryMode::Strict);
    let db = open_with(&dir, "strict.jsonl", config).await;

    let err = db
        .find(&json!({"title": "x"}), FindOptions::default())
        .await
        .unwrap_err();
    let DbError::Planner(planner) = &err else {
        panic!("expected planner error, got {}", err);
    };
    assert_eq!(planner.code(), PlannerErrorCode::EmberQueryUnindexedField);
    assert_eq!(planner.fields(), ["title".to_string()]);
    assert!(planner.message().contains("'title'"));
    assert!(planner.message().contains("name, age"));

    // Nested references are caught too
    let nested = db
        .count(&json!({"$or": [{"name": "Ann"}, {"$not": {"title": "x"}}]}))
        .await;
    assert!(matches!(nested, Err(DbError::Planner(_))));

    // Mutations are rejected before they are queued
    assert!(db.delete(&json!({"title": "x"})).await.is_err());
    assert_eq!(db.record_count().await, 5);

    assert_eq!(names(&db, json!({"name": "Ann", "age": 31})).await, vec!["Ann"]);
}

#[tokio::test]
async fn test_permissive_mode_streams_unindexed_fields() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new(fields()).with_indexes(["name", "age"]);
    let db = open_with(&dir, "permissive.jsonl", config).await;

    assert!(names(&db, json!({"title": "x"})).await.is_empty());
    assert_eq!(names(&db, json!({"title": "engineer"})).await, vec!["Ann", "Cy"]);
    assert_eq!(
        names(&db, json!({"title": "engineer", "age": {"$lt": 30}})).await,
        vec!["Cy"]
    );
    assert!(db.stats().await.metrics.streaming_queries >= 2);
}

// =============================================================================
// Exists / find equivalence
// =============================================================================

#[tokio::test]
async fn test_exists_agrees_with_find() {
    let dir = TempDir::new().unwrap();
    let indexed = open_with(
        &dir,
        "indexed.jsonl",
        DatabaseConfig::new(fields()).with_indexes(["name", "tags", "age"]),
    )
    .await;
    let streaming = open_with(&dir, "streaming.jsonl", DatabaseConfig::new(fields())).await;

    let plain = ExistsOptions::default();
    let all = ExistsOptions {
        all: true,
        ..ExistsOptions::default()
    };
    let excluding_go = ExistsOptions {
        excludes: vec![json!("go")],
        ..ExistsOptions::default()
    };
    let all_excluding_sql = ExistsOptions {
        all: true,
        excludes: vec![json!("sql")],
        ..ExistsOptions::default()
    };
    let ci = ExistsOptions {
        case_insensitive: true,
        ..ExistsOptions::default()
    };

    let cases: Vec<(&str, Value, &ExistsOptions, Value)> = vec![
        ("tags", json!("db"), &plain, json!({"tags": "db"})),
        ("tags", json!("java"), &plain, json!({"tags": "java"})),
        ("tags", json!(["rust", "db"]), &all, json!({"tags": {"$all": ["rust", "db"]}})),
        ("tags", json!(["go", "sql"]), &all, json!({"tags": {"$all": ["go", "sql"]}})),
        ("tags", json!(["go", "people"]), &plain, json!({"tags": {"$in": ["go", "people"]}})),
        (
            "tags",
            json!("db"),
            &excluding_go,
            json!({"tags": "db", "$not": {"tags": "go"}}),
        ),
        (
            "tags",
            json!(["rust", "db"]),
            &all_excluding_sql,
            json!({"tags": {"$all": ["rust", "db"]}, "$not": {"tags": "sql"}}),
        ),
        ("name", json!("ann"), &ci, json!({"name": {"$regex": "^ann$", "$options": "i"}})),
        ("name", json!("ann"), &plain, json!({"name": "ann"})),
        ("age", json!(28), &plain, json!({"age": 28})),
        ("age", json!(29), &plain, json!({"age": 29})),
    ];

    for db in [&indexed, &streaming] {
        for (field, value, options, criteria) in &cases {
            let exists = db.exists(field, value, options).await.unwrap();
            let found = !db.find(criteria, FindOptions::limit(1)).await.unwrap().is_empty();
            assert_eq!(
                exists, found,
                "exists({}, {}, {:?}) disagrees with find({})",
                field, value, options, criteria
            );
        }
    }
}

// =============================================================================
// Operators
// =============================================================================

#[tokio::test]
async fn test_operators_match_on_indexed_and_streaming_fields() {
    let dir = TempDir::new().unwrap();
    let indexed = open_with(
        &dir,
        "indexed.jsonl",
        DatabaseConfig::new(fields()).with_indexes(["name", "age", "title", "tags"]),
    )
    .await;
    let streaming = open_with(&dir, "streaming.jsonl", DatabaseConfig::new(fields())).await;

    let cases: Vec<(Value, Vec<&str>)> = vec![
        (json!({"age": {"$gte": 31}}), vec!["Ann", "bob", "dee"]),
        (json!({"age": {"<": 30}}), vec!["Cy", "eve"]),
        (json!({"age": {"$gt": 28, "$lt": 50}}), vec!["Ann", "bob"]),
        (json!({"title": {"$in": ["manager", "director"]}}), vec!["bob", "dee"]),
        (json!({"title": {"$nin": ["engineer"]}}), vec!["bob", "dee", "eve"]),
        (json!({"title": {"$ne": "engineer"}}), vec!["bob", "dee", "eve"]),
        (json!({"name": {"$regex": "^[A-Z]"}}), vec!["Ann", "Cy"]),
        (json!({"tags": "rust"}), vec!["Ann", "eve"]),
        (json!({"tags": {"$all": ["db", "rust"]}}), vec!["Ann", "eve"]),
        (json!({"tags": {"$all": []}}), vec![]),
        (json!({"$or": [{"name": "bob"}, {"age": 52}]}), vec!["bob", "dee"]),
        (json!({"$and": [{"title": "engineer"}, {"tags": "go"}]}), vec!["Cy"]),
        (json!({"$not": {"title": "engineer"}}), vec!["bob", "dee", "eve"]),
        (json!({"$not": {}}), vec!["Ann", "bob", "Cy", "dee", "eve"]),
        (json!({"tags": {"$exists": false}}), vec!["dee"]),
        (json!({"title": {"contains": "ana"}}), vec!["bob", "eve"]),
        (json!({"age": 28.0}), vec!["Cy", "eve"]),
    ];

    for (criteria, expected) in &cases {
        assert_eq!(&names(&indexed, criteria.clone()).await, expected, "indexed {}", criteria);
        assert_eq!(&names(&streaming, criteria.clone()).await, expected, "streaming {}", criteria);
    }
}

#[tokio::test]
async fn test_skip_and_limit() {
    let dir = TempDir::new().unwrap();
    let db = open_with(
        &dir,
        "paging.jsonl",
        DatabaseConfig::new(fields()).with_indexes(["tags"]),
    )
    .await;

    let page = db
        .find(&json!({"tags": "db"}), FindOptions::limit(1).with_skip(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["name"], "Cy");

    assert!(db
        .find(&Value::Null, FindOptions::limit(0))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        db.find(&Value::Null, FindOptions::default().with_skip(3))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_invalid_criteria_rejected() {
    let dir = TempDir::new().unwrap();
    let db = open_with(&dir, "invalid.jsonl", DatabaseConfig::new(fields())).await;
    assert!(db.find(&json!({"age": {"$near": 3}}), FindOptions::default()).await.is_err());
    assert!(db.find(&json!("age"), FindOptions::default()).await.is_err());
    assert!(db.find(&json!({"name": {"$regex": "("}}), FindOptions::default()).await.is_err());
}
