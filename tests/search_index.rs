//! Integration tests for the request/response search index
mod common;

use common::setup;
use llm_log_store::error::IngestError;
use llm_log_store::store::{Batch, LogRecord, SearchIndexEntry};
use serde_json::{json, Value};

fn chat(request_id: &str, user: &str, assistant: &str) -> SearchIndexEntry {
    SearchIndexEntry {
        request_id: request_id.to_string(),
        request_body: json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": user}
            ]
        }),
        response_body: json!({
            "choices": [{"message": {"role": "assistant", "content": assistant}}]
        }),
    }
}

#[tokio::test]
async fn test_index_stores_tokens_and_is_searchable() {
    let store = setup().await;
    let message = store
        .writer
        .insert_search_index(&[chat("r1", "Hello, World!", "Rust is great.")])
        .await
        .unwrap();
    assert_eq!(message, "Successfully inserted request response search");

    let row = store.db.get_search_row("r1").await.unwrap().unwrap();
    assert_eq!(row.request_body_vector, "hello world");
    assert_eq!(row.response_body_vector, "rust is great");

    assert_eq!(store.db.search_requests("HELLO", 10).await.unwrap(), vec!["r1"]);
    assert_eq!(store.db.search_requests("great", 10).await.unwrap(), vec!["r1"]);
    // System messages are not indexed
    assert!(store.db.search_requests("terse", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reindex_replaces_row() {
    let store = setup().await;
    store
        .writer
        .insert_search_index(&[chat("r1", "first question", "first answer")])
        .await
        .unwrap();
    store
        .writer
        .insert_search_index(&[chat("r1", "second question", "second answer")])
        .await
        .unwrap();

    let row = store.db.get_search_row("r1").await.unwrap().unwrap();
    assert_eq!(row.request_body_vector, "second question");
    assert_eq!(row.response_body_vector, "second answer");
    assert!(store.db.search_requests("first", 10).await.unwrap().is_empty());
    assert_eq!(store.db.get_stats().await.unwrap().search_rows, 1);
}

#[tokio::test]
async fn test_malformed_payloads_index_empty_text() {
    let store = setup().await;
    let entries = vec![
        SearchIndexEntry {
            request_id: "r1".to_string(),
            request_body: json!({"prompt": "legacy completion"}),
            response_body: json!({"choices": ["not a message"]}),
        },
        SearchIndexEntry {
            request_id: "r2".to_string(),
            request_body: Value::Null,
            response_body: json!("not json at all"),
        },
    ];

    store.writer.insert_search_index(&entries).await.unwrap();

    for id in ["r1", "r2"] {
        let row = store.db.get_search_row(id).await.unwrap().unwrap();
        assert_eq!(row.request_body_vector, "");
        assert_eq!(row.response_body_vector, "");
    }
}

#[tokio::test]
async fn test_raw_string_bodies_are_parsed() {
    let store = setup().await;
    let entry = SearchIndexEntry {
        request_id: "r1".to_string(),
        request_body: json!(r#"{"messages":[{"role":"user","content":[{"type":"text","text":"Describe this image"},{"type":"image_url","image_url":{"url":"https://example.com/a.png"}}]}]}"#),
        response_body: json!(r#"{"choices":[{"message":{"role":"assistant","content":"A cat"}}]}"#),
    };

    store.writer.insert_search_index(&[entry]).await.unwrap();

    let row = store.db.get_search_row("r1").await.unwrap().unwrap();
    assert_eq!(row.request_body_vector, "describe this image");
    assert_eq!(row.response_body_vector, "a cat");
}

#[tokio::test]
async fn test_search_failure_leaves_batch_committed() {
    let store = setup().await;
    let batch = Batch {
        requests: vec![LogRecord::new("r1", "org-1", "/v1/chat/completions", "OPENAI")],
        ..Batch::default()
    };
    store.writer.insert_log_batch(&batch).await.unwrap();

    sqlx::query("DROP TABLE request_response_search")
        .execute(store.db.pool())
        .await
        .unwrap();

    let err = store
        .writer
        .insert_search_index(&[chat("r1", "hello", "hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::SearchIndex(_)));
    assert!(err.to_string().starts_with("Failed to insert request response search"));

    assert!(store.db.get_request("r1", "org-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_empty_entries_succeed() {
    let store = setup().await;
    let message = store.writer.insert_search_index(&[]).await.unwrap();
    assert_eq!(message, "Successfully inserted request response search");
    assert_eq!(store.db.get_stats().await.unwrap().search_rows, 0);
}

#[tokio::test]
async fn test_search_requires_every_token() {
    let store = setup().await;
    store
        .writer
        .insert_search_index(&[
            chat("r1", "deploy the rust service", "done"),
            chat("r2", "deploy the python service", "done"),
            chat("r3", "rustacean meetup", "see you there"),
        ])
        .await
        .unwrap();

    assert_eq!(
        store.db.search_requests("deploy service", 10).await.unwrap(),
        vec!["r1", "r2"]
    );
    // Whole-token match only
    assert_eq!(store.db.search_requests("rust", 10).await.unwrap(), vec!["r1"]);
    assert_eq!(store.db.search_requests("rust deploy", 10).await.unwrap(), vec!["r1"]);
    assert_eq!(store.db.search_requests("done", 1).await.unwrap(), vec!["r1"]);
    assert!(store.db.search_requests("   ", 10).await.unwrap().is_empty());
}
