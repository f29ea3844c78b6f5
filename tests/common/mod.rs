#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use llm_log_store::config::{DatabaseConfig, IngestConfig};
use llm_log_store::store::{Batch, BatchWriter, LogDb, PromptRecord, PromptTemplate};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A store on a fresh SQLite file; keep the `TempDir` alive for the test.
pub struct TestStore {
    pub dir: TempDir,
    pub db: Arc<LogDb>,
    pub writer: BatchWriter,
}

pub async fn setup() -> TestStore {
    setup_with_chunk_size(IngestConfig::default().chunk_size).await
}

pub async fn setup_with_chunk_size(chunk_size: usize) -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("store.db").display()),
        busy_timeout_secs: 5,
        ..DatabaseConfig::default()
    };

    let db = Arc::new(LogDb::connect(&config).await.unwrap());
    let ingest = IngestConfig {
        chunk_size,
        ..IngestConfig::default()
    };
    let writer = BatchWriter::new(db.clone(), &ingest);

    TestStore { dir, db, writer }
}

/// Write a batch, retrying the whole batch on transient errors like an
/// upstream worker would.
pub async fn write_with_retry(writer: &BatchWriter, batch: &Batch) -> String {
    for attempt in 1..=50u32 {
        match writer.insert_log_batch(batch).await {
            Ok(message) => return message,
            Err(e) if e.is_transient() => {
                tokio::time::sleep(Duration::from_millis(5 * attempt as u64)).await;
            }
            Err(e) => panic!("batch failed permanently: {}", e),
        }
    }
    panic!("batch still failing after retries");
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn at_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

pub fn prompt_record(
    prompt_id: &str,
    request_id: &str,
    created_at: DateTime<Utc>,
    template: Value,
    inputs: &[(&str, &str)],
) -> PromptRecord {
    PromptRecord {
        prompt_id: prompt_id.to_string(),
        organization_id: "org-1".to_string(),
        request_id: request_id.to_string(),
        template: Some(PromptTemplate {
            template,
            inputs: inputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }),
        model: Some("gpt-4o".to_string()),
        created_at: Some(created_at),
    }
}

pub fn prompts_batch(records: Vec<PromptRecord>) -> Batch {
    Batch {
        prompts: records,
        ..Batch::default()
    }
}
