//! Ingestion CLI commands
//!
//! The binary is the composition root: it owns the store client, submits
//! whole batches, and retries them on transient store errors.

use anyhow::Result;
use colored::Colorize;
use llm_log_store::config::Config;
use llm_log_store::error::IngestError;
use llm_log_store::store::{Batch, BatchWriter, LogDb, SearchIndexEntry};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Write one batch file
pub async fn execute(cfg: &Config, input: &Path) -> Result<()> {
    let batch: Batch = super::read_input(input)?;
    if batch.is_empty() {
        println!("{}", "Batch is empty, nothing to write".yellow());
        return Ok(());
    }

    let db = Arc::new(LogDb::connect(&cfg.database).await?);
    let writer = BatchWriter::new(db.clone(), &cfg.ingest);

    let result = {
        let (writer, batch) = (&writer, &batch);
        with_retries(
            cfg.ingest.max_attempts,
            Duration::from_millis(cfg.ingest.retry_backoff_ms),
            move || writer.insert_log_batch(batch),
        )
        .await
    };

    drop(writer);
    close(db).await;

    let message = result?;
    println!("{} {}", "✓".green(), message);
    println!(
        "  requests: {}, responses: {}, assets: {}, prompts: {}",
        batch.requests.len(),
        batch.responses.len(),
        batch.assets.len(),
        batch.prompts.len()
    );
    Ok(())
}

/// Write search-index rows from an entries file
pub async fn index(cfg: &Config, input: &Path) -> Result<()> {
    let entries: Vec<SearchIndexEntry> = super::read_input(input)?;

    let db = Arc::new(LogDb::connect(&cfg.database).await?);
    let writer = BatchWriter::new(db.clone(), &cfg.ingest);

    let result = {
        let (writer, entries) = (&writer, &entries);
        with_retries(
            cfg.ingest.max_attempts,
            Duration::from_millis(cfg.ingest.retry_backoff_ms),
            move || writer.insert_search_index(entries),
        )
        .await
    };

    drop(writer);
    close(db).await;

    let message = result?;
    println!("{} {} ({} entries)", "✓".green(), message, entries.len());
    Ok(())
}

/// Run `op` until it succeeds, fails permanently, or `max_attempts` is used up.
///
/// Only transient errors are retried; the wait grows linearly with the
/// attempt number.
pub async fn with_retries<F, Fut, T>(
    max_attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Transient store error, retrying whole batch"
                );
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn close(db: Arc<LogDb>) {
    match Arc::try_unwrap(db) {
        Ok(db) => db.close().await,
        Err(db) => db.pool().close().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_log_store::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> IngestError {
        IngestError::LogBatch(StoreError::Query(sqlx::Error::PoolTimedOut))
    }

    fn permanent() -> IngestError {
        IngestError::LogBatch(StoreError::Query(sqlx::Error::RowNotFound))
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retries(3, Duration::from_millis(1), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retries(2, Duration::from_millis(1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retries(5, Duration::from_millis(1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(permanent())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
