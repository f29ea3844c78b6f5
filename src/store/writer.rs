//! Transactional batch writer
//!
//! Each entry point opens one transaction, runs every step on it, and commits
//! only when all steps succeeded:
//!
//! ```text
//! insert_log_batch:    dedupe -> upsert requests -> upsert responses
//!                      -> insert assets -> resolve prompts (by created_at)
//! insert_search_index: extract text -> upsert search rows
//! ```
//!
//! A failed step rolls the whole transaction back; callers retry whole
//! batches, the writer itself never retries.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, Transaction};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::database::LogDb;
use super::dedup::dedupe;
use super::extract::{request_text, response_text, simple_tokens};
use super::prompt::{resolve_prompt, PromptResolution};
use super::records::{AssetRecord, Batch, LogRecord, PromptRecord, ResponseRecord, SearchIndexEntry};
use crate::config::{IngestConfig, MAX_CHUNK_SIZE};
use crate::error::{IngestError, StageExt, StoreError, StoreResult, WriteStage};

pub const LOG_BATCH_OK: &str = "Successfully inserted log batch";
pub const SEARCH_INDEX_OK: &str = "Successfully inserted request response search";

/// Rows written by one committed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub requests: usize,
    pub responses: usize,
    pub assets: usize,
    pub prompts_created: usize,
    pub prompts_reused: usize,
    pub prompts_skipped: usize,
}

/// Batch writer handle
///
/// Cheap to clone; concurrent batches share the store's connection pool and
/// rely on its transactions and unique indexes for conflict safety.
#[derive(Clone)]
pub struct BatchWriter {
    db: Arc<LogDb>,
    chunk_size: usize,
}

impl BatchWriter {
    pub fn new(db: Arc<LogDb>, config: &IngestConfig) -> Self {
        Self {
            db,
            chunk_size: bounded_chunk_size(config.chunk_size),
        }
    }

    /// Write a batch all-or-nothing.
    pub async fn insert_log_batch(&self, batch: &Batch) -> Result<String, IngestError> {
        self.write_log_batch(batch)
            .await
            .map(|_| LOG_BATCH_OK.to_string())
            .map_err(IngestError::LogBatch)
    }

    /// Same as [`insert_log_batch`](Self::insert_log_batch), returning per-table counts.
    #[tracing::instrument(
        name = "insert_log_batch",
        skip_all,
        fields(
            requests = batch.requests.len(),
            responses = batch.responses.len(),
            assets = batch.assets.len(),
            prompts = batch.prompts.len()
        )
    )]
    pub async fn write_log_batch(&self, batch: &Batch) -> StoreResult<BatchSummary> {
        let start = Instant::now();
        let mut tx = self.begin().await?;

        match self.write_batch_steps(&mut tx, batch).await {
            Ok(summary) => {
                tx.commit().await.stage(WriteStage::Commit)?;
                tracing::info!(
                    requests = summary.requests,
                    responses = summary.responses,
                    assets = summary.assets,
                    prompts_created = summary.prompts_created,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Committed log batch"
                );
                Ok(summary)
            }
            Err(e) => {
                rollback(tx, &e).await;
                Err(e)
            }
        }
    }

    async fn write_batch_steps(
        &self,
        conn: &mut SqliteConnection,
        batch: &Batch,
    ) -> StoreResult<BatchSummary> {
        let mut summary = BatchSummary::default();

        if !batch.requests.is_empty() {
            let requests = dedupe(&batch.requests);
            summary.requests = self.upsert_requests(conn, &requests).await?;
        }

        if !batch.responses.is_empty() {
            let responses = dedupe(&batch.responses);
            summary.responses = self.upsert_responses(conn, &responses).await?;
        }

        if !batch.assets.is_empty() {
            summary.assets = self.insert_assets(conn, &batch.assets).await?;
        }

        for record in prompt_order(&batch.prompts) {
            match resolve_prompt(conn, record).await? {
                PromptResolution::NoTemplate => summary.prompts_skipped += 1,
                PromptResolution::Reused { .. } => summary.prompts_reused += 1,
                PromptResolution::Created { .. } => summary.prompts_created += 1,
            }
        }

        Ok(summary)
    }

    /// Upsert requests; on `(id, organization_id)` conflict every other column
    /// takes the incoming value.
    async fn upsert_requests(
        &self,
        conn: &mut SqliteConnection,
        rows: &[&LogRecord],
    ) -> StoreResult<usize> {
        let encoded = rows
            .iter()
            .map(|row| -> StoreResult<_> {
                Ok((
                    *row,
                    encode_json(&row.body, "request.body")?,
                    encode_json(&row.prompt_values, "request.prompt_values")?,
                    encode_json(&row.properties, "request.properties")?,
                ))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        for chunk in encoded.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO request (id, organization_id, auth_hash, body, path, provider, \
                 created_at, formatted_prompt_id, api_key_id, proxy_key_id, end_user, model, \
                 model_override, prompt_id, prompt_values, properties, request_ip, target_url, \
                 threat, user_id, country_code) ",
            );
            builder.push_values(chunk, |mut b, (row, body, prompt_values, properties)| {
                b.push_bind(&row.id)
                    .push_bind(&row.organization_id)
                    .push_bind(&row.auth_hash)
                    .push_bind(body)
                    .push_bind(&row.path)
                    .push_bind(&row.provider)
                    .push_bind(row.created_at)
                    .push_bind(&row.formatted_prompt_id)
                    .push_bind(row.api_key_id)
                    .push_bind(&row.proxy_key_id)
                    .push_bind(&row.end_user)
                    .push_bind(&row.model)
                    .push_bind(&row.model_override)
                    .push_bind(&row.prompt_id)
                    .push_bind(prompt_values)
                    .push_bind(properties)
                    .push_bind(&row.request_ip)
                    .push_bind(&row.target_url)
                    .push_bind(row.threat)
                    .push_bind(&row.user_id)
                    .push_bind(&row.country_code);
            });
            builder.push(
                " ON CONFLICT (id, organization_id) DO UPDATE SET \
                 auth_hash = excluded.auth_hash, body = excluded.body, path = excluded.path, \
                 provider = excluded.provider, created_at = excluded.created_at, \
                 formatted_prompt_id = excluded.formatted_prompt_id, \
                 api_key_id = excluded.api_key_id, proxy_key_id = excluded.proxy_key_id, \
                 end_user = excluded.end_user, model = excluded.model, \
                 model_override = excluded.model_override, prompt_id = excluded.prompt_id, \
                 prompt_values = excluded.prompt_values, properties = excluded.properties, \
                 request_ip = excluded.request_ip, target_url = excluded.target_url, \
                 threat = excluded.threat, user_id = excluded.user_id, \
                 country_code = excluded.country_code",
            );
            builder
                .build()
                .execute(&mut *conn)
                .await
                .stage(WriteStage::UpsertRequests)?;
        }

        tracing::debug!(count = rows.len(), "Upserted requests");
        Ok(rows.len())
    }

    /// Upsert responses keyed by `(request, organization_id)`; an existing row
    /// keeps its surrogate id.
    async fn upsert_responses(
        &self,
        conn: &mut SqliteConnection,
        rows: &[&ResponseRecord],
    ) -> StoreResult<usize> {
        let encoded = rows
            .iter()
            .map(|row| -> StoreResult<_> {
                Ok((
                    *row,
                    row.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                    encode_json(&row.body, "response.body")?,
                    encode_json(&row.feedback, "response.feedback")?,
                ))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        for chunk in encoded.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO response (id, request, organization_id, body, created_at, model, \
                 completion_tokens, prompt_tokens, delay_ms, time_to_first_token, feedback, \
                 status) ",
            );
            builder.push_values(chunk, |mut b, (row, id, body, feedback)| {
                b.push_bind(id)
                    .push_bind(&row.request_id)
                    .push_bind(&row.organization_id)
                    .push_bind(body)
                    .push_bind(row.created_at)
                    .push_bind(&row.model)
                    .push_bind(row.completion_tokens)
                    .push_bind(row.prompt_tokens)
                    .push_bind(row.delay_ms)
                    .push_bind(row.time_to_first_token)
                    .push_bind(feedback)
                    .push_bind(row.status);
            });
            builder.push(
                " ON CONFLICT (request, organization_id) DO UPDATE SET \
                 body = excluded.body, created_at = excluded.created_at, \
                 model = excluded.model, completion_tokens = excluded.completion_tokens, \
                 prompt_tokens = excluded.prompt_tokens, delay_ms = excluded.delay_ms, \
                 time_to_first_token = excluded.time_to_first_token, \
                 feedback = excluded.feedback, status = excluded.status",
            );
            builder
                .build()
                .execute(&mut *conn)
                .await
                .stage(WriteStage::UpsertResponses)?;
        }

        tracing::debug!(count = rows.len(), "Upserted responses");
        Ok(rows.len())
    }

    /// Insert assets; an existing `(id, request_id)` row is left untouched.
    async fn insert_assets(
        &self,
        conn: &mut SqliteConnection,
        rows: &[AssetRecord],
    ) -> StoreResult<usize> {
        for chunk in rows.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO asset (id, request_id, organization_id, created_at) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(&row.id)
                    .push_bind(&row.request_id)
                    .push_bind(&row.organization_id)
                    .push_bind(row.created_at);
            });
            builder.push(" ON CONFLICT (id, request_id) DO NOTHING");
            builder
                .build()
                .execute(&mut *conn)
                .await
                .stage(WriteStage::InsertAssets)?;
        }

        tracing::debug!(count = rows.len(), "Inserted assets");
        Ok(rows.len())
    }

    /// Build and upsert search rows in a transaction of their own.
    ///
    /// Independent of [`insert_log_batch`](Self::insert_log_batch): a failure
    /// here leaves already committed request/response rows in place.
    #[tracing::instrument(name = "insert_search_index", skip_all, fields(entries = entries.len()))]
    pub async fn insert_search_index(
        &self,
        entries: &[SearchIndexEntry],
    ) -> Result<String, IngestError> {
        self.write_search_index(entries)
            .await
            .map(|_| SEARCH_INDEX_OK.to_string())
            .map_err(IngestError::SearchIndex)
    }

    async fn write_search_index(&self, entries: &[SearchIndexEntry]) -> StoreResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let rows: Vec<(&str, String, String)> = entries
            .iter()
            .map(|entry| {
                (
                    entry.request_id.as_str(),
                    simple_tokens(&request_text(&entry.request_body)),
                    simple_tokens(&response_text(&entry.response_body)),
                )
            })
            .collect();

        let mut tx = self.begin().await?;
        match self.upsert_search_rows(&mut tx, &rows).await {
            Ok(()) => {
                tx.commit().await.stage(WriteStage::Commit)?;
                tracing::debug!(count = rows.len(), "Upserted request response search rows");
                Ok(rows.len())
            }
            Err(e) => {
                rollback(tx, &e).await;
                Err(e)
            }
        }
    }

    async fn upsert_search_rows(
        &self,
        conn: &mut SqliteConnection,
        rows: &[(&str, String, String)],
    ) -> StoreResult<()> {
        for chunk in rows.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO request_response_search \
                 (request_id, request_body_vector, response_body_vector) ",
            );
            builder.push_values(chunk, |mut b, (request_id, request_vector, response_vector)| {
                b.push_bind(*request_id)
                    .push_bind(request_vector)
                    .push_bind(response_vector);
            });
            builder.push(
                " ON CONFLICT (request_id) DO UPDATE SET \
                 request_body_vector = excluded.request_body_vector, \
                 response_body_vector = excluded.response_body_vector",
            );
            builder
                .build()
                .execute(&mut *conn)
                .await
                .stage(WriteStage::UpsertSearchIndex)?;
        }
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        self.db.pool().begin().await.stage(WriteStage::Begin)
    }
}

/// Rows per multi-row statement, kept under SQLite's bind-parameter limit
/// even when the config was never validated.
fn bounded_chunk_size(requested: usize) -> usize {
    requested.clamp(1, MAX_CHUNK_SIZE)
}

/// Prompt records in ascending `created_at` order.
///
/// Timed records are stably sorted among the positions they occupy; untimed
/// records stay where they are in the batch.
fn prompt_order(records: &[PromptRecord]) -> Vec<&PromptRecord> {
    let mut timed: Vec<&PromptRecord> = records.iter().filter(|r| r.created_at.is_some()).collect();
    timed.sort_by_key(|record| record.created_at);

    let mut timed = timed.into_iter();
    records
        .iter()
        .filter_map(|record| match record.created_at {
            Some(_) => timed.next(),
            None => Some(record),
        })
        .collect()
}

async fn rollback(tx: Transaction<'static, Sqlite>, cause: &StoreError) {
    tracing::warn!(error = %cause, "Rolling back transaction");
    if let Err(e) = tx.rollback().await {
        // Dropping the connection still discards the uncommitted writes
        tracing::error!(error = %e, "Failed to roll back transaction");
    }
}

fn encode_json(
    value: &Option<serde_json::Value>,
    field: &'static str,
) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| StoreError::Encode { field, source })
}
