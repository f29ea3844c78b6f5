//! Read-side queries over the log store
//!
//! Used by the CLI for inspection and by tests to verify stored state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;

use super::database::LogDb;
use super::extract::simple_tokens;
use super::records::{AssetRecord, LogRecord, ResponseRecord};
use crate::error::{StoreError, StoreResult};

/// Persisted prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrompt {
    pub id: String,
    pub user_defined_id: String,
    pub organization: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted prompt version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersionRow {
    pub id: String,
    pub major_version: i64,
    pub minor_version: i64,
    pub template: Value,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted prompt input record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecordRow {
    pub id: String,
    pub inputs: BTreeMap<String, String>,
    pub source_request: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted search-index row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRow {
    pub request_id: String,
    pub request_body_vector: String,
    pub response_body_vector: String,
}

impl LogDb {
    pub async fn get_request(&self, id: &str, organization_id: &str) -> StoreResult<Option<LogRecord>> {
        let row = sqlx::query(
            "SELECT id, organization_id, auth_hash, body, path, provider, created_at,
                    formatted_prompt_id, api_key_id, proxy_key_id, end_user, model,
                    model_override, prompt_id, prompt_values, properties, request_ip,
                    target_url, threat, user_id, country_code
             FROM request WHERE id = ? AND organization_id = ?",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| -> StoreResult<LogRecord> {
            Ok(LogRecord {
                id: row.try_get("id")?,
                organization_id: row.try_get("organization_id")?,
                path: row.try_get("path")?,
                provider: row.try_get("provider")?,
                created_at: row.try_get("created_at")?,
                auth_hash: row.try_get("auth_hash")?,
                body: json_column(&row, "body")?,
                formatted_prompt_id: row.try_get("formatted_prompt_id")?,
                api_key_id: row.try_get("api_key_id")?,
                proxy_key_id: row.try_get("proxy_key_id")?,
                end_user: row.try_get("end_user")?,
                model: row.try_get("model")?,
                model_override: row.try_get("model_override")?,
                prompt_id: row.try_get("prompt_id")?,
                prompt_values: json_column(&row, "prompt_values")?,
                properties: json_column(&row, "properties")?,
                request_ip: row.try_get("request_ip")?,
                target_url: row.try_get("target_url")?,
                threat: row.try_get("threat")?,
                user_id: row.try_get("user_id")?,
                country_code: row.try_get("country_code")?,
            })
        })
        .transpose()
    }

    pub async fn get_response(
        &self,
        request_id: &str,
        organization_id: &str,
    ) -> StoreResult<Option<ResponseRecord>> {
        let row = sqlx::query(
            "SELECT id, request, organization_id, body, created_at, model, completion_tokens,
                    prompt_tokens, delay_ms, time_to_first_token, feedback, status
             FROM response WHERE request = ? AND organization_id = ?",
        )
        .bind(request_id)
        .bind(organization_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| -> StoreResult<ResponseRecord> {
            Ok(ResponseRecord {
                id: row.try_get("id")?,
                request_id: row.try_get("request")?,
                organization_id: row.try_get("organization_id")?,
                created_at: row.try_get("created_at")?,
                body: json_column(&row, "body")?,
                model: row.try_get("model")?,
                completion_tokens: row.try_get("completion_tokens")?,
                prompt_tokens: row.try_get("prompt_tokens")?,
                delay_ms: row.try_get("delay_ms")?,
                time_to_first_token: row.try_get("time_to_first_token")?,
                feedback: json_column(&row, "feedback")?,
                status: row.try_get("status")?,
            })
        })
        .transpose()
    }

    pub async fn get_asset(&self, id: &str, request_id: &str) -> StoreResult<Option<AssetRecord>> {
        let row: Option<(String, String, String, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT id, request_id, organization_id, created_at FROM asset
             WHERE id = ? AND request_id = ?",
        )
        .bind(id)
        .bind(request_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(id, request_id, organization_id, created_at)| AssetRecord {
            id,
            request_id,
            organization_id,
            created_at,
        }))
    }

    pub async fn find_prompt(
        &self,
        organization_id: &str,
        user_defined_id: &str,
    ) -> StoreResult<Option<StoredPrompt>> {
        let row: Option<(String, String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, user_defined_id, organization, created_at FROM prompt_v2
             WHERE organization = ? AND user_defined_id = ?",
        )
        .bind(organization_id)
        .bind(user_defined_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(id, user_defined_id, organization, created_at)| StoredPrompt {
            id,
            user_defined_id,
            organization,
            created_at,
        }))
    }

    /// Versions of a prompt, oldest major version first
    pub async fn list_prompt_versions(&self, prompt_id: &str) -> StoreResult<Vec<PromptVersionRow>> {
        let rows = sqlx::query(
            "SELECT id, major_version, minor_version, template, model, created_at
             FROM prompt_version WHERE prompt_v2 = ?
             ORDER BY major_version ASC, minor_version ASC",
        )
        .bind(prompt_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<PromptVersionRow> {
                let template: String = row.try_get("template")?;
                Ok(PromptVersionRow {
                    id: row.try_get("id")?,
                    major_version: row.try_get("major_version")?,
                    minor_version: row.try_get("minor_version")?,
                    template: decode(&template, "prompt_version.template")?,
                    model: row.try_get("model")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Input slot names recorded for a version, sorted
    pub async fn list_input_keys(&self, version_id: &str) -> StoreResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM prompt_input_key WHERE prompt_version = ? ORDER BY key ASC",
        )
        .bind(version_id)
        .fetch_all(self.pool())
        .await?;
        Ok(keys)
    }

    /// Input records of a version in insertion order
    pub async fn list_input_records(&self, version_id: &str) -> StoreResult<Vec<InputRecordRow>> {
        let rows = sqlx::query(
            "SELECT id, inputs, source_request, created_at FROM prompt_input_record
             WHERE prompt_version = ? ORDER BY rowid ASC",
        )
        .bind(version_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<InputRecordRow> {
                let inputs: String = row.try_get("inputs")?;
                Ok(InputRecordRow {
                    id: row.try_get("id")?,
                    inputs: decode(&inputs, "prompt_input_record.inputs")?,
                    source_request: row.try_get("source_request")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn get_search_row(&self, request_id: &str) -> StoreResult<Option<SearchRow>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT request_id, request_body_vector, response_body_vector
             FROM request_response_search WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(request_id, request_body_vector, response_body_vector)| SearchRow {
            request_id,
            request_body_vector,
            response_body_vector,
        }))
    }

    /// Request ids whose request or response text contains every token of
    /// `term`. Exact token match, no ranking.
    pub async fn search_requests(&self, term: &str, limit: usize) -> StoreResult<Vec<String>> {
        let tokens = simple_tokens(term);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT request_id FROM request_response_search WHERE 1=1");
        for token in tokens.split(' ') {
            let pattern = format!("% {} %", token);
            builder
                .push(" AND ((' ' || request_body_vector || ' ') LIKE ")
                .push_bind(pattern.clone())
                .push(" OR (' ' || response_body_vector || ' ') LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        builder
            .push(" ORDER BY request_id ASC LIMIT ")
            .push_bind(limit as i64);

        let ids: Vec<String> = builder
            .build_query_scalar()
            .fetch_all(self.pool())
            .await?;
        Ok(ids)
    }
}

fn json_column(row: &SqliteRow, column: &'static str) -> StoreResult<Option<Value>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| decode(&raw, column)).transpose()
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str, field: &'static str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|source| StoreError::Decode { field, source })
}
