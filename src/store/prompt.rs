//! Prompt version resolution
//!
//! For each incoming prompt record, find or create the prompt keyed by
//! `(organization, user_defined_id)`, decide whether the template warrants a
//! new major version, and record the input keys and values against the
//! resolved version. Runs on the caller's transaction; any error aborts it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::records::{PromptRecord, PromptTemplate};
use super::template::templates_differ;
use crate::error::{StageExt, StoreError, StoreResult, WriteStage};

/// What processing one prompt record did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResolution {
    /// The record carried no template; nothing was written
    NoTemplate,
    /// The current version was kept
    Reused { version_id: String },
    /// A new version was appended
    Created { version_id: String, major_version: i64 },
}

impl PromptResolution {
    pub fn version_id(&self) -> Option<&str> {
        match self {
            Self::NoTemplate => None,
            Self::Reused { version_id } | Self::Created { version_id, .. } => Some(version_id),
        }
    }
}

/// Highest major version of a prompt
#[derive(Debug, Clone)]
pub struct CurrentVersion {
    pub id: String,
    pub major_version: i64,
    pub template: Value,
    pub created_at: DateTime<Utc>,
}

/// A new version is due when none exists, or when the incoming record is not
/// older than the current version and its template differs structurally.
///
/// An untimed record cannot be ordered against the current version, so it
/// never supersedes one.
pub fn needs_new_version(
    current: Option<&CurrentVersion>,
    template: &Value,
    created_at: Option<DateTime<Utc>>,
) -> bool {
    match current {
        None => true,
        Some(current) => {
            created_at.is_some_and(|created_at| current.created_at <= created_at)
                && templates_differ(&current.template, template)
        }
    }
}

/// Resolve one prompt record inside an open transaction.
#[tracing::instrument(
    name = "resolve_prompt",
    skip_all,
    fields(prompt_id = %record.prompt_id, organization_id = %record.organization_id)
)]
pub async fn resolve_prompt(
    conn: &mut SqliteConnection,
    record: &PromptRecord,
) -> StoreResult<PromptResolution> {
    let Some(template) = &record.template else {
        tracing::debug!("No template to process");
        return Ok(PromptResolution::NoTemplate);
    };

    let stamp = record.created_at.unwrap_or_else(Utc::now);
    let prompt_id = ensure_prompt(conn, record, stamp).await?;
    let current = current_version(conn, &record.organization_id, &prompt_id).await?;

    let resolution = match current {
        Some(current)
            if !needs_new_version(Some(&current), &template.template, record.created_at) =>
        {
            tracing::debug!(version_id = %current.id, "Reusing current prompt version");
            PromptResolution::Reused {
                version_id: current.id,
            }
        }
        current => {
            let major_version = current.map_or(0, |v| v.major_version + 1);
            let version_id =
                insert_version(conn, record, template, &prompt_id, major_version, stamp).await?;

            tracing::info!(major_version, version_id = %version_id, "Created prompt version");
            PromptResolution::Created {
                version_id,
                major_version,
            }
        }
    };

    if let Some(version_id) = resolution.version_id() {
        if !template.inputs.is_empty() {
            record_inputs(conn, record, template, version_id, stamp).await?;
        }
    }

    Ok(resolution)
}

/// Find the prompt row, creating it if absent.
///
/// The insert ignores a conflicting row written by a concurrent batch and the
/// follow-up select picks that row up, so at most one prompt exists per key.
async fn ensure_prompt(
    conn: &mut SqliteConnection,
    record: &PromptRecord,
    stamp: DateTime<Utc>,
) -> StoreResult<String> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM prompt_v2 WHERE organization = ? AND user_defined_id = ?",
    )
    .bind(&record.organization_id)
    .bind(&record.prompt_id)
    .fetch_optional(&mut *conn)
    .await
    .stage(WriteStage::LookupPrompt)?;

    if let Some(id) = existing {
        return Ok(id);
    }

    sqlx::query(
        "INSERT INTO prompt_v2 (id, user_defined_id, organization, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (organization, user_defined_id) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&record.prompt_id)
    .bind(&record.organization_id)
    .bind(stamp)
    .execute(&mut *conn)
    .await
    .stage(WriteStage::CreatePrompt)?;

    sqlx::query_scalar("SELECT id FROM prompt_v2 WHERE organization = ? AND user_defined_id = ?")
        .bind(&record.organization_id)
        .bind(&record.prompt_id)
        .fetch_one(&mut *conn)
        .await
        .stage(WriteStage::CreatePrompt)
}

async fn current_version(
    conn: &mut SqliteConnection,
    organization_id: &str,
    prompt_id: &str,
) -> StoreResult<Option<CurrentVersion>> {
    let row: Option<(String, i64, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, major_version, template, created_at FROM prompt_version
         WHERE organization = ? AND prompt_v2 = ?
         ORDER BY major_version DESC LIMIT 1",
    )
    .bind(organization_id)
    .bind(prompt_id)
    .fetch_optional(&mut *conn)
    .await
    .stage(WriteStage::LookupPromptVersion)?;

    row.map(|(id, major_version, template, created_at)| {
        let template = serde_json::from_str(&template).map_err(|source| StoreError::Decode {
            field: "prompt_version.template",
            source,
        })?;
        Ok(CurrentVersion {
            id,
            major_version,
            template,
            created_at,
        })
    })
    .transpose()
}

/// Append a version. The `(prompt_v2, major_version)` unique index makes a
/// concurrent writer racing for the same number fail instead of duplicating.
async fn insert_version(
    conn: &mut SqliteConnection,
    record: &PromptRecord,
    template: &PromptTemplate,
    prompt_id: &str,
    major_version: i64,
    stamp: DateTime<Utc>,
) -> StoreResult<String> {
    let version_id = Uuid::new_v4().to_string();
    let template_json = serde_json::to_string(&template.template).map_err(|source| {
        StoreError::Encode {
            field: "prompt template",
            source,
        }
    })?;

    sqlx::query(
        "INSERT INTO prompt_version
            (id, prompt_v2, organization, major_version, minor_version, template, model, created_at)
         VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(&version_id)
    .bind(prompt_id)
    .bind(&record.organization_id)
    .bind(major_version)
    .bind(&template_json)
    .bind(&record.model)
    .bind(stamp)
    .execute(&mut *conn)
    .await
    .stage(WriteStage::CreatePromptVersion)?;

    Ok(version_id)
}

/// Union the input keys into the version and append the input record
async fn record_inputs(
    conn: &mut SqliteConnection,
    record: &PromptRecord,
    template: &PromptTemplate,
    version_id: &str,
    stamp: DateTime<Utc>,
) -> StoreResult<()> {
    let mut keys: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO prompt_input_key (key, prompt_version, created_at) ");
    keys.push_values(template.inputs.keys(), |mut b, key| {
        b.push_bind(key)
            .push_bind(version_id)
            .push_bind(stamp);
    });
    keys.push(" ON CONFLICT (key, prompt_version) DO NOTHING");
    keys.build()
        .execute(&mut *conn)
        .await
        .stage(WriteStage::InsertInputKeys)?;

    let inputs = serde_json::to_string(&template.inputs).map_err(|source| StoreError::Encode {
        field: "prompt inputs",
        source,
    })?;

    sqlx::query(
        "INSERT INTO prompt_input_record (id, inputs, source_request, prompt_version, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&inputs)
    .bind(&record.request_id)
    .bind(version_id)
    .bind(stamp)
    .execute(&mut *conn)
    .await
    .stage(WriteStage::InsertInputRecord)?;

    tracing::debug!(
        version_id,
        key_count = template.inputs.len(),
        "Recorded prompt inputs"
    );
    Ok(())
}
