use std::fmt;
use thiserror::Error;

/// Step of a write transaction, carried in errors so a failed batch names
/// the statement that aborted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Begin,
    UpsertRequests,
    UpsertResponses,
    InsertAssets,
    LookupPrompt,
    CreatePrompt,
    LookupPromptVersion,
    CreatePromptVersion,
    InsertInputKeys,
    InsertInputRecord,
    UpsertSearchIndex,
    Commit,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin transaction",
            Self::UpsertRequests => "upsert requests",
            Self::UpsertResponses => "upsert responses",
            Self::InsertAssets => "insert assets",
            Self::LookupPrompt => "look up prompt",
            Self::CreatePrompt => "create prompt",
            Self::LookupPromptVersion => "look up prompt version",
            Self::CreatePromptVersion => "create prompt version",
            Self::InsertInputKeys => "insert prompt input keys",
            Self::InsertInputRecord => "insert prompt input record",
            Self::UpsertSearchIndex => "upsert request response search",
            Self::Commit => "commit transaction",
        };
        f.write_str(name)
    }
}

/// Store-level errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{stage} failed: {source}")]
    Write {
        stage: WriteStage,
        #[source]
        source: sqlx::Error,
    },

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("failed to encode {field} as JSON: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored {field} is not valid JSON: {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Whether retrying the whole transaction may succeed.
    ///
    /// Covers benign races (unique violations from a concurrent writer),
    /// SQLite busy/locked contention and connection-level hiccups.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(e) | Self::Query(e) => is_transient_sqlx(e),
            Self::Write { source, .. } => is_transient_sqlx(source),
            Self::Migrate(_) | Self::Encode { .. } | Self::Decode { .. } => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                return true;
            }
            db.code().as_deref().is_some_and(is_busy_or_locked)
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        _ => false,
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes
fn is_busy_or_locked(code: &str) -> bool {
    matches!(code, "5" | "6" | "261" | "262" | "517" | "773")
}

/// Failure of one ingestion entry point. Nothing from the failed call was
/// committed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to insert log batch: {0}")]
    LogBatch(#[source] StoreError),

    #[error("Failed to insert request response search: {0}")]
    SearchIndex(#[source] StoreError),
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LogBatch(e) | Self::SearchIndex(e) => e.is_transient(),
        }
    }

    /// The underlying store error.
    pub fn cause(&self) -> &StoreError {
        match self {
            Self::LogBatch(e) | Self::SearchIndex(e) => e,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Attach a [`WriteStage`] to a sqlx result, like `anyhow::Context` for
/// the transactional write path.
pub trait StageExt<T> {
    fn stage(self, stage: WriteStage) -> StoreResult<T>;
}

impl<T> StageExt<T> for Result<T, sqlx::Error> {
    fn stage(self, stage: WriteStage) -> StoreResult<T> {
        self.map_err(|source| StoreError::Write { stage, source })
    }
}
