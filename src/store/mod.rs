//! Log store subsystem
//!
//! Persists batches of request/response logs, assets and prompt observations
//! into SQLite, one transaction per batch.
//!
//! ## Architecture
//!
//! ```text
//! Batch ──> BatchWriter ──> dedup ──> bulk upserts ──> prompt resolver ──> commit
//! SearchIndexEntry[] ──> extract ──> BatchWriter ──> search upsert ──> commit
//! ```

pub mod database;
pub mod dedup;
pub mod extract;
pub mod prompt;
pub mod query;
pub mod records;
pub mod template;
pub mod writer;

pub use database::{LogDb, StoreStats};
pub use dedup::{dedupe, Dedupe};
pub use extract::{request_text, response_text, simple_tokens};
pub use prompt::{needs_new_version, resolve_prompt, CurrentVersion, PromptResolution};
pub use query::{InputRecordRow, PromptVersionRow, SearchRow, StoredPrompt};
pub use records::{
    AssetRecord, Batch, LogRecord, PromptRecord, PromptTemplate, ResponseRecord, SearchIndexEntry,
};
pub use template::{deep_equal, templates_differ, TemplateValue};
pub use writer::{BatchSummary, BatchWriter, LOG_BATCH_OK, SEARCH_INDEX_OK};
