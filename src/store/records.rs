//! Record shapes delivered by the upstream logging pipeline
//!
//! Request and response rows arrive with optional natural-key fields so the
//! deduplicator can drop rows that lack them; everything else mirrors the
//! columns of the `request`, `response` and `asset` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One logged API request. Natural key: `(id, organization_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub organization_id: String,
    pub path: String,
    pub provider: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auth_hash: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub formatted_prompt_id: Option<String>,
    #[serde(default)]
    pub api_key_id: Option<i64>,
    #[serde(default)]
    pub proxy_key_id: Option<String>,
    #[serde(default, rename = "user")]
    pub end_user: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub prompt_values: Option<Value>,
    #[serde(default)]
    pub properties: Option<Value>,
    #[serde(default)]
    pub request_ip: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub threat: Option<bool>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

impl LogRecord {
    pub fn new(id: &str, organization_id: &str, path: &str, provider: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            organization_id: organization_id.to_string(),
            path: path.to_string(),
            provider: provider.to_string(),
            created_at: None,
            auth_hash: None,
            body: None,
            formatted_prompt_id: None,
            api_key_id: None,
            proxy_key_id: None,
            end_user: None,
            model: None,
            model_override: None,
            prompt_id: None,
            prompt_values: None,
            properties: None,
            request_ip: None,
            target_url: None,
            threat: None,
            user_id: None,
            country_code: None,
        }
    }
}

/// The response paired with a request. Natural key: `(request_id, organization_id)`.
///
/// `id` is a surrogate; when absent a fresh one is generated at insert time
/// and an existing row keeps its own on conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    pub organization_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub completion_tokens: Option<i64>,
    #[serde(default)]
    pub prompt_tokens: Option<i64>,
    #[serde(default)]
    pub delay_ms: Option<i64>,
    #[serde(default)]
    pub time_to_first_token: Option<i64>,
    #[serde(default)]
    pub feedback: Option<Value>,
    #[serde(default)]
    pub status: Option<i64>,
}

impl ResponseRecord {
    pub fn new(request_id: &str, organization_id: &str) -> Self {
        Self {
            id: None,
            request_id: Some(request_id.to_string()),
            organization_id: organization_id.to_string(),
            created_at: None,
            body: None,
            model: None,
            completion_tokens: None,
            prompt_tokens: None,
            delay_ms: None,
            time_to_first_token: None,
            feedback: None,
            status: None,
        }
    }
}

/// Append-only asset reference. Natural key: `(id, request_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    pub request_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Template snapshot plus the concrete values bound to its named inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub template: Value,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

/// Incoming prompt observation; drives version resolution, never stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    /// User-defined prompt identifier
    pub prompt_id: String,
    pub organization_id: String,
    pub request_id: String,
    #[serde(default)]
    pub template: Option<PromptTemplate>,
    #[serde(default)]
    pub model: Option<String>,
    /// Untimed records keep their batch position and are stamped at write time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A bounded group of records written in one transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub requests: Vec<LogRecord>,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    #[serde(default)]
    pub prompts: Vec<PromptRecord>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.responses.is_empty()
            && self.assets.is_empty()
            && self.prompts.is_empty()
    }
}

/// Raw request/response bodies for one search-index row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub request_id: String,
    #[serde(default)]
    pub request_body: Value,
    #[serde(default)]
    pub response_body: Value,
}
