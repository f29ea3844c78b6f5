//! Searchable text extraction from chat request/response payloads
//!
//! Extraction never fails: a payload without the expected shape yields an
//! empty string and a warning, so a malformed body cannot abort a write.

use serde_json::Value;
use std::borrow::Cow;

/// Concatenate the `content` of every `role == "user"` message.
pub fn request_text(body: &Value) -> String {
    let body = parse_raw(body);
    match pull_request_messages(&body) {
        Ok(text) => text,
        Err(reason) => {
            tracing::warn!(reason, "Could not pull request body messages");
            String::new()
        }
    }
}

/// Concatenate the message `content` of every choice whose role is `assistant`.
pub fn response_text(body: &Value) -> String {
    let body = parse_raw(body);
    match pull_response_messages(&body) {
        Ok(text) => text,
        Err(reason) => {
            tracing::warn!(reason, "Could not pull response body messages");
            String::new()
        }
    }
}

/// Lowercased alphanumeric tokens joined by single spaces.
///
/// Stand-in for a `simple` text-search dictionary: no stemming, no stop words.
pub fn simple_tokens(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bodies sometimes arrive as the raw JSON string rather than a parsed value.
fn parse_raw(body: &Value) -> Cow<'_, Value> {
    match body {
        Value::String(raw) => match serde_json::from_str(raw) {
            Ok(parsed) => Cow::Owned(parsed),
            Err(_) => Cow::Borrowed(body),
        },
        _ => Cow::Borrowed(body),
    }
}

fn pull_request_messages(body: &Value) -> Result<String, &'static str> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or("messages array is missing or not an array")?;

    let text = messages
        .iter()
        .filter(|message| message.get("role").and_then(Value::as_str) == Some("user"))
        .map(|message| content_text(message.get("content")))
        .collect::<Vec<_>>()
        .join(" ");

    Ok(text.trim().to_string())
}

fn pull_response_messages(body: &Value) -> Result<String, &'static str> {
    let choices = body
        .get("choices")
        .and_then(Value::as_array)
        .ok_or("choices array is missing or not an array")?;

    let mut parts = Vec::with_capacity(choices.len());
    for choice in choices {
        let message = choice
            .get("message")
            .filter(|message| message.is_object())
            .ok_or("choice without a message object")?;

        if message.get("role").and_then(Value::as_str) == Some("assistant") {
            parts.push(content_text(message.get("content")));
        }
    }

    Ok(parts.join(" ").trim().to_string())
}

/// Plain-string content, or the `text` of each part in multi-part content.
fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}
