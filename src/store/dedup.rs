//! Collapse rows sharing a natural key down to the earliest-created one
//!
//! Multi-row upserts cannot touch the same key twice, and redelivery from the
//! upstream pipeline means a batch may carry several copies of one logical
//! row. The surviving row per key is the one with the earliest `created_at`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::records::{LogRecord, ResponseRecord};

/// A row that can be deduplicated by a string key
pub trait Dedupe {
    /// Natural-key value; rows returning `None` are dropped
    fn dedupe_key(&self) -> Option<&str>;

    fn created_at(&self) -> Option<DateTime<Utc>>;
}

impl Dedupe for LogRecord {
    fn dedupe_key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Dedupe for ResponseRecord {
    fn dedupe_key(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

/// Keep one row per key.
///
/// A candidate replaces the kept row when the kept row has no timestamp, or
/// when both have one and the candidate's is strictly earlier. Ties keep the
/// first-seen row. Output follows the order in which keys were first seen.
pub fn dedupe<T: Dedupe>(rows: &[T]) -> Vec<&T> {
    let mut order: Vec<&str> = Vec::new();
    let mut kept: HashMap<&str, &T> = HashMap::new();

    for row in rows {
        let Some(key) = row.dedupe_key() else {
            continue;
        };

        match kept.get(key).copied() {
            None => {
                order.push(key);
                kept.insert(key, row);
            }
            Some(existing) => {
                let replace = match (existing.created_at(), row.created_at()) {
                    (None, _) => true,
                    (Some(current), Some(candidate)) => candidate < current,
                    (Some(_), None) => false,
                };
                if replace {
                    kept.insert(key, row);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| kept.get(key).copied())
        .collect()
}
