pub mod config;
pub mod ingest;
pub mod store;

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

/// Read a JSON document from a file, or from stdin when the path is `-`
pub fn read_input<T: serde::de::DeserializeOwned>(input: &Path) -> Result<T> {
    let raw = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };

    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", input.display()))
}
