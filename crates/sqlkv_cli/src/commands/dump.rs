//! Dump command implementation.

use super::{display_bytes, hex, StoreArgs};
use serde::Serialize;
use sqlkv_core::{CoreError, Entry};
use std::error::Error;

/// A dumped entry in JSON output.
#[derive(Debug, Serialize)]
pub struct DumpedEntry {
    /// Hex-encoded key.
    pub key: String,
    /// Hex-encoded value.
    pub value: String,
    /// Value length in bytes.
    pub size: usize,
}

impl From<&Entry> for DumpedEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            key: hex(&entry.key),
            value: hex(&entry.value),
            size: entry.value.len(),
        }
    }
}

/// Reads up to `limit` entries under `prefix`, keys ascending.
pub fn collect(
    store: &StoreArgs,
    prefix: &[u8],
    limit: Option<usize>,
) -> Result<Vec<Entry>, Box<dyn Error>> {
    let db = store.open()?;
    let conn = db.new_connection()?;
    let mut entries = match conn.get_entries(prefix) {
        Ok(entries) => entries,
        Err(CoreError::NotFound) => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    drop(conn);
    db.close()?;
    Ok(entries)
}

/// Runs the dump command.
pub fn run(
    store: &StoreArgs,
    prefix: &[u8],
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let entries = collect(store, prefix, limit)?;

    match format {
        "json" => {
            let dumped: Vec<DumpedEntry> = entries.iter().map(DumpedEntry::from).collect();
            println!("{}", serde_json::to_string_pretty(&dumped)?);
        }
        _ => {
            for entry in &entries {
                println!("{} = {}", display_bytes(&entry.key), display_bytes(&entry.value));
            }
            println!();
            println!("{} entries", entries.len());
        }
    }

    Ok(())
}
