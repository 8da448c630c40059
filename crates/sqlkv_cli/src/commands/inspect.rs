//! Inspect command implementation.

use super::{format_size, StoreArgs};
use serde::Serialize;
use sqlkv_core::{CoreError, StatsSnapshot};
use std::error::Error;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Store identifier hash.
    pub identifier: String,
    /// Whether the store is encrypted.
    pub encrypted: bool,
    /// Size of the live file set in bytes.
    pub size: u64,
    /// Stored user version.
    pub version: i32,
    /// Number of entries.
    pub entry_count: usize,
    /// Counters for the inspection session.
    pub stats: StatsView,
}

/// Serializable view of [`StatsSnapshot`].
#[derive(Debug, Serialize)]
pub struct StatsView {
    /// Reads performed.
    pub reads: u64,
    /// Scans performed.
    pub scans: u64,
    /// Transactions begun.
    pub transactions_started: u64,
}

impl From<StatsSnapshot> for StatsView {
    fn from(stats: StatsSnapshot) -> Self {
        Self {
            reads: stats.reads,
            scans: stats.scans,
            transactions_started: stats.transactions_started,
        }
    }
}

/// Gathers the inspection result.
pub fn inspect(store: &StoreArgs) -> Result<InspectResult, Box<dyn Error>> {
    let db = store.open()?;
    let conn = db.new_connection()?;
    let entry_count = match conn.get_entries(b"") {
        Ok(entries) => entries.len(),
        Err(CoreError::NotFound) => 0,
        Err(err) => return Err(err.into()),
    };

    let result = InspectResult {
        path: store.store_dir().display().to_string(),
        identifier: store.props().identifier(),
        encrypted: !store.props().password.is_empty(),
        size: db.get_size()?,
        version: db.get_version()?,
        entry_count,
        stats: db.stats().into(),
    };
    drop(conn);
    db.close()?;
    Ok(result)
}

/// Runs the inspect command.
pub fn run(store: &StoreArgs, format: &str) -> Result<(), Box<dyn Error>> {
    let result = inspect(store)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("sqlkv Store Inspection");
    println!("======================");
    println!();
    println!("Path:       {}", result.path);
    println!("Identifier: {}", result.identifier);
    println!("Encrypted:  {}", if result.encrypted { "yes" } else { "no" });
    println!();
    println!("Storage:");
    println!("  Size:     {}", format_size(result.size));
    println!("  Version:  {}", result.version);
    println!("  Entries:  {}", result.entry_count);
    println!();
    println!("Session:");
    println!("  Reads:        {}", result.stats.reads);
    println!("  Scans:        {}", result.stats.scans);
    println!("  Transactions: {}", result.stats.transactions_started);
}
