//! Serializable store dumps for comparing contents.
//!
//! A dump lists every entry with hex-encoded key and value, in key order.
//! Two stores hold the same data exactly when their dumps are equal, so
//! dumps taken before and after a rekey, export or import can be compared
//! directly or written to disk as JSON for inspection.

use serde::{Deserialize, Serialize};
use sqlkv_core::{Connection, CoreError, CoreResult, Entry};
use std::path::Path;

/// One dumped entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpEntry {
    /// Hex-encoded key.
    pub key: String,
    /// Hex-encoded value.
    pub value: String,
}

/// The full contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDump {
    /// Stored user version.
    pub version: i32,
    /// Entries in key order.
    pub entries: Vec<DumpEntry>,
}

impl StoreDump {
    /// Reads every entry through `conn`.
    pub fn capture(conn: &Connection) -> CoreResult<Self> {
        let entries = match conn.get_entries(b"") {
            Ok(entries) => entries,
            Err(CoreError::NotFound) => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(Self {
            version: conn.database().get_version()?,
            entries: entries.iter().map(DumpEntry::from).collect(),
        })
    }

    /// Number of dumped entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store was empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the dump as pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("Dump serializes")
    }

    /// Parses a dump from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Writes the dump to `path` as JSON.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_json())
    }
}

impl From<&Entry> for DumpEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            key: hex_encode(&entry.key),
            value: hex_encode(&entry.value),
        }
    }
}

/// Lowercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Asserts two connections see identical contents.
pub fn assert_same_contents(left: &Connection, right: &Connection) {
    let left = StoreDump::capture(left).expect("Failed to dump left store");
    let right = StoreDump::capture(right).expect("Failed to dump right store");
    assert_eq!(left, right, "Store contents differ");
}
