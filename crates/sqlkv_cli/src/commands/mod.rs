//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod rekey;
pub mod transfer;
pub mod verify;

use sqlkv_core::{CipherPassword, Database, StoreProperties};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

/// Which store a command works on.
#[derive(Debug, Clone)]
pub struct StoreArgs {
    props: StoreProperties,
}

impl StoreArgs {
    /// Describes the store `<data_dir>/<store_id>`.
    pub fn new(
        data_dir: PathBuf,
        store_id: String,
        password: Option<&str>,
    ) -> Result<Self, Box<dyn Error>> {
        let props = StoreProperties::new(data_dir, store_id)
            .create_dir_by_store_id_only(true)
            .create_if_missing(false)
            .password(parse_password(password)?);
        Ok(Self { props })
    }

    /// Directory holding the store's files.
    pub fn store_dir(&self) -> PathBuf {
        self.props.store_dir()
    }

    /// The store properties.
    pub fn props(&self) -> &StoreProperties {
        &self.props
    }

    /// Opens the existing store.
    pub fn open(&self) -> Result<Arc<Database>, Box<dyn Error>> {
        if !sqlkv_core::dir::db_file(&self.store_dir()).exists() {
            return Err(format!("No store found at {:?}", self.store_dir()).into());
        }
        Ok(Database::open(self.props.clone())?)
    }
}

/// Parses an optional command-line password; absent means plaintext.
pub fn parse_password(password: Option<&str>) -> Result<CipherPassword, Box<dyn Error>> {
    match password {
        None => Ok(CipherPassword::empty()),
        Some(text) => Ok(CipherPassword::try_from(text)?),
    }
}

/// Renders bytes as text when printable, hex otherwise.
pub fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(char::is_control) => format!("{text:?}"),
        _ => format!("0x{}", hex(bytes)),
    }
}

/// Lowercase hex encoding.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
