//! Store properties and the process capability adapter.

use crate::config::EngineConfig;
use crate::error::CoreResult;
use sha2::{Digest, Sha256};
use sqlkv_storage::CipherPassword;
use std::path::{Path, PathBuf};

/// Data sensitivity label of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SecurityLabel {
    /// No label requested; the capability adapter decides.
    #[default]
    NotSet,
    /// Public data.
    S0,
    /// Low sensitivity.
    S1,
    /// Medium sensitivity.
    S2,
    /// High sensitivity.
    S3,
    /// Critical.
    S4,
}

/// How the label is enforced on the store's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityFlag {
    /// Enforced per file.
    #[default]
    Ece,
    /// Enforced per directory.
    Sece,
}

/// Label and enforcement flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SecurityOption {
    /// Sensitivity label.
    pub label: SecurityLabel,
    /// Enforcement flag.
    pub flag: SecurityFlag,
}

impl SecurityOption {
    /// Creates an option.
    #[must_use]
    pub const fn new(label: SecurityLabel, flag: SecurityFlag) -> Self {
        Self { label, flag }
    }

    /// Returns true if no label was requested.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.label == SecurityLabel::NotSet
    }
}

/// Conflict-resolution policy carried for higher layers.
///
/// The core only compares it when the same store is opened twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConflictPolicy {
    /// Latest write wins.
    #[default]
    LastWriteWins,
    /// Peers resolve conflicts cooperatively.
    DeviceCollaboration,
}

/// Queries about the current process's security posture.
pub trait SecurityCapability: Send + Sync {
    /// Returns the security option currently applied to `path`.
    fn security_option(&self, path: &Path) -> CoreResult<SecurityOption>;

    /// Returns true while labelled files are locked away from this process
    /// (for example while the device is locked).
    fn is_access_controlled(&self) -> bool {
        false
    }
}

/// Capability adapter for processes without label enforcement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSecurityCapability;

impl SecurityCapability for NoSecurityCapability {
    fn security_option(&self, _path: &Path) -> CoreResult<SecurityOption> {
        Ok(SecurityOption::default())
    }
}

/// Properties of one store.
///
/// Fixed once the handle is open, except the password (changed by rekey).
#[derive(Debug, Clone)]
pub struct StoreProperties {
    /// Root directory holding store directories.
    pub data_dir: PathBuf,
    /// Owning user.
    pub user_id: String,
    /// Owning application.
    pub app_id: String,
    /// Store name.
    pub store_id: String,
    /// Cipher password; empty for plaintext.
    pub password: CipherPassword,
    /// Security label and flag.
    pub security: SecurityOption,
    /// Opaque schema string.
    pub schema: String,
    /// Conflict-resolution policy.
    pub conflict_policy: ConflictPolicy,
    /// Keep the store in memory only.
    pub memory: bool,
    /// Name the store directory after `store_id` instead of the identifier hash.
    pub create_dir_by_store_id_only: bool,
    /// Create the store if it does not exist.
    pub create_if_missing: bool,
    /// Executor pool configuration.
    pub engine: EngineConfig,
}

impl StoreProperties {
    /// Creates properties for a store under `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>, store_id: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            user_id: String::new(),
            app_id: String::new(),
            store_id: store_id.into(),
            password: CipherPassword::empty(),
            security: SecurityOption::default(),
            schema: String::new(),
            conflict_policy: ConflictPolicy::default(),
            memory: false,
            create_dir_by_store_id_only: false,
            create_if_missing: true,
            engine: EngineConfig::default(),
        }
    }

    /// Creates properties for an in-memory store.
    pub fn in_memory(store_id: impl Into<String>) -> Self {
        Self {
            memory: true,
            ..Self::new(PathBuf::new(), store_id)
        }
    }

    /// Sets the owning user and application.
    #[must_use]
    pub fn owner(mut self, user_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.app_id = app_id.into();
        self
    }

    /// Sets the cipher password.
    #[must_use]
    pub fn password(mut self, password: CipherPassword) -> Self {
        self.password = password;
        self
    }

    /// Sets the security option.
    #[must_use]
    pub fn security(mut self, security: SecurityOption) -> Self {
        self.security = security;
        self
    }

    /// Sets the schema string.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Names the directory after the store id.
    #[must_use]
    pub fn create_dir_by_store_id_only(mut self, value: bool) -> Self {
        self.create_dir_by_store_id_only = value;
        self
    }

    /// Sets whether a missing store is created.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Stable identifier: hex SHA-256 of `user-app-store`.
    #[must_use]
    pub fn identifier(&self) -> String {
        let digest = Sha256::digest(
            format!("{}-{}-{}", self.user_id, self.app_id, self.store_id).as_bytes(),
        );
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Directory holding this store's files.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        if self.create_dir_by_store_id_only {
            self.data_dir.join(&self.store_id)
        } else {
            self.data_dir.join(self.identifier())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_stable_hex() {
        let a = StoreProperties::new("/data", "store").owner("u", "app");
        let b = StoreProperties::new("/other", "store").owner("u", "app");
        let c = StoreProperties::new("/data", "store").owner("u", "app2");

        assert_eq!(a.identifier().len(), 64);
        assert_eq!(a.identifier(), b.identifier());
        assert_ne!(a.identifier(), c.identifier());
    }

    #[test]
    fn store_dir_layout() {
        let props = StoreProperties::new("/data", "store");
        assert_eq!(props.store_dir(), Path::new("/data").join(props.identifier()));

        let props = props.create_dir_by_store_id_only(true);
        assert_eq!(props.store_dir(), Path::new("/data/store"));
    }

    #[test]
    fn labels_are_ordered() {
        assert!(SecurityLabel::S3 > SecurityLabel::S2);
        assert!(SecurityOption::default().is_unset());
    }
}
