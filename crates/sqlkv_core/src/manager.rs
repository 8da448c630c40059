//! Process-wide registry of open stores.
//!
//! Opening the same store twice through a [`StoreManager`] returns the live
//! handle, provided the second open asks for compatible options.

use crate::database::Database;
use crate::dir;
use crate::error::{CoreError, CoreResult};
use crate::properties::{NoSecurityCapability, SecurityCapability, StoreProperties};
use parking_lot::Mutex;
use sqlkv_storage::files;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Hands out one [`Database`] per store.
pub struct StoreManager {
    capability: Arc<dyn SecurityCapability>,
    stores: Mutex<HashMap<String, Weak<Database>>>,
}

impl StoreManager {
    /// Creates a manager for a process without label enforcement.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capability(Arc::new(NoSecurityCapability))
    }

    /// Creates a manager with a process capability adapter.
    #[must_use]
    pub fn with_capability(capability: Arc<dyn SecurityCapability>) -> Self {
        Self {
            capability,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the open handle for `props`, opening the store if needed.
    ///
    /// # Errors
    ///
    /// When the store is already open:
    /// - `SchemaMismatch` for a different schema
    /// - `InvalidArgs` for a different security option, conflict policy or
    ///   memory flag
    /// - `InvalidPasswordOrCorrupted` for a different password
    ///
    /// Otherwise the errors of [`Database::open`].
    pub fn open(&self, props: StoreProperties) -> CoreResult<Arc<Database>> {
        let key = registry_key(&props);
        let mut stores = self.stores.lock();
        stores.retain(|_, db| db.strong_count() > 0);

        if let Some(db) = stores.get(&key).and_then(Weak::upgrade) {
            if db.is_open() {
                db.engine()
                    .check_engine_option(&props, self.capability.as_ref())?;
                debug!(store = %key, "reusing open store");
                return Ok(db);
            }
        }

        let db = Database::open_with_capability(props, Arc::clone(&self.capability))?;
        stores.insert(key, Arc::downgrade(&db));
        Ok(db)
    }

    /// Deletes a store's files.
    ///
    /// # Errors
    ///
    /// `Busy` while the store is open through this manager.
    pub fn remove_store(&self, props: &StoreProperties) -> CoreResult<()> {
        if self.live(props).is_some() {
            return Err(CoreError::busy(format!("store {} is open", props.store_id)));
        }
        Database::remove(props)
    }

    /// Size in bytes of a store's live file set, open or not.
    ///
    /// # Errors
    ///
    /// `NotFound` if the store has no database file.
    pub fn get_store_size(&self, props: &StoreProperties) -> CoreResult<u64> {
        if let Some(db) = self.live(props) {
            return db.get_size();
        }
        if props.memory {
            return Err(CoreError::NotFound);
        }
        let path = dir::db_file(&props.store_dir());
        if !files::database_exists(&path) {
            return Err(CoreError::NotFound);
        }
        Ok(files::database_size(&path)?)
    }

    fn live(&self, props: &StoreProperties) -> Option<Arc<Database>> {
        self.stores
            .lock()
            .get(&registry_key(props))
            .and_then(Weak::upgrade)
            .filter(|db| db.is_open())
    }
}

impl Default for StoreManager {
    fn default() -> Self {
        Self::new()
    }
}

fn registry_key(props: &StoreProperties) -> String {
    if props.memory {
        format!("mem:{}", props.identifier())
    } else {
        props.store_dir().display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::ConflictPolicy;
    use sqlkv_storage::CipherPassword;
    use tempfile::tempdir;

    #[test]
    fn second_open_returns_live_handle() {
        let tmp = tempdir().unwrap();
        let manager = StoreManager::new();
        let props = StoreProperties::new(tmp.path(), "shared");

        let a = manager.open(props.clone()).unwrap();
        let b = manager.open(props).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn incompatible_reopen_is_rejected() {
        let tmp = tempdir().unwrap();
        let manager = StoreManager::new();
        let props = StoreProperties::new(tmp.path(), "shared").schema("v1");
        let _db = manager.open(props.clone()).unwrap();

        assert!(matches!(
            manager.open(props.clone().schema("v2")),
            Err(CoreError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            manager.open(props.clone().conflict_policy(ConflictPolicy::DeviceCollaboration)),
            Err(CoreError::InvalidArgs { .. })
        ));
        assert!(matches!(
            manager.open(props.password(CipherPassword::try_from("pw").unwrap())),
            Err(CoreError::InvalidPasswordOrCorrupted)
        ));
    }

    #[test]
    fn remove_and_size() {
        let tmp = tempdir().unwrap();
        let manager = StoreManager::new();
        let props = StoreProperties::new(tmp.path(), "sized");
        assert!(manager.get_store_size(&props).unwrap_err().is_not_found());

        let db = manager.open(props.clone()).unwrap();
        db.new_connection().unwrap().put(b"k", b"v").unwrap();
        assert!(manager.get_store_size(&props).unwrap() > 0);
        assert!(manager.remove_store(&props).unwrap_err().is_busy());

        db.close().unwrap();
        assert!(manager.get_store_size(&props).unwrap() > 0);
        manager.remove_store(&props).unwrap();
        assert!(manager.get_store_size(&props).unwrap_err().is_not_found());
    }

    #[test]
    fn closed_store_is_reopened() {
        let tmp = tempdir().unwrap();
        let manager = StoreManager::new();
        let props = StoreProperties::new(tmp.path(), "cycle");
        let first = manager.open(props.clone()).unwrap();
        first.close().unwrap();

        let second = manager.open(props).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_open());
    }
}
