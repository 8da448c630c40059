//! Rekey command implementation.

use super::{parse_password, StoreArgs};
use std::error::Error;
use tracing::info;

/// Re-encrypts the store with `new_password`. An empty password decrypts it.
pub fn run(store: &StoreArgs, new_password: &str) -> Result<(), Box<dyn Error>> {
    info!("Rekeying {:?}", store.store_dir());
    let password = if new_password.is_empty() {
        parse_password(None)?
    } else {
        parse_password(Some(new_password))?
    };
    let db = store.open()?;
    db.rekey(&password)?;
    db.close()?;

    println!("✓ Store rekeyed successfully");
    if password.is_empty() {
        println!("  The store is now plaintext");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dump::collect;
    use crate::commands::tests::sample_store;

    #[test]
    fn test_rekey_and_reopen() {
        let (dir, store) = sample_store(Some("old"));
        run(&store, "new").unwrap();

        assert!(collect(&store, b"", None).is_err());
        let renamed = StoreArgs::new(dir.path().to_path_buf(), "cli".into(), Some("new")).unwrap();
        assert_eq!(collect(&renamed, b"", None).unwrap().len(), 3);

        run(&renamed, "").unwrap();
        let plain = StoreArgs::new(dir.path().to_path_buf(), "cli".into(), None).unwrap();
        assert_eq!(collect(&plain, b"a", None).unwrap().len(), 1);
    }
}
