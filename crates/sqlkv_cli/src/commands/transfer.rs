//! Export and import commands.
//!
//! Both go through the store's own maintenance operations, so an
//! interrupted import leaves the previous contents in place.

use super::{parse_password, StoreArgs};
use std::error::Error;
use std::path::Path;
use tracing::info;

/// Writes a copy of the store to `output`, encrypted with `target_password`.
pub fn export(
    store: &StoreArgs,
    output: &Path,
    target_password: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    info!("Exporting {:?} to {:?}", store.store_dir(), output);
    let password = parse_password(target_password)?;
    let db = store.open()?;
    db.export(output, &password)?;
    db.close()?;

    println!("✓ Export created successfully");
    println!("  Path: {:?}", output);
    println!(
        "  Encrypted: {}",
        if password.is_empty() { "no" } else { "yes" }
    );
    Ok(())
}

/// Replaces the store's contents with the database file at `input`.
pub fn import(
    store: &StoreArgs,
    input: &Path,
    source_password: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    info!("Importing {:?} into {:?}", input, store.store_dir());
    let password = parse_password(source_password)?;
    let db = store.open()?;
    db.import(input, &password)?;
    db.close()?;

    println!("✓ Import completed successfully");
    println!("  Source: {:?}", input);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dump::collect;
    use crate::commands::tests::sample_store;

    #[test]
    fn test_export_then_import_elsewhere() {
        let (dir, store) = sample_store(Some("pw"));
        let copy = dir.path().join("copy.db");
        export(&store, &copy, Some("copy-pw")).unwrap();
        assert!(copy.exists());
        assert!(export(&store, &copy, Some("copy-pw")).is_err());

        let (_other_dir, other) = sample_store(None);
        {
            let db = other.open().unwrap();
            db.new_connection().unwrap().put(b"extra", b"x").unwrap();
            db.close().unwrap();
        }
        assert_eq!(collect(&other, b"", None).unwrap().len(), 4);
        assert!(import(&other, &copy, Some("wrong")).is_err());
        assert_eq!(collect(&other, b"", None).unwrap().len(), 4);

        import(&other, &copy, Some("copy-pw")).unwrap();
        assert!(collect(&other, b"extra", None).unwrap().is_empty());
        assert_eq!(collect(&other, b"", None).unwrap().len(), 3);
    }
}
