//! Verify command implementation.

use super::StoreArgs;
use std::error::Error;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Problems reported by the engine.
    pub errors: Vec<String>,
    /// Whether corruption was flagged while checking.
    pub corrupted: bool,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty() && !self.corrupted
    }
}

/// Runs the integrity check on the store.
pub fn verify(store: &StoreArgs) -> Result<VerifyResult, Box<dyn Error>> {
    let db = store.open()?;
    let errors = db.check_integrity()?;
    let result = VerifyResult {
        errors,
        corrupted: db.is_corrupted(),
    };
    db.close()?;
    Ok(result)
}

/// Runs the verify command.
pub fn run(store: &StoreArgs) -> Result<(), Box<dyn Error>> {
    println!("Verifying store at {:?}", store.store_dir());
    println!();

    let result = verify(store)?;
    if result.is_ok() {
        println!("✓ Store is healthy");
        return Ok(());
    }

    println!("✗ Integrity check failed:");
    for error in &result.errors {
        println!("  - {}", error);
    }
    Err(format!("{} problem(s) found", result.errors.len()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::sample_store;

    #[test]
    fn test_verify_healthy_store() {
        let (_dir, store) = sample_store(None);
        let result = verify(&store).unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_wrong_password() {
        let (dir, _) = sample_store(Some("right"));
        let store = StoreArgs::new(dir.path().to_path_buf(), "cli".into(), Some("wrong")).unwrap();
        assert!(verify(&store).is_err());
    }
}
