//! Cipher passwords and raw key derivation.

use crate::error::{StorageError, StorageResult};
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the raw cipher key handed to the engine.
pub const RAW_KEY_SIZE: usize = 32;

const KEY_SALT: &[u8] = b"sqlkv-cipher-salt-v1";
const KEY_INFO: &[u8] = b"sqlkv-cipher-key-v1";

/// A store password.
///
/// An empty password means the store is kept in plaintext. The bytes are
/// wiped when the value is dropped.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct CipherPassword {
    bytes: Vec<u8>,
}

impl CipherPassword {
    /// Maximum password length in bytes.
    pub const MAX_SIZE: usize = 128;

    /// Creates a password from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is longer than [`Self::MAX_SIZE`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> StorageResult<Self> {
        let bytes = bytes.into();
        if bytes.len() > Self::MAX_SIZE {
            return Err(StorageError::PasswordTooLong {
                len: bytes.len(),
                max: Self::MAX_SIZE,
            });
        }
        Ok(Self { bytes })
    }

    /// Creates the empty (plaintext) password.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true for the plaintext password.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Password length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the password bytes.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the raw key literal (`x'<hex>'`) for this password, or `None`
    /// for the plaintext password.
    ///
    /// The password is stretched with HKDF-SHA256 so the engine receives a
    /// fixed-size raw key and skips its own passphrase derivation.
    pub(crate) fn key_literal(&self) -> StorageResult<Option<Zeroizing<String>>> {
        if self.is_empty() {
            return Ok(None);
        }

        let hk = Hkdf::<Sha256>::new(Some(KEY_SALT), &self.bytes);
        let mut raw = Zeroizing::new([0u8; RAW_KEY_SIZE]);
        hk.expand(KEY_INFO, &mut raw[..])
            .map_err(|_| StorageError::KeyDerivation("HKDF expand failed".into()))?;

        let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
        Ok(Some(Zeroizing::new(format!("x'{hex}'"))))
    }
}

impl PartialEq for CipherPassword {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for CipherPassword {}

impl fmt::Debug for CipherPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherPassword")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl TryFrom<&str> for CipherPassword {
    type Error = StorageError;

    fn try_from(value: &str) -> StorageResult<Self> {
        Self::new(value.as_bytes())
    }
}
