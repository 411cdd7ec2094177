//! Opaque key→secret storage backed by the OS credential store.
//!
//! The router keeps token secrets out of its database: the full serialized
//! token lives here under the token id, and only metadata is persisted
//! relationally. Tests and headless environments use [`MemorySecretStore`].

mod keyring_store;
mod memory;

pub use keyring_store::KeyringSecretStore;
pub use memory::MemorySecretStore;

use mcpr_core::Result;

/// Key→secret store. Implementations must be thread-safe; calls may block
/// (the OS keychain does), so callers on the async runtime wrap them in
/// `spawn_blocking`.
pub trait SecretStore: Send + Sync {
    /// Store or overwrite a secret.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the write.
    fn set(&self, key: &str, secret: &str) -> Result<()>;

    /// Fetch a secret. `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error only on backend failure, never for a missing key.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a secret. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails the delete.
    fn delete(&self, key: &str) -> Result<()>;
}
