//! Writing active credential values into the secret store.
//!
//! The [`SecretsMappingWriter`] applies a rotation's slot-to-destination
//! mapping as one atomic batch: either every destination reflects the new
//! record or none does. A partial mapping never reaches the store.

use crate::config::SecretMapping;
use crate::record::CredentialRecord;
use crate::{KeyturnError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Checks that a record carries a value for every mapped slot.
///
/// # Errors
///
/// Returns [`KeyturnError::InvalidMapping`] naming the first missing slot.
pub fn ensure_covers(mapping: &[SecretMapping], record: &CredentialRecord) -> Result<()> {
    for entry in mapping {
        if !record.contains_slot(&entry.slot) {
            return Err(KeyturnError::InvalidMapping(format!(
                "credential record has no value for mapped slot '{}'",
                entry.slot
            )));
        }
    }
    Ok(())
}

/// Destination store for rotated credential values.
///
/// Implementations must apply [`write`](Self::write) atomically relative to
/// other rotation executions and concurrent edits of the same destination
/// secrets: no interleaving of a partial batch.
#[async_trait]
pub trait SecretsMappingWriter: Send + Sync {
    /// Writes `record[slot]` to every mapped destination as a single batch.
    ///
    /// # Errors
    ///
    /// Fails the whole batch with nothing applied if any slot is missing
    /// from the record or any destination write fails.
    async fn write(&self, mapping: &[SecretMapping], record: &CredentialRecord) -> Result<()>;

    /// Removes every mapped destination secret. Missing destinations are
    /// not an error (the removal is idempotent).
    async fn remove(&self, mapping: &[SecretMapping]) -> Result<()>;
}

/// In-memory secret store for tests and embedded use.
///
/// Supports error injection to simulate a failing store, mirroring the
/// mock connector.
///
/// # Example
///
/// ```
/// use keyturn::mapping::{MemorySecretStore, SecretsMappingWriter};
/// use keyturn::record::CredentialRecord;
/// use keyturn::SecretMapping;
///
/// #[tokio::main]
/// async fn main() -> keyturn::Result<()> {
///     let store = MemorySecretStore::new();
///     let mapping = vec![SecretMapping::new("password", "DB_PASSWORD")];
///     let record = CredentialRecord::from([("password", "hunter2")]);
///
///     store.write(&mapping, &record).await?;
///     assert_eq!(store.value("DB_PASSWORD").await.as_deref(), Some("hunter2"));
///     Ok(())
/// }
/// ```
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
    write_error: std::sync::Mutex<Option<String>>,
    remove_error: std::sync::Mutex<Option<String>>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
            write_error: std::sync::Mutex::new(None),
            remove_error: std::sync::Mutex::new(None),
        }
    }

    /// Injects an error for subsequent `write` calls.
    pub fn fail_writes(&self, message: impl Into<String>) {
        *self.write_error.lock().unwrap() = Some(message.into());
    }

    /// Clears an injected write error.
    pub fn heal_writes(&self) {
        *self.write_error.lock().unwrap() = None;
    }

    /// Injects an error for subsequent `remove` calls.
    pub fn fail_removals(&self, message: impl Into<String>) {
        *self.remove_error.lock().unwrap() = Some(message.into());
    }

    /// The current value under a destination key.
    pub async fn value(&self, destination: &str) -> Option<String> {
        let secrets = self.secrets.read().await;
        secrets.get(destination).cloned()
    }

    /// Snapshot of the whole store, for assertions.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.secrets.read().await.clone()
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretsMappingWriter for MemorySecretStore {
    async fn write(&self, mapping: &[SecretMapping], record: &CredentialRecord) -> Result<()> {
        if let Some(message) = self.write_error.lock().unwrap().clone() {
            return Err(KeyturnError::Transient(message));
        }

        // Resolve every slot before touching the store so a missing slot
        // applies nothing.
        ensure_covers(mapping, record)?;

        let mut secrets = self.secrets.write().await;
        for entry in mapping {
            let value = record
                .get(&entry.slot)
                .expect("slot presence checked above");
            secrets.insert(entry.destination.clone(), value.to_string());
        }
        Ok(())
    }

    async fn remove(&self, mapping: &[SecretMapping]) -> Result<()> {
        if let Some(message) = self.remove_error.lock().unwrap().clone() {
            return Err(KeyturnError::Transient(message));
        }

        let mut secrets = self.secrets.write().await;
        for entry in mapping {
            secrets.remove(&entry.destination);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> Vec<SecretMapping> {
        vec![
            SecretMapping::new("username", "DB_USER"),
            SecretMapping::new("password", "DB_PASSWORD"),
        ]
    }

    #[tokio::test]
    async fn test_write_applies_all_slots() {
        let store = MemorySecretStore::new();
        let record = CredentialRecord::from([("username", "app_user_1"), ("password", "pw1")]);

        store.write(&mapping(), &record).await.unwrap();

        assert_eq!(store.value("DB_USER").await.as_deref(), Some("app_user_1"));
        assert_eq!(store.value("DB_PASSWORD").await.as_deref(), Some("pw1"));
    }

    #[tokio::test]
    async fn test_missing_slot_applies_nothing() {
        let store = MemorySecretStore::new();
        let record = CredentialRecord::from([("username", "app_user_1")]);

        let result = store.write(&mapping(), &record).await;

        assert!(matches!(result, Err(KeyturnError::InvalidMapping(_))));
        assert!(store.value("DB_USER").await.is_none());
        assert!(store.value("DB_PASSWORD").await.is_none());
    }

    #[tokio::test]
    async fn test_injected_write_error() {
        let store = MemorySecretStore::new();
        store.fail_writes("store unavailable");

        let record = CredentialRecord::from([("username", "u"), ("password", "p")]);
        let result = store.write(&mapping(), &record).await;
        assert!(result.is_err());

        store.heal_writes();
        store.write(&mapping(), &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemorySecretStore::new();
        let record = CredentialRecord::from([("username", "u"), ("password", "p")]);
        store.write(&mapping(), &record).await.unwrap();

        store.remove(&mapping()).await.unwrap();
        assert!(store.value("DB_USER").await.is_none());

        // second removal of already-missing destinations succeeds
        store.remove(&mapping()).await.unwrap();
    }

    #[test]
    fn test_ensure_covers() {
        let record = CredentialRecord::from([("username", "u"), ("password", "p")]);
        assert!(ensure_covers(&mapping(), &record).is_ok());

        let partial = CredentialRecord::from([("password", "p")]);
        let err = ensure_covers(&mapping(), &partial).unwrap_err();
        assert!(err.to_string().contains("username"));
    }
}
