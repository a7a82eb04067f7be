//! Credential records and the dual-slot active/inactive credential set.
//!
//! A rotation keeps at most two generations of a credential alive at the
//! target system: the *active* one, reflected in the secret store, and the
//! previous one, kept valid for rollback and overlap. [`CredentialSet`]
//! owns that representation and its single state transition.

use crate::cipher::{Cipher, SealedBlob};
use crate::{KeyturnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single issued credential: named values such as `username`/`password`,
/// exactly the values the secrets mapping draws from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRecord(BTreeMap<String, String>);

impl CredentialRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `slot`, if any.
    pub fn get(&self, slot: &str) -> Option<&str> {
        self.0.get(slot).map(String::as_str)
    }

    /// Sets a value, replacing any previous one under the same slot.
    pub fn insert(&mut self, slot: impl Into<String>, value: impl Into<String>) {
        self.0.insert(slot.into(), value.into());
    }

    /// Whether the record carries a value for `slot`.
    pub fn contains_slot(&self, slot: &str) -> bool {
        self.0.contains_key(slot)
    }

    /// Iterates over `(slot, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of named values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for CredentialRecord {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for CredentialRecord {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// The persisted dual-slot credential state: one or two records plus the
/// index of the one currently reflected in the secret store.
///
/// Length is 1 right after the first issuance and 2 in steady state; the
/// transition in [`advance`](Self::advance) keeps the previously active
/// record present until the *next* successful rotation overwrites it, which
/// is what makes mid-flight crashes non-destructive: the secret store still
/// points at a credential that remains valid at the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    records: Vec<CredentialRecord>,
    active_index: usize,
}

impl CredentialSet {
    /// The state after a first-ever issuance: one record, active.
    pub fn first(record: CredentialRecord) -> Self {
        Self {
            records: vec![record],
            active_index: 0,
        }
    }

    /// Computes the state after a successful issuance.
    ///
    /// Appends while fewer than two records exist; otherwise overwrites the
    /// inactive slot. The returned set's active index always points at
    /// `new_record`, and the previously active record is always still
    /// present (now inactive).
    pub fn advance(&self, new_record: CredentialRecord) -> Self {
        let mut records = self.records.clone();
        let active_index = if records.len() < 2 {
            records.push(new_record);
            records.len() - 1
        } else {
            let inactive = 1 - self.active_index;
            records[inactive] = new_record;
            inactive
        };
        Self {
            records,
            active_index,
        }
    }

    /// Replaces the active record's values in place, keeping the active
    /// index. Used by drift reconciliation, which repairs the stored copy
    /// without issuing a new credential.
    pub fn replace_active(&self, live_record: CredentialRecord) -> Self {
        let mut records = self.records.clone();
        records[self.active_index] = live_record;
        Self {
            records,
            active_index: self.active_index,
        }
    }

    /// The record currently reflected in the secret store.
    pub fn active_record(&self) -> &CredentialRecord {
        &self.records[self.active_index]
    }

    /// The previous-generation record, if two generations exist.
    pub fn inactive_record(&self) -> Option<&CredentialRecord> {
        if self.records.len() < 2 {
            None
        } else {
            Some(&self.records[1 - self.active_index])
        }
    }

    /// All records, oldest slot first.
    pub fn records(&self) -> &[CredentialRecord] {
        &self.records
    }

    /// Index of the active record.
    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// Checks the structural invariants: one or two records, active index
    /// in range.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::Fatal`]; a violated invariant means the
    /// persisted state is corrupt and the execution must abort.
    pub fn validate(&self) -> Result<()> {
        if self.records.is_empty() || self.records.len() > 2 {
            return Err(KeyturnError::Fatal(format!(
                "credential set must hold 1 or 2 records, found {}",
                self.records.len()
            )));
        }
        if self.active_index >= self.records.len() {
            return Err(KeyturnError::Fatal(format!(
                "active index {} out of range for {} records",
                self.active_index,
                self.records.len()
            )));
        }
        Ok(())
    }

    /// Seals the set for persistence.
    pub async fn seal(&self, cipher: &dyn Cipher) -> Result<SealedBlob> {
        let payload = serde_json::to_vec(self)?;
        cipher.seal(&payload).await
    }

    /// Opens a sealed set and checks its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::Fatal`] on an undecryptable blob, a payload
    /// that is not a credential set, or a violated invariant. A corrupt
    /// blob is never treated as "no credentials".
    pub async fn open(blob: &SealedBlob, cipher: &dyn Cipher) -> Result<Self> {
        let payload = cipher.open(blob).await?;
        let set: Self = serde_json::from_slice(&payload)
            .map_err(|_| KeyturnError::Fatal("sealed payload is not a credential set".to_string()))?;
        set.validate()?;
        Ok(set)
    }
}
