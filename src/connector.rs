//! Connector trait definition and registry for rotation targets.
//!
//! This module defines the [`Connector`] capability that every rotation
//! type implements: issuing a new credential at the external system,
//! revoking one, and optionally testing a stored credential against the
//! live system. Connectors classify their own failures; the orchestrator
//! passes the classification through unmodified.

use crate::record::CredentialRecord;
use crate::{KeyturnError, Result, RotationType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Failure classification for connector operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorErrorKind {
    /// Network/timeout class. Eligible for retry with backoff.
    Transient,
    /// Bad parameters or auth. Not retried automatically; surfaced to the
    /// operator.
    Permanent,
    /// The credential may exist at the target but confirmation failed.
    /// Treated like `Transient` and retried - never assumed to have failed
    /// cleanly, since the credential might have been created. Connectors
    /// for types prone to this must make `issue` idempotent by naming
    /// convention or lookup-then-create.
    PartialSuccess,
}

/// An operation failure reported by a connector, carrying its own
/// classification.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConnectorError {
    /// Failure class.
    pub kind: ConnectorErrorKind,
    /// Human-readable detail. May echo target-system error text, which is
    /// why persisted copies are always sealed.
    pub message: String,
}

impl ConnectorError {
    /// A retriable network/timeout class failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectorErrorKind::Transient,
            message: message.into(),
        }
    }

    /// A non-retriable configuration/auth class failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectorErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// A created-but-unconfirmed failure; retried like `transient`.
    pub fn partial(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectorErrorKind::PartialSuccess,
            message: message.into(),
        }
    }
}

impl From<ConnectorError> for KeyturnError {
    fn from(err: ConnectorError) -> Self {
        match err.kind {
            ConnectorErrorKind::Transient | ConnectorErrorKind::PartialSuccess => {
                KeyturnError::Transient(err.message)
            }
            ConnectorErrorKind::Permanent => KeyturnError::Permanent(err.message),
        }
    }
}

/// The stored credential generations handed to [`Connector::issue`].
///
/// `inactive` is the slot the new credential will recycle in steady state;
/// `active` is the generation currently reflected in the secret store and
/// must stay valid. Dual-principal connectors use both to decide which
/// principal to regenerate; single-account connectors overwrite the one
/// principal they have.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueContext<'a> {
    /// The record currently live in the secret store, if any.
    pub active: Option<&'a CredentialRecord>,
    /// The previous-generation record, if two generations exist.
    pub inactive: Option<&'a CredentialRecord>,
}

impl<'a> IssueContext<'a> {
    /// Context for a first-ever issuance.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Outcome of testing a stored credential against the live system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// The stored credential is valid at the target.
    Valid,
    /// The target no longer honors the stored values; the connector
    /// re-derived the live record for drift repair.
    Divergent(CredentialRecord),
}

/// A rotation target integration.
///
/// One implementation per [`RotationType`]. All implementations must be
/// `Send + Sync` to support concurrent executions across async tasks.
///
/// # Example
///
/// ```no_run
/// use keyturn::connector::ConnectorRegistry;
/// use keyturn::RotationType;
///
/// let registry = ConnectorRegistry::builtin();
/// let connector = registry.get(RotationType::DatabaseCredentials)?;
/// assert_eq!(connector.rotation_type(), RotationType::DatabaseCredentials);
/// # Ok::<(), keyturn::KeyturnError>(())
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// The rotation type this connector serves.
    fn rotation_type(&self) -> RotationType;

    /// Validates type-specific parameters at configuration time, before
    /// any credential is issued.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::InvalidParameters`] describing the first
    /// problem found.
    fn validate_parameters(&self, parameters: &serde_json::Value) -> Result<()>;

    /// Creates a new, distinct credential at the external system.
    ///
    /// Must not invalidate the credential in `ctx.active` - that is what
    /// makes zero-downtime rotation possible. Types limited to a single
    /// principal instead overwrite the prior principal's secret, which is
    /// why the full context is provided.
    async fn issue(
        &self,
        parameters: &serde_json::Value,
        ctx: IssueContext<'_>,
    ) -> std::result::Result<CredentialRecord, ConnectorError>;

    /// Invalidates a previously issued credential.
    ///
    /// Idempotent: revoking an already-revoked credential is a success.
    async fn revoke(
        &self,
        parameters: &serde_json::Value,
        credential: &CredentialRecord,
    ) -> std::result::Result<(), ConnectorError>;

    /// Whether this connector can test stored credentials against the live
    /// system (required for drift reconciliation).
    fn supports_test(&self) -> bool {
        false
    }

    /// Verifies a stored credential against the live system.
    ///
    /// The default implementation reports the operation unsupported.
    async fn test(
        &self,
        _parameters: &serde_json::Value,
        _credential: &CredentialRecord,
    ) -> std::result::Result<LiveStatus, ConnectorError> {
        Err(ConnectorError::permanent(format!(
            "{} does not support credential testing",
            self.rotation_type()
        )))
    }
}

/// Registry of connectors keyed by rotation type.
///
/// An explicit value with no ambient global state: construct one, register
/// custom connectors, and hand it to the engine.
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<RotationType, Arc<dyn Connector>>>,
}

impl ConnectorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry pre-populated with all compiled-in connectors
    /// (per Cargo feature flags).
    pub fn builtin() -> Self {
        let registry = Self::new();
        crate::connectors::register_builtin(&registry);
        registry
    }

    /// Registers a connector under its rotation type, replacing any
    /// previous registration for that type.
    pub fn register(&self, connector: Arc<dyn Connector>) {
        let mut connectors = self.connectors.write().unwrap();
        connectors.insert(connector.rotation_type(), connector);
    }

    /// Looks up the connector for a rotation type.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::UnknownConnector`] with a feature-flag hint
    /// if nothing is registered for the type.
    pub fn get(&self, rotation_type: RotationType) -> Result<Arc<dyn Connector>> {
        let connectors = self.connectors.read().unwrap();
        connectors.get(&rotation_type).cloned().ok_or_else(|| {
            KeyturnError::UnknownConnector(format!(
                "{} (register one, or check the crate's feature flags)",
                rotation_type
            ))
        })
    }

    /// The rotation types with a registered connector.
    pub fn registered_types(&self) -> Vec<RotationType> {
        let connectors = self.connectors.read().unwrap();
        connectors.keys().copied().collect()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
