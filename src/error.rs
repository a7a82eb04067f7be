//! Error types for rotation operations.

use thiserror::Error;

/// Result type alias using [`KeyturnError`].
pub type Result<T> = std::result::Result<T, KeyturnError>;

/// Errors that can occur while configuring or executing rotations.
///
/// The first four variants form the failure taxonomy the orchestrator and
/// scheduler act on; the rest are infrastructure errors. Connector
/// classifications pass through unmodified - a `Permanent` connector failure
/// is never retried on the tightened backoff cadence, and a `Transient` one
/// always is.
#[derive(Debug, Error)]
pub enum KeyturnError {
    /// Recoverable failure (network, timeout). Retried on backoff cadence.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable failure (bad parameters, auth). Surfaced to the
    /// operator; retried only on the normal schedule.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A credential was issued at the target system but could not be
    /// written to the secret store. The stored state is unchanged; the
    /// extra credential at the target is superseded by the next attempt.
    #[error("credential issued but not applied to the secret store: {0}")]
    ApplyFailure(String),

    /// Corrupt sealed data or a violated internal invariant. Never
    /// silently swallowed; the execution aborts.
    #[error("fatal: {0}")]
    Fatal(String),

    /// No rotation exists with the given id.
    #[error("rotation not found: {0}")]
    NotFound(String),

    /// A rotation with this name or id already exists.
    #[error("rotation already exists: {0}")]
    AlreadyExists(String),

    /// Another execution holds the lock for this rotation.
    #[error("an execution for rotation {0} is already running")]
    AlreadyRunning(String),

    /// The row was modified since it was read (optimistic lock failure).
    #[error("stale version for rotation {0}")]
    VersionConflict(String),

    /// No connector is registered for the rotation type.
    #[error("no connector registered for rotation type: {0}")]
    UnknownConnector(String),

    /// Connector rejected the type-specific parameters.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The secrets mapping references a slot the credential record lacks,
    /// or contains an invalid destination key.
    #[error("invalid secrets mapping: {0}")]
    InvalidMapping(String),

    /// Name contains invalid or dangerous characters.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Operation is not supported by the connector for this type.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Required CLI tool for a connector is not installed.
    #[error("connector tool not installed: {0}")]
    ConnectorNotInstalled(String),

    /// Command execution failed.
    #[error("command execution failed: {0}")]
    CommandFailed(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KeyturnError {
    /// Whether the failure is eligible for the tightened retry cadence.
    ///
    /// `ApplyFailure` is retriable: the issue contract is idempotent, so the
    /// next attempt reuses or supersedes the credential left at the target.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ApplyFailure(_))
    }
}
