//! Rotation configuration: the persisted row model, cadence computation,
//! and engine tuning options.

use crate::cipher::SealedBlob;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Opaque, stable identifier of a rotation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RotationId(String);

impl RotationId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RotationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RotationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RotationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Rotation kind. Determines which connector and parameter/record shapes
/// apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationType {
    /// Database login credentials (cycled between two pre-provisioned roles)
    DatabaseCredentials,
    /// Cloud IAM principal access key/secret
    CloudIamSecret,
    /// OAuth/SaaS client secret
    OauthClientSecret,
    /// Local OS account password
    LocalAccountPassword,
}

impl std::fmt::Display for RotationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DatabaseCredentials => write!(f, "database-credentials"),
            Self::CloudIamSecret => write!(f, "cloud-iam-secret"),
            Self::OauthClientSecret => write!(f, "oauth-client-secret"),
            Self::LocalAccountPassword => write!(f, "local-account-password"),
        }
    }
}

/// Execution status of a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStatus {
    /// Never attempted since creation (or reset).
    Idle,
    /// An attempt is in flight. `next_rotation_at` is cleared while running.
    Running,
    /// The most recent attempt applied a new credential end-to-end.
    Succeeded,
    /// The most recent attempt failed; see the sealed message.
    Failed,
}

/// A UTC time-of-day anchor for scheduled rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateAtUtc {
    /// Hour, 0-23.
    pub hour: u32,
    /// Minute, 0-59.
    pub minute: u32,
}

/// Cadence of automatic rotation: a fixed interval, optionally pinned to a
/// predictable UTC time-of-day so rotations do not drift across the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSchedule {
    /// Seconds between rotations.
    pub interval_seconds: u64,
    /// Optional time-of-day anchor.
    pub rotate_at_utc: Option<RotateAtUtc>,
}

impl RotationSchedule {
    /// A plain interval with no time-of-day anchor.
    pub fn every_seconds(interval_seconds: u64) -> Self {
        Self {
            interval_seconds,
            rotate_at_utc: None,
        }
    }

    /// Daily rotation anchored at the given UTC time.
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Self {
            interval_seconds: 86_400,
            rotate_at_utc: Some(RotateAtUtc { hour, minute }),
        }
    }

    /// The interval as a std `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Computes the next run after `from` (usually the completion time of
    /// the previous attempt).
    ///
    /// The result is the earliest UTC timestamp at or after
    /// `from + interval` that falls on the configured time-of-day, rounded
    /// forward to the next occurrence when the naive `+interval` lands
    /// off-anchor. Without an anchor, it is simply `from + interval`.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let naive = from + ChronoDuration::seconds(self.interval_seconds as i64);
        match self.rotate_at_utc {
            None => naive,
            Some(at) => {
                let candidate = naive
                    .date_naive()
                    .and_hms_opt(at.hour, at.minute, 0)
                    .map(|ndt| Utc.from_utc_datetime(&ndt))
                    .unwrap_or(naive);
                if candidate >= naive {
                    candidate
                } else {
                    candidate + ChronoDuration::days(1)
                }
            }
        }
    }

    /// Checks the schedule fields for sanity.
    pub fn validate(&self) -> crate::Result<()> {
        if self.interval_seconds == 0 {
            return Err(crate::KeyturnError::InvalidParameters(
                "rotation interval must be positive".to_string(),
            ));
        }
        if let Some(at) = self.rotate_at_utc {
            if at.hour > 23 || at.minute > 59 {
                return Err(crate::KeyturnError::InvalidParameters(format!(
                    "invalid rotate-at time {:02}:{:02}",
                    at.hour, at.minute
                )));
            }
        }
        Ok(())
    }
}

impl Default for RotationSchedule {
    fn default() -> Self {
        Self::every_seconds(86_400)
    }
}

/// One slot of the secrets mapping: which named value of the active
/// credential record lands under which destination secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMapping {
    /// Slot name in the credential record (e.g. "username").
    pub slot: String,
    /// Destination secret key (e.g. "DB_USER").
    pub destination: String,
}

impl SecretMapping {
    /// Creates a mapping slot.
    pub fn new(slot: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            destination: destination.into(),
        }
    }
}

/// A configured rotation: the persisted row.
///
/// `generated_credentials` and `last_rotation_message` are sealed blobs and
/// never stored in plaintext; everything else is plain structured data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Stable identifier.
    pub id: RotationId,

    /// Human-readable name, unique across the repository.
    pub name: String,

    /// Rotation kind; selects the connector.
    pub rotation_type: RotationType,

    /// Type-specific parameters, opaque to the orchestrator.
    pub parameters: serde_json::Value,

    /// Ordered slot-to-destination mapping.
    pub secrets_mapping: Vec<SecretMapping>,

    /// Sealed credential set (1 or 2 records).
    pub generated_credentials: SealedBlob,

    /// Index of the active record; denormalized from the sealed set for
    /// inspection without decryption.
    pub active_index: usize,

    /// When false the scheduler never picks this config up.
    pub is_auto_rotation_enabled: bool,

    /// Automatic rotation cadence.
    pub schedule: RotationSchedule,

    /// Status of the most recent attempt.
    pub rotation_status: RotationStatus,

    /// Start time of the most recent attempt.
    pub last_rotation_attempted_at: Option<DateTime<Utc>>,

    /// Completion time of the most recent successful rotation.
    pub last_rotated_at: Option<DateTime<Utc>>,

    /// Next scheduled rotation on the healthy cadence. `None` while an
    /// attempt is running.
    pub next_rotation_at: Option<DateTime<Utc>>,

    /// Next tightened-backoff retry after a retriable failure. Tracked
    /// separately from `next_rotation_at`; the earlier of the two wins.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Failures since the last success; drives exponential backoff.
    pub consecutive_failures: u32,

    /// Sealed failure detail of the most recent failed attempt. Sealed
    /// because driver/system error text may echo credential material.
    pub last_rotation_message: Option<SealedBlob>,

    /// Whether the most recent completed attempt was user-triggered.
    pub is_last_rotation_manual: bool,

    /// Optimistic-lock version, bumped by every repository update.
    pub version: u64,
}

impl RotationConfig {
    /// The earliest instant at which this config is due, considering both
    /// the healthy cadence and any pending retry.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match (self.next_rotation_at, self.next_retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Whether a `Running` status is stale: the attempt started longer than
    /// `stale_after` ago, meaning the holder crashed and its lease expired.
    pub fn is_stale_running(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if self.rotation_status != RotationStatus::Running {
            return false;
        }
        match self.last_rotation_attempted_at {
            // Running with no attempt timestamp is itself corrupt state
            None => true,
            Some(started) => {
                let stale = ChronoDuration::from_std(stale_after)
                    .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));
                now - started > stale
            }
        }
    }
}

/// Caller-provided draft for creating a rotation.
///
/// Use the builder pattern for ergonomic construction:
///
/// ```
/// use keyturn::{RotationDraft, RotationSchedule, RotationType};
///
/// let draft = RotationDraft::new(
///     "orders-db",
///     RotationType::DatabaseCredentials,
///     serde_json::json!({ "host": "db.internal", "database": "orders" }),
/// )
/// .with_mapping("username", "DB_USER")
/// .with_mapping("password", "DB_PASSWORD")
/// .with_schedule(RotationSchedule::daily_at(3, 0));
///
/// assert_eq!(draft.secrets_mapping.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct RotationDraft {
    /// Human-readable name, unique across the repository.
    pub name: String,
    /// Rotation kind.
    pub rotation_type: RotationType,
    /// Type-specific parameters.
    pub parameters: serde_json::Value,
    /// Slot-to-destination mapping.
    pub secrets_mapping: Vec<SecretMapping>,
    /// Automatic rotation cadence (default: daily, unanchored).
    pub schedule: RotationSchedule,
    /// Whether the scheduler picks this rotation up (default: true).
    pub is_auto_rotation_enabled: bool,
}

impl RotationDraft {
    /// Creates a draft with an empty mapping and default schedule.
    pub fn new(
        name: impl Into<String>,
        rotation_type: RotationType,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            rotation_type,
            parameters,
            secrets_mapping: Vec::new(),
            schedule: RotationSchedule::default(),
            is_auto_rotation_enabled: true,
        }
    }

    /// Adds one mapping slot.
    pub fn with_mapping(
        mut self,
        slot: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        self.secrets_mapping.push(SecretMapping::new(slot, destination));
        self
    }

    /// Sets the rotation cadence.
    pub fn with_schedule(mut self, schedule: RotationSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Enables or disables scheduler pickup.
    pub fn with_auto_rotation(mut self, enabled: bool) -> Self {
        self.is_auto_rotation_enabled = enabled;
        self
    }
}

/// Mutable fields of an existing rotation. Credentials and the rotation
/// type are not updatable; they belong to the rotation lifecycle itself.
#[derive(Debug, Clone, Default)]
pub struct RotationUpdate {
    /// New name, if changing.
    pub name: Option<String>,
    /// New cadence, if changing.
    pub schedule: Option<RotationSchedule>,
    /// New mapping, if changing.
    pub secrets_mapping: Option<Vec<SecretMapping>>,
    /// New scheduler-pickup flag, if changing.
    pub is_auto_rotation_enabled: Option<bool>,
}

/// Options for the two-phase deletion flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Revoke both stored credentials at the external system, best-effort.
    pub revoke_credentials: bool,
    /// Remove the mapped destination secrets.
    pub delete_secrets: bool,
}

/// Backoff policy for retriable failures: exponential, capped, and always
/// below the configured rotation interval so retries never outpace the
/// healthy cadence.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First retry delay.
    pub base: Duration,
    /// Upper bound for the exponential growth.
    pub cap: Duration,
}

impl RetryPolicy {
    /// Delay before the next retry given the failure count since the last
    /// success.
    pub fn delay(&self, consecutive_failures: u32, interval: Duration) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.cap).min(interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            cap: Duration::from_secs(3_600),
        }
    }
}

/// Tuning knobs for the orchestrator and trigger surface.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Default per-call connector timeout.
    pub connector_timeout: Duration,
    /// Per-type connector timeout overrides.
    pub connector_timeouts: HashMap<RotationType, Duration>,
    /// Lease TTL for the per-rotation execution lock. Must exceed the
    /// longest expected execution; expiry is the crash-recovery path.
    pub lock_ttl: Duration,
    /// Backoff policy for retriable failures.
    pub retry: RetryPolicy,
    /// Persisted failure messages are truncated to this length before
    /// sealing.
    pub max_message_length: usize,
}

impl EngineOptions {
    /// The connector timeout for a given rotation type.
    pub fn connector_timeout_for(&self, rotation_type: RotationType) -> Duration {
        self.connector_timeouts
            .get(&rotation_type)
            .copied()
            .unwrap_or(self.connector_timeout)
    }

    /// Sets the default connector timeout.
    pub fn with_connector_timeout(mut self, timeout: Duration) -> Self {
        self.connector_timeout = timeout;
        self
    }

    /// Overrides the connector timeout for one rotation type.
    pub fn with_connector_timeout_for(
        mut self,
        rotation_type: RotationType,
        timeout: Duration,
    ) -> Self {
        self.connector_timeouts.insert(rotation_type, timeout);
        self
    }

    /// Sets the execution lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the retry backoff policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            connector_timeout: Duration::from_secs(30),
            connector_timeouts: HashMap::new(),
            lock_ttl: Duration::from_secs(900),
            retry: RetryPolicy::default(),
            max_message_length: 500,
        }
    }
}
