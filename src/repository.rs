//! Durable storage for rotation configurations and execution locks.
//!
//! The [`RotationRepository`] trait is the persistence seam: rows with
//! optimistic versioning, a due-work query for the scheduler, and
//! TTL-leased per-rotation locks that provide cross-process mutual
//! exclusion. The lease - never the `rotation_status` field - is the
//! mutual-exclusion mechanism; expiry on holder death is the crash
//! recovery path.

use crate::clock::{Clock, SystemClock};
use crate::config::{RotationConfig, RotationId};
use crate::{KeyturnError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Token identifying one lock holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner(String);

impl LockOwner {
    /// Generates a fresh random owner token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage backend for rotation rows and execution locks.
///
/// Real deployments back this with a database (`SELECT ... FOR UPDATE SKIP
/// LOCKED`, an advisory lock, or a lease table); [`MemoryRepository`] is
/// the in-process reference implementation. The key lock contract is
/// TTL-bounded ownership with automatic release on holder death, not a
/// specific primitive.
#[async_trait]
pub trait RotationRepository: Send + Sync {
    /// Fetches a row by id.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::NotFound`] if no row exists.
    async fn get(&self, id: &RotationId) -> Result<RotationConfig>;

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::AlreadyExists`] if the id or the name is
    /// already taken.
    async fn insert(&self, config: RotationConfig) -> Result<()>;

    /// Replaces a row, checking the optimistic version carried by
    /// `config`. The stored version is bumped; the updated row is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::VersionConflict`] if the stored version no
    /// longer matches, [`KeyturnError::NotFound`] if the row vanished.
    async fn update(&self, config: RotationConfig) -> Result<RotationConfig>;

    /// Deletes a row. Deleting an absent row is not an error.
    async fn delete(&self, id: &RotationId) -> Result<()>;

    /// Lists all rows.
    async fn list(&self) -> Result<Vec<RotationConfig>>;

    /// Rows eligible for scheduler pickup at `now`: auto-rotation enabled
    /// and due (by cadence or retry), or stuck in `Running` longer than
    /// `stale_after` (crashed holder).
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<RotationConfig>>;

    /// Attempts to take the execution lease for a rotation.
    ///
    /// Returns `false` when another live holder has it - the expected
    /// outcome under multi-instance deployment, not an error. Re-acquiring
    /// with the same owner extends the lease.
    async fn acquire_lock(&self, id: &RotationId, owner: &LockOwner, ttl: Duration)
        -> Result<bool>;

    /// Releases a lease held by `owner`. Releasing a lease held by someone
    /// else (or nobody) is a no-op.
    async fn release_lock(&self, id: &RotationId, owner: &LockOwner) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// In-memory repository for tests and embedded use.
///
/// Leases expire against the injected [`Clock`], so crash recovery
/// (TTL-based auto-release) is testable with a manual clock.
pub struct MemoryRepository {
    rows: RwLock<HashMap<RotationId, RotationConfig>>,
    leases: Mutex<HashMap<RotationId, Lease>>,
    clock: Arc<dyn Clock>,
}

impl MemoryRepository {
    /// Creates an empty repository on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty repository on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RotationRepository for MemoryRepository {
    async fn get(&self, id: &RotationId) -> Result<RotationConfig> {
        let rows = self.rows.read().await;
        rows.get(id)
            .cloned()
            .ok_or_else(|| KeyturnError::NotFound(id.to_string()))
    }

    async fn insert(&self, config: RotationConfig) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&config.id) {
            return Err(KeyturnError::AlreadyExists(config.id.to_string()));
        }
        if rows.values().any(|row| row.name == config.name) {
            return Err(KeyturnError::AlreadyExists(config.name.clone()));
        }
        rows.insert(config.id.clone(), config);
        Ok(())
    }

    async fn update(&self, mut config: RotationConfig) -> Result<RotationConfig> {
        let mut rows = self.rows.write().await;
        let stored = rows
            .get(&config.id)
            .ok_or_else(|| KeyturnError::NotFound(config.id.to_string()))?;

        if stored.version != config.version {
            return Err(KeyturnError::VersionConflict(config.id.to_string()));
        }
        if config.name != stored.name
            && rows
                .values()
                .any(|row| row.id != config.id && row.name == config.name)
        {
            return Err(KeyturnError::AlreadyExists(config.name.clone()));
        }

        config.version += 1;
        rows.insert(config.id.clone(), config.clone());
        Ok(config)
    }

    async fn delete(&self, id: &RotationId) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RotationConfig>> {
        let rows = self.rows.read().await;
        Ok(rows.values().cloned().collect())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<RotationConfig>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| {
                if !row.is_auto_rotation_enabled {
                    return false;
                }
                if row.rotation_status == crate::RotationStatus::Running {
                    return row.is_stale_running(now, stale_after);
                }
                row.due_at().map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn acquire_lock(
        &self,
        id: &RotationId,
        owner: &LockOwner,
        ttl: Duration,
    ) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = now
            + ChronoDuration::from_std(ttl)
                .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));

        let mut leases = self.leases.lock().await;
        match leases.get(id) {
            Some(lease) if lease.expires_at > now && lease.owner != owner.as_str() => Ok(false),
            _ => {
                leases.insert(
                    id.clone(),
                    Lease {
                        owner: owner.as_str().to_string(),
                        expires_at,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, id: &RotationId, owner: &LockOwner) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if let Some(lease) = leases.get(id) {
            if lease.owner == owner.as_str() {
                leases.remove(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::SealedBlob;
    use crate::clock::ManualClock;
    use crate::config::{RotationSchedule, RotationStatus, RotationType};
    use chrono::TimeZone;

    fn sample(name: &str) -> RotationConfig {
        RotationConfig {
            id: RotationId::generate(),
            name: name.to_string(),
            rotation_type: RotationType::CloudIamSecret,
            parameters: serde_json::json!({}),
            secrets_mapping: vec![],
            generated_credentials: SealedBlob::new(vec![0u8; 16]),
            active_index: 0,
            is_auto_rotation_enabled: true,
            schedule: RotationSchedule::default(),
            rotation_status: RotationStatus::Succeeded,
            last_rotation_attempted_at: None,
            last_rotated_at: None,
            next_rotation_at: None,
            next_retry_at: None,
            consecutive_failures: 0,
            last_rotation_message: None,
            is_last_rotation_manual: false,
            version: 0,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let repo = MemoryRepository::new();
        let config = sample("orders-db");
        let id = config.id.clone();

        repo.insert(config).await.unwrap();
        assert_eq!(repo.get(&id).await.unwrap().name, "orders-db");

        repo.delete(&id).await.unwrap();
        assert!(matches!(
            repo.get(&id).await,
            Err(KeyturnError::NotFound(_))
        ));
        // idempotent delete
        repo.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let repo = MemoryRepository::new();
        repo.insert(sample("orders-db")).await.unwrap();

        let result = repo.insert(sample("orders-db")).await;
        assert!(matches!(result, Err(KeyturnError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_detects_conflicts() {
        let repo = MemoryRepository::new();
        let config = sample("orders-db");
        repo.insert(config.clone()).await.unwrap();

        let updated = repo.update(config.clone()).await.unwrap();
        assert_eq!(updated.version, 1);

        // a second writer still holding version 0 loses
        let result = repo.update(config).await;
        assert!(matches!(result, Err(KeyturnError::VersionConflict(_))));
    }

    #[tokio::test]
    async fn test_list_due_predicates() {
        let now = start();
        let repo = MemoryRepository::new();
        let stale_after = Duration::from_secs(900);

        let mut due = sample("due");
        due.next_rotation_at = Some(now - ChronoDuration::seconds(5));
        repo.insert(due).await.unwrap();

        let mut due_by_retry = sample("due-by-retry");
        due_by_retry.next_rotation_at = Some(now + ChronoDuration::days(1));
        due_by_retry.next_retry_at = Some(now - ChronoDuration::seconds(5));
        repo.insert(due_by_retry).await.unwrap();

        let mut not_due = sample("not-due");
        not_due.next_rotation_at = Some(now + ChronoDuration::days(1));
        repo.insert(not_due).await.unwrap();

        let mut disabled = sample("disabled");
        disabled.is_auto_rotation_enabled = false;
        disabled.next_rotation_at = Some(now - ChronoDuration::seconds(5));
        repo.insert(disabled).await.unwrap();

        let mut running_fresh = sample("running-fresh");
        running_fresh.rotation_status = RotationStatus::Running;
        running_fresh.last_rotation_attempted_at = Some(now - ChronoDuration::seconds(10));
        repo.insert(running_fresh).await.unwrap();

        let mut running_stale = sample("running-stale");
        running_stale.rotation_status = RotationStatus::Running;
        running_stale.last_rotation_attempted_at = Some(now - ChronoDuration::seconds(2_000));
        repo.insert(running_stale).await.unwrap();

        let due_rows = repo.list_due(now, stale_after).await.unwrap();
        let mut names: Vec<_> = due_rows.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["due", "due-by-retry", "running-stale"]);
    }

    #[tokio::test]
    async fn test_lock_mutual_exclusion() {
        let repo = MemoryRepository::new();
        let id = RotationId::generate();
        let first = LockOwner::generate();
        let second = LockOwner::generate();
        let ttl = Duration::from_secs(60);

        assert!(repo.acquire_lock(&id, &first, ttl).await.unwrap());
        assert!(!repo.acquire_lock(&id, &second, ttl).await.unwrap());

        // re-acquiring with the same owner extends, not fails
        assert!(repo.acquire_lock(&id, &first, ttl).await.unwrap());

        repo.release_lock(&id, &first).await.unwrap();
        assert!(repo.acquire_lock(&id, &second, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_no_op() {
        let repo = MemoryRepository::new();
        let id = RotationId::generate();
        let holder = LockOwner::generate();
        let other = LockOwner::generate();
        let ttl = Duration::from_secs(60);

        assert!(repo.acquire_lock(&id, &holder, ttl).await.unwrap());
        repo.release_lock(&id, &other).await.unwrap();

        // the lease is still held
        assert!(!repo.acquire_lock(&id, &other, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_expiry_releases_dead_holder() {
        let clock = Arc::new(ManualClock::new(start()));
        let repo = MemoryRepository::with_clock(clock.clone());
        let id = RotationId::generate();
        let dead = LockOwner::generate();
        let successor = LockOwner::generate();

        assert!(repo
            .acquire_lock(&id, &dead, Duration::from_secs(60))
            .await
            .unwrap());
        // holder dies without releasing; lease expires
        clock.advance(ChronoDuration::seconds(61));

        assert!(repo
            .acquire_lock(&id, &successor, Duration::from_secs(60))
            .await
            .unwrap());
    }
}
