//! The rotation trigger surface exposed to callers.
//!
//! [`RotationEngine`] owns the collaborators (repository, connector
//! registry, cipher, secrets writer, clock) and exposes the operations an
//! API layer calls: create (with the synchronous first issuance), manual
//! rotation, reconciliation, update, two-phase deletion, reads, and
//! decrypt-on-demand of the sealed failure message.

use crate::cipher::Cipher;
use crate::clock::{Clock, SystemClock};
use crate::config::{
    DeleteOptions, EngineOptions, RotationConfig, RotationDraft, RotationId, RotationStatus,
    RotationUpdate, SecretMapping,
};
use crate::connector::{ConnectorRegistry, IssueContext};
use crate::mapping::{ensure_covers, SecretsMappingWriter};
use crate::orchestrator::{ReconcileOutcome, RotationOrchestrator, Trigger};
use crate::record::CredentialSet;
use crate::repository::{LockOwner, RotationRepository};
use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerOptions};
use crate::validation::validate_name;
use crate::{KeyturnError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the rotation subsystem and exposes its trigger surface.
///
/// # Example
///
/// ```no_run
/// use keyturn::{
///     AesGcmCipher, ConnectorRegistry, MemoryRepository, MemorySecretStore, RotationDraft,
///     RotationEngine, RotationSchedule, RotationType,
/// };
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> keyturn::Result<()> {
///     let engine = RotationEngine::new(
///         Arc::new(MemoryRepository::new()),
///         Arc::new(ConnectorRegistry::builtin()),
///         Arc::new(AesGcmCipher::generate()),
///         Arc::new(MemorySecretStore::new()),
///     );
///
///     let draft = RotationDraft::new(
///         "orders-db",
///         RotationType::DatabaseCredentials,
///         serde_json::json!({
///             "host": "db.internal", "database": "orders",
///             "admin_username": "rotation_admin", "admin_password": "...",
///             "username1": "app_user_1", "username2": "app_user_2",
///         }),
///     )
///     .with_mapping("username", "DB_USER")
///     .with_mapping("password", "DB_PASSWORD")
///     .with_schedule(RotationSchedule::daily_at(3, 0));
///
///     let rotation = engine.create_rotation(draft).await?;
///     engine.rotate_now(&rotation.id).await?;
///     Ok(())
/// }
/// ```
pub struct RotationEngine {
    repository: Arc<dyn RotationRepository>,
    connectors: Arc<ConnectorRegistry>,
    cipher: Arc<dyn Cipher>,
    secrets: Arc<dyn SecretsMappingWriter>,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
    orchestrator: Arc<RotationOrchestrator>,
}

impl RotationEngine {
    /// Creates an engine on the system clock with default options.
    pub fn new(
        repository: Arc<dyn RotationRepository>,
        connectors: Arc<ConnectorRegistry>,
        cipher: Arc<dyn Cipher>,
        secrets: Arc<dyn SecretsMappingWriter>,
    ) -> Self {
        Self::build(
            repository,
            connectors,
            cipher,
            secrets,
            Arc::new(SystemClock),
            EngineOptions::default(),
        )
    }

    /// Replaces the clock (primarily for tests).
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::build(
            self.repository,
            self.connectors,
            self.cipher,
            self.secrets,
            clock,
            self.options,
        )
    }

    /// Replaces the engine options.
    pub fn with_options(self, options: EngineOptions) -> Self {
        Self::build(
            self.repository,
            self.connectors,
            self.cipher,
            self.secrets,
            self.clock,
            options,
        )
    }

    fn build(
        repository: Arc<dyn RotationRepository>,
        connectors: Arc<ConnectorRegistry>,
        cipher: Arc<dyn Cipher>,
        secrets: Arc<dyn SecretsMappingWriter>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Self {
        let orchestrator = Arc::new(RotationOrchestrator::new(
            repository.clone(),
            connectors.clone(),
            cipher.clone(),
            secrets.clone(),
            clock.clone(),
            options.clone(),
        ));
        Self {
            repository,
            connectors,
            cipher,
            secrets,
            clock,
            options,
            orchestrator,
        }
    }

    /// The orchestrator backing this engine, for wiring a [`Scheduler`].
    pub fn orchestrator(&self) -> Arc<RotationOrchestrator> {
        self.orchestrator.clone()
    }

    /// Starts a scheduler over this engine's collaborators and returns its
    /// lifecycle handle.
    pub fn start_scheduler(&self, options: SchedulerOptions) -> SchedulerHandle {
        Scheduler::new(
            self.orchestrator.clone(),
            self.repository.clone(),
            self.clock.clone(),
            options,
        )
        .start()
    }

    /// Creates a rotation, performing the first issuance synchronously.
    ///
    /// Nothing is persisted if validation, issuance, or the initial secret
    /// write fails: a config row never exists without at least one stored
    /// credential.
    pub async fn create_rotation(&self, draft: RotationDraft) -> Result<RotationConfig> {
        validate_name(&draft.name)?;
        draft.schedule.validate()?;
        validate_mapping(&draft.secrets_mapping)?;

        let connector = self.connectors.get(draft.rotation_type)?;
        connector.validate_parameters(&draft.parameters)?;

        let timeout = self.options.connector_timeout_for(draft.rotation_type);
        let record = tokio::time::timeout(
            timeout,
            connector.issue(&draft.parameters, IssueContext::empty()),
        )
        .await
        .map_err(|_| KeyturnError::Transient(format!("issue timed out after {:?}", timeout)))?
        .map_err(KeyturnError::from)?;

        ensure_covers(&draft.secrets_mapping, &record)?;

        self.secrets
            .write(&draft.secrets_mapping, &record)
            .await
            .map_err(|err| KeyturnError::ApplyFailure(err.to_string()))?;

        let set = CredentialSet::first(record);
        let sealed = set.seal(self.cipher.as_ref()).await?;
        let now = self.clock.now();

        let config = RotationConfig {
            id: RotationId::generate(),
            name: draft.name,
            rotation_type: draft.rotation_type,
            parameters: draft.parameters,
            secrets_mapping: draft.secrets_mapping,
            generated_credentials: sealed,
            active_index: set.active_index(),
            is_auto_rotation_enabled: draft.is_auto_rotation_enabled,
            schedule: draft.schedule,
            rotation_status: RotationStatus::Succeeded,
            last_rotation_attempted_at: Some(now),
            last_rotated_at: Some(now),
            next_rotation_at: Some(draft.schedule.next_after(now)),
            next_retry_at: None,
            consecutive_failures: 0,
            last_rotation_message: None,
            is_last_rotation_manual: true,
            version: 0,
        };

        self.repository.insert(config.clone()).await?;
        info!(
            rotation_id = %config.id,
            rotation_type = %config.rotation_type,
            name = %config.name,
            "created rotation with initial credential"
        );
        Ok(config)
    }

    /// Runs a rotation attempt immediately.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::AlreadyRunning`] if another execution
    /// (manual or scheduled, in any process) holds the lock.
    pub async fn rotate_now(&self, id: &RotationId) -> Result<RotationConfig> {
        let owner = LockOwner::generate();
        if !self
            .repository
            .acquire_lock(id, &owner, self.options.lock_ttl)
            .await?
        {
            return Err(KeyturnError::AlreadyRunning(id.to_string()));
        }

        let result = self.orchestrator.execute(id, Trigger::Manual).await;
        self.release(id, &owner).await;
        result
    }

    /// Repairs drift between the stored active credential and the target
    /// system, without issuing a new credential.
    pub async fn reconcile(&self, id: &RotationId) -> Result<ReconcileOutcome> {
        let owner = LockOwner::generate();
        if !self
            .repository
            .acquire_lock(id, &owner, self.options.lock_ttl)
            .await?
        {
            return Err(KeyturnError::AlreadyRunning(id.to_string()));
        }

        let result = self.orchestrator.reconcile(id).await;
        self.release(id, &owner).await;
        result
    }

    /// Updates the mutable fields of a rotation.
    ///
    /// A mapping change rewrites the destinations from the active record
    /// and removes destinations dropped from the mapping; a schedule change
    /// recomputes the next run from the last successful rotation.
    pub async fn update_rotation(
        &self,
        id: &RotationId,
        update: RotationUpdate,
    ) -> Result<RotationConfig> {
        let owner = LockOwner::generate();
        if !self
            .repository
            .acquire_lock(id, &owner, self.options.lock_ttl)
            .await?
        {
            return Err(KeyturnError::AlreadyRunning(id.to_string()));
        }

        let result = self.apply_update(id, update).await;
        self.release(id, &owner).await;
        result
    }

    async fn apply_update(&self, id: &RotationId, update: RotationUpdate) -> Result<RotationConfig> {
        let mut config = self.repository.get(id).await?;

        if let Some(name) = update.name {
            validate_name(&name)?;
            config.name = name;
        }

        if let Some(schedule) = update.schedule {
            schedule.validate()?;
            config.schedule = schedule;
            let base = config.last_rotated_at.unwrap_or_else(|| self.clock.now());
            config.next_rotation_at = Some(schedule.next_after(base));
        }

        if let Some(mapping) = update.secrets_mapping {
            validate_mapping(&mapping)?;

            let set =
                CredentialSet::open(&config.generated_credentials, self.cipher.as_ref()).await?;
            ensure_covers(&mapping, set.active_record())?;
            self.secrets.write(&mapping, set.active_record()).await?;

            let dropped: Vec<SecretMapping> = config
                .secrets_mapping
                .iter()
                .filter(|old| {
                    !mapping
                        .iter()
                        .any(|new| new.destination == old.destination)
                })
                .cloned()
                .collect();
            if !dropped.is_empty() {
                if let Err(error) = self.secrets.remove(&dropped).await {
                    warn!(rotation_id = %id, %error, "failed to remove dropped mapping destinations");
                }
            }

            config.secrets_mapping = mapping;
        }

        if let Some(enabled) = update.is_auto_rotation_enabled {
            config.is_auto_rotation_enabled = enabled;
        }

        self.repository.update(config).await
    }

    /// Deletes a rotation.
    ///
    /// With `revoke_credentials`, both stored generations are revoked at
    /// the external system first, best-effort: revoke failures are logged
    /// and never block deletion. With `delete_secrets`, the mapped
    /// destination secrets are removed. Row deletion itself is
    /// unconditional once requested.
    pub async fn delete_rotation(&self, id: &RotationId, options: DeleteOptions) -> Result<()> {
        let owner = LockOwner::generate();
        if !self
            .repository
            .acquire_lock(id, &owner, self.options.lock_ttl)
            .await?
        {
            return Err(KeyturnError::AlreadyRunning(id.to_string()));
        }

        let result = self.apply_delete(id, options).await;
        self.release(id, &owner).await;
        result
    }

    async fn apply_delete(&self, id: &RotationId, options: DeleteOptions) -> Result<()> {
        let config = self.repository.get(id).await?;

        if options.revoke_credentials {
            match CredentialSet::open(&config.generated_credentials, self.cipher.as_ref()).await {
                Ok(set) => match self.connectors.get(config.rotation_type) {
                    Ok(connector) => {
                        let revocations = set
                            .records()
                            .iter()
                            .map(|record| connector.revoke(&config.parameters, record));
                        for outcome in futures::future::join_all(revocations).await {
                            if let Err(error) = outcome {
                                warn!(rotation_id = %id, %error, "best-effort revoke failed during deletion");
                            }
                        }
                    }
                    Err(error) => {
                        warn!(rotation_id = %id, %error, "cannot revoke credentials during deletion");
                    }
                },
                Err(error) => {
                    warn!(rotation_id = %id, %error, "cannot open stored credentials for revocation");
                }
            }
        }

        if options.delete_secrets {
            if let Err(error) = self.secrets.remove(&config.secrets_mapping).await {
                warn!(rotation_id = %id, %error, "failed to remove mapped secrets during deletion");
            }
        }

        self.repository.delete(id).await?;
        info!(rotation_id = %id, "deleted rotation");
        Ok(())
    }

    /// Fetches a rotation by id.
    pub async fn get(&self, id: &RotationId) -> Result<RotationConfig> {
        self.repository.get(id).await
    }

    /// Lists all rotations.
    pub async fn list(&self) -> Result<Vec<RotationConfig>> {
        self.repository.list().await
    }

    /// Opens the sealed failure message of the most recent failed attempt,
    /// if any. This is the decrypt-on-demand path for authorized
    /// operators; the raw message is never exposed unsealed anywhere else.
    pub async fn last_rotation_message(&self, id: &RotationId) -> Result<Option<String>> {
        let config = self.repository.get(id).await?;
        match config.last_rotation_message {
            None => Ok(None),
            Some(blob) => {
                let bytes = self.cipher.open(&blob).await?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    KeyturnError::Fatal("sealed rotation message is not valid UTF-8".to_string())
                })?;
                Ok(Some(text))
            }
        }
    }

    async fn release(&self, id: &RotationId, owner: &LockOwner) {
        if let Err(error) = self.repository.release_lock(id, owner).await {
            warn!(rotation_id = %id, %error, "failed to release execution lock");
        }
    }
}

fn validate_mapping(mapping: &[SecretMapping]) -> Result<()> {
    if mapping.is_empty() {
        return Err(KeyturnError::InvalidMapping(
            "at least one slot must be mapped".to_string(),
        ));
    }

    let mut destinations = HashSet::new();
    for entry in mapping {
        validate_name(&entry.slot)?;
        validate_name(&entry.destination)?;
        if !destinations.insert(entry.destination.as_str()) {
            return Err(KeyturnError::InvalidMapping(format!(
                "duplicate destination key '{}'",
                entry.destination
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use crate::cipher::AesGcmCipher;
    use crate::clock::ManualClock;
    use crate::config::{RotationSchedule, RotationType};
    use crate::connector::ConnectorError;
    use crate::connectors::mock::MockConnector;
    use crate::mapping::MemorySecretStore;
    use crate::record::CredentialRecord;
    use crate::repository::MemoryRepository;
    use chrono::{TimeZone, Utc};

    struct Stack {
        engine: RotationEngine,
        connector: Arc<MockConnector>,
        secrets: Arc<MemorySecretStore>,
        clock: Arc<ManualClock>,
    }

    fn stack() -> Stack {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap(),
        ));
        let repository = Arc::new(MemoryRepository::with_clock(clock.clone()));
        let connector = Arc::new(MockConnector::new(RotationType::CloudIamSecret));
        let registry = Arc::new(ConnectorRegistry::new());
        registry.register(connector.clone());
        let secrets = Arc::new(MemorySecretStore::new());

        let engine = RotationEngine::new(
            repository,
            registry,
            Arc::new(AesGcmCipher::generate()),
            secrets.clone(),
        )
        .with_clock(clock.clone());

        Stack {
            engine,
            connector,
            secrets,
            clock,
        }
    }

    fn draft(name: &str) -> RotationDraft {
        RotationDraft::new(name, RotationType::CloudIamSecret, serde_json::json!({}))
            .with_mapping("username", "SVC_USER")
            .with_mapping("password", "SVC_PASSWORD")
            .with_schedule(RotationSchedule::daily_at(3, 0))
    }

    #[tokio::test]
    async fn test_create_rotation_performs_first_issuance() {
        let s = stack();

        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        assert_eq!(config.rotation_status, RotationStatus::Succeeded);
        assert_eq!(config.active_index, 0);
        assert!(config.is_last_rotation_manual);
        assert_eq!(
            config.next_rotation_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap())
        );
        assert_eq!(
            s.secrets.value("SVC_PASSWORD").await.as_deref(),
            Some("generated-1")
        );
        // first-ever issuance has no prior context
        let ctx = s.connector.last_issue_context().unwrap();
        assert!(ctx.active.is_none());
        assert!(ctx.inactive.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let s = stack();
        s.engine.create_rotation(draft("iam-service")).await.unwrap();

        let result = s.engine.create_rotation(draft("iam-service")).await;
        assert!(matches!(result, Err(KeyturnError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_create_failure_persists_nothing() {
        let s = stack();
        s.connector
            .fail_issue(ConnectorError::permanent("policy rejected"));

        let result = s.engine.create_rotation(draft("iam-service")).await;
        assert!(result.is_err());
        assert!(s.engine.list().await.unwrap().is_empty());
        assert!(s.secrets.value("SVC_PASSWORD").await.is_none());
    }

    #[tokio::test]
    async fn test_create_validates_draft() {
        let s = stack();

        let no_mapping = RotationDraft::new(
            "no-mapping",
            RotationType::CloudIamSecret,
            serde_json::json!({}),
        );
        assert!(matches!(
            s.engine.create_rotation(no_mapping).await,
            Err(KeyturnError::InvalidMapping(_))
        ));

        let dup = draft("dup").with_mapping("username", "SVC_USER");
        assert!(matches!(
            s.engine.create_rotation(dup).await,
            Err(KeyturnError::InvalidMapping(_))
        ));

        let bad_name = draft("bad; rm -rf /");
        assert!(matches!(
            s.engine.create_rotation(bad_name).await,
            Err(KeyturnError::InvalidName(_))
        ));

        let unknown = RotationDraft::new(
            "unknown-type",
            RotationType::OauthClientSecret,
            serde_json::json!({}),
        )
        .with_mapping("secret", "CLIENT_SECRET");
        assert!(matches!(
            s.engine.create_rotation(unknown).await,
            Err(KeyturnError::UnknownConnector(_))
        ));
    }

    #[tokio::test]
    async fn test_rotate_now_swaps_generations() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        let rotated = s.engine.rotate_now(&config.id).await.unwrap();

        assert_eq!(rotated.active_index, 1);
        assert!(rotated.is_last_rotation_manual);
        assert_eq!(
            s.secrets.value("SVC_PASSWORD").await.as_deref(),
            Some("generated-2")
        );
    }

    #[tokio::test]
    async fn test_concurrent_rotate_now_single_flight() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        // hold the winning execution in flight so the race is real
        s.connector.delay_issue(std::time::Duration::from_millis(50));

        let (first, second) =
            futures::join!(s.engine.rotate_now(&config.id), s.engine.rotate_now(&config.id));

        let failures: Vec<bool> = [&first, &second]
            .iter()
            .map(|result| result.is_err())
            .collect();
        // exactly one of the two racing calls is rejected
        assert_eq!(failures.iter().filter(|failed| **failed).count(), 1);

        let rejected = if first.is_err() { first.unwrap_err() } else { second.unwrap_err() };
        assert!(matches!(rejected, KeyturnError::AlreadyRunning(_)));

        // and exactly one issuance happened beyond the creation one
        assert_eq!(s.connector.issued().len(), 2);
    }

    #[tokio::test]
    async fn test_last_rotation_message_round_trip() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        assert_eq!(s.engine.last_rotation_message(&config.id).await.unwrap(), None);

        s.connector
            .fail_issue(ConnectorError::transient("FATAL: password authentication failed"));
        s.engine.rotate_now(&config.id).await.unwrap_err();

        let message = s
            .engine
            .last_rotation_message(&config.id)
            .await
            .unwrap()
            .unwrap();
        assert!(message.contains("password authentication failed"));

        // the stored row itself only carries sealed bytes
        let stored = s.engine.get(&config.id).await.unwrap();
        let sealed = stored.last_rotation_message.unwrap();
        assert!(!String::from_utf8_lossy(sealed.as_bytes()).contains("password"));
    }

    #[tokio::test]
    async fn test_update_rotation_mapping_and_schedule() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        let update = RotationUpdate {
            name: Some("iam-service-v2".to_string()),
            schedule: Some(RotationSchedule::daily_at(6, 30)),
            secrets_mapping: Some(vec![SecretMapping::new("password", "SVC_TOKEN")]),
            is_auto_rotation_enabled: Some(false),
        };
        let updated = s.engine.update_rotation(&config.id, update).await.unwrap();

        assert_eq!(updated.name, "iam-service-v2");
        assert!(!updated.is_auto_rotation_enabled);
        assert_eq!(
            updated.next_rotation_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 6, 30, 0).unwrap())
        );

        // new destination written from the active record, dropped ones removed
        assert_eq!(
            s.secrets.value("SVC_TOKEN").await.as_deref(),
            Some("generated-1")
        );
        assert!(s.secrets.value("SVC_USER").await.is_none());
        assert!(s.secrets.value("SVC_PASSWORD").await.is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_uncovered_mapping() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        let update = RotationUpdate {
            secrets_mapping: Some(vec![SecretMapping::new("token", "SVC_TOKEN")]),
            ..RotationUpdate::default()
        };
        let result = s.engine.update_rotation(&config.id, update).await;
        assert!(matches!(result, Err(KeyturnError::InvalidMapping(_))));
    }

    #[tokio::test]
    async fn test_delete_rotation_revokes_and_removes() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();
        s.engine.rotate_now(&config.id).await.unwrap();

        s.engine
            .delete_rotation(
                &config.id,
                DeleteOptions {
                    revoke_credentials: true,
                    delete_secrets: true,
                },
            )
            .await
            .unwrap();

        // both generations revoked at the target
        assert_eq!(s.connector.revoked().len(), 2);
        // mapped secrets removed
        assert!(s.secrets.value("SVC_USER").await.is_none());
        assert!(s.secrets.value("SVC_PASSWORD").await.is_none());
        // row gone
        assert!(matches!(
            s.engine.get(&config.id).await,
            Err(KeyturnError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_without_flags_leaves_external_state() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        s.engine
            .delete_rotation(&config.id, DeleteOptions::default())
            .await
            .unwrap();

        // caller opted out of both phases: credentials and secrets remain
        assert!(s.connector.revoked().is_empty());
        assert_eq!(
            s.secrets.value("SVC_PASSWORD").await.as_deref(),
            Some("generated-1")
        );
    }

    #[tokio::test]
    async fn test_delete_proceeds_when_revoke_fails() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();
        s.connector
            .fail_revoke(ConnectorError::transient("target unreachable"));

        s.engine
            .delete_rotation(
                &config.id,
                DeleteOptions {
                    revoke_credentials: true,
                    delete_secrets: false,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            s.engine.get(&config.id).await,
            Err(KeyturnError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_via_engine() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();

        let drifted = CredentialRecord::from([("username", "svc-user"), ("password", "oob")]);
        s.connector.set_live(drifted);

        let outcome = s.engine.reconcile(&config.id).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(s.secrets.value("SVC_PASSWORD").await.as_deref(), Some("oob"));

        let outcome = s.engine.reconcile(&config.id).await.unwrap();
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_clock_is_injected_not_ambient() {
        let s = stack();
        let config = s.engine.create_rotation(draft("iam-service")).await.unwrap();
        assert_eq!(config.last_rotated_at, Some(s.clock.now()));
    }
}
