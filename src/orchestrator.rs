//! End-to-end execution of one rotation attempt.
//!
//! The orchestrator drives the per-execution state machine
//! `Idle -> Running -> {Succeeded, Failed}`: mark running, issue at the
//! target, compute the dual-slot swap, apply the mapping to the secret
//! store, persist. The secret store is only updated after issuance
//! succeeds, so a crash at any step leaves the previously active
//! credential fully valid and still referenced by the mapped secrets.
//!
//! Callers must hold the per-rotation execution lock for the duration of a
//! call; the orchestrator itself never locks. The `rotation_status` field
//! is bookkeeping, not mutual exclusion.

use crate::cipher::Cipher;
use crate::clock::Clock;
use crate::config::{EngineOptions, RotationConfig, RotationId, RotationStatus};
use crate::connector::{ConnectorRegistry, IssueContext, LiveStatus};
use crate::mapping::{ensure_covers, SecretsMappingWriter};
use crate::record::CredentialSet;
use crate::repository::RotationRepository;
use crate::{KeyturnError, Result};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tracing::{info, warn};

/// What started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Picked up by the scheduler.
    Scheduled,
    /// Requested by a caller through the trigger surface.
    Manual,
}

impl Trigger {
    fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Whether the stored record and mapped secrets were repaired.
    pub changed: bool,
}

/// Executes rotation attempts and reconciliation passes.
pub struct RotationOrchestrator {
    repository: Arc<dyn RotationRepository>,
    connectors: Arc<ConnectorRegistry>,
    cipher: Arc<dyn Cipher>,
    secrets: Arc<dyn SecretsMappingWriter>,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
}

impl RotationOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        repository: Arc<dyn RotationRepository>,
        connectors: Arc<ConnectorRegistry>,
        cipher: Arc<dyn Cipher>,
        secrets: Arc<dyn SecretsMappingWriter>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Self {
        Self {
            repository,
            connectors,
            cipher,
            secrets,
            clock,
            options,
        }
    }

    /// Runs one rotation attempt end-to-end.
    ///
    /// The caller must hold the execution lock for `id`. On failure the
    /// attempt is persisted as `Failed` with a sealed message and the
    /// classified error is returned; the stored credential set and mapped
    /// secrets are only ever replaced together on success.
    pub async fn execute(&self, id: &RotationId, trigger: Trigger) -> Result<RotationConfig> {
        let config = self.repository.get(id).await?;
        let connector = self.connectors.get(config.rotation_type)?;
        let started_at = self.clock.now();

        info!(
            rotation_id = %id,
            rotation_type = %config.rotation_type,
            trigger = ?trigger,
            "starting rotation attempt"
        );

        // Step 1: durable "attempt started" marker.
        let mut config = config;
        config.rotation_status = RotationStatus::Running;
        config.last_rotation_attempted_at = Some(started_at);
        config.next_rotation_at = None;
        let config = self.repository.update(config).await?;

        let set = match CredentialSet::open(&config.generated_credentials, self.cipher.as_ref())
            .await
        {
            Ok(set) => set,
            Err(err) => return self.finish_failed(config, trigger, err).await,
        };

        // Step 2: issue a new credential. The active one stays valid.
        let timeout = self.options.connector_timeout_for(config.rotation_type);
        let issued = tokio::time::timeout(
            timeout,
            connector.issue(
                &config.parameters,
                IssueContext {
                    active: Some(set.active_record()),
                    inactive: set.inactive_record(),
                },
            ),
        )
        .await;

        let new_record = match issued {
            Err(_) => {
                let err =
                    KeyturnError::Transient(format!("issue timed out after {:?}", timeout));
                return self.finish_failed(config, trigger, err).await;
            }
            Ok(Err(connector_err)) => {
                return self.finish_failed(config, trigger, connector_err.into()).await;
            }
            Ok(Ok(record)) => record,
        };

        if let Err(err) = ensure_covers(&config.secrets_mapping, &new_record) {
            return self.finish_failed(config, trigger, err).await;
        }

        // Step 3: compute the swap. The previously active record stays in
        // the set, now inactive, until the next successful rotation.
        let next_set = set.advance(new_record.clone());
        let sealed = match next_set.seal(self.cipher.as_ref()).await {
            Ok(blob) => blob,
            Err(err) => return self.finish_failed(config, trigger, err).await,
        };

        // Step 4: apply the new values to the secret store. On failure the
        // stored set is left untouched: the old values remain live and
        // correct, and the freshly issued credential is deliberately left
        // valid at the target to be reused or superseded next attempt.
        if let Err(err) = self.secrets.write(&config.secrets_mapping, &new_record).await {
            let err = KeyturnError::ApplyFailure(err.to_string());
            return self.finish_failed(config, trigger, err).await;
        }

        // Step 5: persist the new state and advance the cadence.
        let finished_at = self.clock.now();
        let mut config = config;
        config.generated_credentials = sealed;
        config.active_index = next_set.active_index();
        config.rotation_status = RotationStatus::Succeeded;
        config.last_rotated_at = Some(finished_at);
        config.is_last_rotation_manual = trigger.is_manual();
        config.next_rotation_at = Some(config.schedule.next_after(finished_at));
        config.next_retry_at = None;
        config.consecutive_failures = 0;
        config.last_rotation_message = None;
        let config = self.repository.update(config).await?;

        info!(
            rotation_id = %id,
            active_index = config.active_index,
            next_rotation_at = ?config.next_rotation_at,
            "rotation succeeded"
        );
        Ok(config)
    }

    /// Repairs drift between the stored active record and what the target
    /// system actually honors, without issuing a new credential.
    ///
    /// Shares the swap/persist/map steps with [`execute`](Self::execute)
    /// but skips issuance, and does not touch the rotation cadence or
    /// status bookkeeping. The caller must hold the execution lock.
    pub async fn reconcile(&self, id: &RotationId) -> Result<ReconcileOutcome> {
        let config = self.repository.get(id).await?;
        let connector = self.connectors.get(config.rotation_type)?;

        if !connector.supports_test() {
            return Err(KeyturnError::NotSupported(format!(
                "connector for {} cannot test credentials",
                config.rotation_type
            )));
        }

        let set = CredentialSet::open(&config.generated_credentials, self.cipher.as_ref()).await?;

        let timeout = self.options.connector_timeout_for(config.rotation_type);
        let status = tokio::time::timeout(
            timeout,
            connector.test(&config.parameters, set.active_record()),
        )
        .await
        .map_err(|_| KeyturnError::Transient(format!("test timed out after {:?}", timeout)))?
        .map_err(KeyturnError::from)?;

        let live_record = match status {
            LiveStatus::Valid => {
                return Ok(ReconcileOutcome { changed: false });
            }
            LiveStatus::Divergent(live) => live,
        };

        ensure_covers(&config.secrets_mapping, &live_record)?;

        let repaired = set.replace_active(live_record.clone());
        let sealed = repaired.seal(self.cipher.as_ref()).await?;

        self.secrets
            .write(&config.secrets_mapping, &live_record)
            .await
            .map_err(|err| KeyturnError::ApplyFailure(err.to_string()))?;

        let mut config = config;
        config.generated_credentials = sealed;
        config.active_index = repaired.active_index();
        self.repository.update(config).await?;

        info!(rotation_id = %id, "reconciled drifted credential");
        Ok(ReconcileOutcome { changed: true })
    }

    /// Persists a failed attempt and returns the original error.
    async fn finish_failed(
        &self,
        mut config: RotationConfig,
        trigger: Trigger,
        err: KeyturnError,
    ) -> Result<RotationConfig> {
        let now = self.clock.now();
        let retriable = err.is_retriable();

        // A fatal error's message may describe corrupt payload internals;
        // persist a generic message instead.
        let message = if matches!(err, KeyturnError::Fatal(_)) {
            "internal error during rotation".to_string()
        } else {
            truncate_chars(&err.to_string(), self.options.max_message_length)
        };

        config.last_rotation_message = match self.cipher.seal(message.as_bytes()).await {
            Ok(blob) => Some(blob),
            Err(seal_err) => {
                warn!(rotation_id = %config.id, error = %seal_err, "failed to seal rotation message");
                None
            }
        };

        config.rotation_status = RotationStatus::Failed;
        config.is_last_rotation_manual = trigger.is_manual();
        config.consecutive_failures = config.consecutive_failures.saturating_add(1);
        // The schedule keeps trying on the normal cadence even after a
        // permanent failure; only retriable failures also get the
        // tightened retry slot.
        config.next_rotation_at = Some(config.schedule.next_after(now));
        config.next_retry_at = if retriable {
            let delay = self
                .options
                .retry
                .delay(config.consecutive_failures, config.schedule.interval());
            let delay = ChronoDuration::from_std(delay)
                .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));
            Some(now + delay)
        } else {
            None
        };

        self.repository.update(config.clone()).await?;

        warn!(
            rotation_id = %config.id,
            retriable,
            consecutive_failures = config.consecutive_failures,
            error = %err,
            "rotation attempt failed"
        );
        Err(err)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
