//! Polling scheduler for automatic rotations.
//!
//! The scheduler periodically queries the repository for due rotations,
//! takes the per-rotation execution lease, and dispatches to the
//! orchestrator on a bounded worker pool. Multiple scheduler instances may
//! run concurrently against the same repository; losing a lease race is
//! an expected outcome, not an error. Pool exhaustion delays pickup to a
//! later tick and never blocks the polling loop.

use crate::clock::Clock;
use crate::orchestrator::{RotationOrchestrator, Trigger};
use crate::repository::{LockOwner, RotationRepository};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning knobs for the scheduler lifecycle.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Polling interval.
    pub tick_interval: Duration,
    /// Maximum concurrent executions per process.
    pub worker_pool_size: usize,
    /// Lease TTL for execution locks taken by this scheduler.
    pub lock_ttl: Duration,
    /// A `Running` row older than this is treated as a crashed holder and
    /// re-queued.
    pub stale_execution_after: Duration,
    /// How long `shutdown` waits for in-flight executions to drain before
    /// hard-stopping them.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            worker_pool_size: 8,
            lock_ttl: Duration::from_secs(900),
            stale_execution_after: Duration::from_secs(900),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Finds due rotations and dispatches them, with explicit start/stop
/// lifecycle and injected dependencies - no ambient global state.
///
/// # Example
///
/// ```no_run
/// use keyturn::scheduler::{Scheduler, SchedulerOptions};
/// # async fn example(orchestrator: std::sync::Arc<keyturn::orchestrator::RotationOrchestrator>,
/// #     repository: std::sync::Arc<dyn keyturn::repository::RotationRepository>,
/// #     clock: std::sync::Arc<dyn keyturn::clock::Clock>) {
/// let scheduler = Scheduler::new(orchestrator, repository, clock, SchedulerOptions::default());
/// let handle = scheduler.start();
///
/// // ... serve until shutdown ...
///
/// handle.shutdown().await;
/// # }
/// ```
pub struct Scheduler {
    orchestrator: Arc<RotationOrchestrator>,
    repository: Arc<dyn RotationRepository>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    pool: Arc<Semaphore>,
}

impl Scheduler {
    /// Creates a scheduler over the given collaborators.
    pub fn new(
        orchestrator: Arc<RotationOrchestrator>,
        repository: Arc<dyn RotationRepository>,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(options.worker_pool_size.max(1)));
        Self {
            orchestrator,
            repository,
            clock,
            options,
            pool,
        }
    }

    /// Starts the polling loop on the current runtime and returns its
    /// lifecycle handle.
    pub fn start(self) -> SchedulerHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { self.run(token).await });

        SchedulerHandle { shutdown, task }
    }

    async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_interval = ?self.options.tick_interval,
            worker_pool_size = self.options.worker_pool_size,
            "rotation scheduler started"
        );

        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // reap finished executions without blocking
                    while workers.try_join_next().is_some() {}

                    if let Err(error) = self.tick(&mut workers).await {
                        warn!(%error, "scheduler tick failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        // Drain in-flight executions with a grace timeout so no step is
        // interrupted mid-flight; leases of anything hard-stopped expire
        // on their TTL.
        let drained = tokio::time::timeout(self.options.shutdown_grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                grace = ?self.options.shutdown_grace,
                "in-flight rotations did not drain in time, aborting them"
            );
            workers.abort_all();
        }

        info!("rotation scheduler stopped");
    }

    /// One polling pass: fetch due rotations and dispatch as many as the
    /// worker pool allows.
    async fn tick(&self, workers: &mut JoinSet<()>) -> Result<()> {
        let now = self.clock.now();
        let due = self
            .repository
            .list_due(now, self.options.stale_execution_after)
            .await?;

        for config in due {
            let permit = match self.pool.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("worker pool exhausted, deferring remaining due rotations");
                    break;
                }
            };

            let owner = LockOwner::generate();
            let acquired = self
                .repository
                .acquire_lock(&config.id, &owner, self.options.lock_ttl)
                .await?;
            if !acquired {
                // another instance holds the lease - expected under
                // horizontal scale
                debug!(rotation_id = %config.id, "skipping locked rotation");
                continue;
            }

            let orchestrator = self.orchestrator.clone();
            let repository = self.repository.clone();
            let id = config.id.clone();
            workers.spawn(async move {
                let _permit = permit;
                if let Err(error) = orchestrator.execute(&id, Trigger::Scheduled).await {
                    warn!(rotation_id = %id, %error, "scheduled rotation failed");
                }
                if let Err(error) = repository.release_lock(&id, &owner).await {
                    warn!(rotation_id = %id, %error, "failed to release execution lock");
                }
            });
        }

        Ok(())
    }
}

/// Lifecycle handle for a started scheduler.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops polling, drains in-flight executions with the configured
    /// grace timeout, and waits for the loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use crate::cipher::AesGcmCipher;
    use crate::clock::ManualClock;
    use crate::config::{
        EngineOptions, RotationConfig, RotationId, RotationSchedule, RotationStatus, RotationType,
        SecretMapping,
    };
    use crate::connector::{ConnectorError, ConnectorRegistry};
    use crate::connectors::mock::MockConnector;
    use crate::mapping::MemorySecretStore;
    use crate::record::{CredentialRecord, CredentialSet};
    use crate::repository::MemoryRepository;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    struct Stack {
        repository: Arc<MemoryRepository>,
        connector: Arc<MockConnector>,
        cipher: Arc<AesGcmCipher>,
        clock: Arc<ManualClock>,
        orchestrator: Arc<RotationOrchestrator>,
    }

    fn stack() -> Stack {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap(),
        ));
        let repository = Arc::new(MemoryRepository::with_clock(clock.clone()));
        let connector = Arc::new(MockConnector::new(RotationType::CloudIamSecret));
        let registry = Arc::new(ConnectorRegistry::new());
        registry.register(connector.clone());
        let cipher = Arc::new(AesGcmCipher::generate());

        let orchestrator = Arc::new(RotationOrchestrator::new(
            repository.clone(),
            registry,
            cipher.clone(),
            Arc::new(MemorySecretStore::new()),
            clock.clone(),
            EngineOptions::default(),
        ));

        Stack {
            repository,
            connector,
            cipher,
            clock,
            orchestrator,
        }
    }

    async fn seed_due(stack: &Stack, name: &str) -> RotationId {
        let record = CredentialRecord::from([("username", "svc-user"), ("password", "initial")]);
        let set = CredentialSet::first(record);
        let config = RotationConfig {
            id: RotationId::generate(),
            name: name.to_string(),
            rotation_type: RotationType::CloudIamSecret,
            parameters: serde_json::json!({}),
            secrets_mapping: vec![
                SecretMapping::new("username", "SVC_USER"),
                SecretMapping::new("password", "SVC_PASSWORD"),
            ],
            generated_credentials: set.seal(stack.cipher.as_ref()).await.unwrap(),
            active_index: 0,
            is_auto_rotation_enabled: true,
            schedule: RotationSchedule::daily_at(3, 0),
            rotation_status: RotationStatus::Succeeded,
            last_rotation_attempted_at: None,
            last_rotated_at: None,
            next_rotation_at: Some(stack.clock.now() - ChronoDuration::seconds(1)),
            next_retry_at: None,
            consecutive_failures: 0,
            last_rotation_message: None,
            is_last_rotation_manual: false,
            version: 0,
        };
        let id = config.id.clone();
        stack.repository.insert(config).await.unwrap();
        id
    }

    fn scheduler(stack: &Stack, options: SchedulerOptions) -> Scheduler {
        Scheduler::new(
            stack.orchestrator.clone(),
            stack.repository.clone(),
            stack.clock.clone(),
            options,
        )
    }

    #[tokio::test]
    async fn test_tick_executes_due_rotation() {
        let stack = stack();
        let id = seed_due(&stack, "due").await;

        let s = scheduler(&stack, SchedulerOptions::default());
        let mut workers = JoinSet::new();
        s.tick(&mut workers).await.unwrap();
        while workers.join_next().await.is_some() {}

        let config = stack.repository.get(&id).await.unwrap();
        assert_eq!(config.rotation_status, RotationStatus::Succeeded);
        assert_eq!(config.active_index, 1);
        assert_eq!(stack.connector.issued().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_skips_locked_rotation() {
        let stack = stack();
        let id = seed_due(&stack, "locked").await;

        // another instance holds the lease
        let foreign = LockOwner::generate();
        assert!(stack
            .repository
            .acquire_lock(&id, &foreign, Duration::from_secs(60))
            .await
            .unwrap());

        let s = scheduler(&stack, SchedulerOptions::default());
        let mut workers = JoinSet::new();
        s.tick(&mut workers).await.unwrap();
        while workers.join_next().await.is_some() {}

        assert!(stack.connector.issued().is_empty());
    }

    #[tokio::test]
    async fn test_pool_exhaustion_defers_without_blocking() {
        let stack = stack();
        seed_due(&stack, "first").await;
        seed_due(&stack, "second").await;

        let options = SchedulerOptions {
            worker_pool_size: 1,
            ..SchedulerOptions::default()
        };
        let s = scheduler(&stack, options);

        let mut workers = JoinSet::new();
        s.tick(&mut workers).await.unwrap();
        while workers.join_next().await.is_some() {}

        // only one execution fit the pool this tick
        assert_eq!(stack.connector.issued().len(), 1);

        // the deferred one is picked up on a later tick
        s.tick(&mut workers).await.unwrap();
        while workers.join_next().await.is_some() {}
        assert_eq!(stack.connector.issued().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_running_rotation_is_requeued() {
        let stack = stack();
        let id = seed_due(&stack, "stale").await;

        // simulate a crashed holder: Running, old attempt stamp, expired lease
        let mut config = stack.repository.get(&id).await.unwrap();
        config.rotation_status = RotationStatus::Running;
        config.last_rotation_attempted_at =
            Some(stack.clock.now() - ChronoDuration::seconds(2_000));
        config.next_rotation_at = None;
        stack.repository.update(config).await.unwrap();

        let s = scheduler(&stack, SchedulerOptions::default());
        let mut workers = JoinSet::new();
        s.tick(&mut workers).await.unwrap();
        while workers.join_next().await.is_some() {}

        let config = stack.repository.get(&id).await.unwrap();
        assert_eq!(config.rotation_status, RotationStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_execution_releases_lock_for_next_tick() {
        let stack = stack();
        let id = seed_due(&stack, "failing").await;
        stack
            .connector
            .fail_issue(ConnectorError::transient("connection reset"));

        let s = scheduler(&stack, SchedulerOptions::default());
        let mut workers = JoinSet::new();
        s.tick(&mut workers).await.unwrap();
        while workers.join_next().await.is_some() {}

        let config = stack.repository.get(&id).await.unwrap();
        assert_eq!(config.rotation_status, RotationStatus::Failed);

        // the lease was released: the retry slot is reachable once due
        stack.connector.heal();
        stack.clock.advance(ChronoDuration::seconds(61));
        s.tick(&mut workers).await.unwrap();
        while workers.join_next().await.is_some() {}

        let config = stack.repository.get(&id).await.unwrap();
        assert_eq!(config.rotation_status, RotationStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown_lifecycle() {
        let stack = stack();
        let id = seed_due(&stack, "lifecycle").await;

        let options = SchedulerOptions {
            tick_interval: Duration::from_millis(10),
            ..SchedulerOptions::default()
        };
        let handle = scheduler(&stack, options).start();

        // let the loop tick (auto-advanced virtual time)
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        let config = stack.repository.get(&id).await.unwrap();
        assert_eq!(config.rotation_status, RotationStatus::Succeeded);
    }
}
