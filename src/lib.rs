//! Keyturn - zero-downtime secret rotation engine.
//!
//! Keyturn periodically regenerates credentials held by external systems
//! (databases, cloud IAM principals, SaaS client secrets, OS accounts) and
//! keeps a secret store's copy synchronized, without ever leaving the
//! managed resource with zero valid credentials.
//!
//! # How it works
//!
//! Up to two generations of each credential stay valid at the target: the
//! *active* one, reflected in the secret store, and the previous one, kept
//! for rollback and overlap. A rotation issues a new credential first,
//! writes it to the secret store second, and persists the swap last - a
//! crash at any step leaves the old credential live and referenced.
//!
//! - **Connectors** integrate target systems behind one capability trait
//!   (issue / revoke / optional test), registered per rotation type.
//! - **The orchestrator** drives the `Idle -> Running -> {Succeeded,
//!   Failed}` state machine for one attempt, including the reconciliation
//!   variant that repairs out-of-band drift without issuing.
//! - **The scheduler** polls for due rotations, enforces cross-process
//!   single-flight execution through TTL-leased locks, and dispatches on a
//!   bounded worker pool with retry backoff separate from the healthy
//!   cadence.
//! - **The engine** is the trigger surface: create (synchronous first
//!   issuance), rotate now, reconcile, update, two-phase delete.
//!
//! # Quick Start
//!
//! ```no_run
//! use keyturn::{
//!     AesGcmCipher, ConnectorRegistry, MemoryRepository, MemorySecretStore, RotationDraft,
//!     RotationEngine, RotationSchedule, RotationType,
//! };
//! use keyturn::scheduler::SchedulerOptions;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> keyturn::Result<()> {
//!     let engine = RotationEngine::new(
//!         Arc::new(MemoryRepository::new()),
//!         Arc::new(ConnectorRegistry::builtin()),
//!         Arc::new(AesGcmCipher::generate()),
//!         Arc::new(MemorySecretStore::new()),
//!     );
//!
//!     let draft = RotationDraft::new(
//!         "orders-db",
//!         RotationType::DatabaseCredentials,
//!         serde_json::json!({
//!             "host": "db.internal", "database": "orders",
//!             "admin_username": "rotation_admin", "admin_password": "...",
//!             "username1": "app_user_1", "username2": "app_user_2",
//!         }),
//!     )
//!     .with_mapping("username", "DB_USER")
//!     .with_mapping("password", "DB_PASSWORD")
//!     .with_schedule(RotationSchedule::daily_at(3, 0));
//!
//!     let rotation = engine.create_rotation(draft).await?;
//!     println!("created {} (next run {:?})", rotation.id, rotation.next_rotation_at);
//!
//!     // automatic rotation until shutdown
//!     let scheduler = engine.start_scheduler(SchedulerOptions::default());
//!     // ... serve ...
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Shipped connectors
//!
//! | Connector | Rotation type | Feature flag | Integration |
//! |-----------|---------------|--------------|-------------|
//! | Mock | any (configurable) | `mock` (default) | In-memory, error injection |
//! | PostgreSQL | `database-credentials` | `postgres` (default) | `psql` CLI, dual-login cycling |
//! | Local account | `local-account-password` | `local-account` (default) | `chpasswd` CLI |
//!
//! Other rotation types (cloud IAM, OAuth client secrets) are served by
//! registering a custom [`Connector`](connector::Connector) implementation
//! with the [`ConnectorRegistry`].

pub mod cipher;
pub mod cli;
pub mod clock;
pub mod config;
pub mod connector;
pub mod connectors;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod orchestrator;
pub mod record;
pub mod repository;
pub mod scheduler;
pub mod validation;

pub use cipher::{AesGcmCipher, Cipher, SealedBlob};
pub use config::{
    DeleteOptions, EngineOptions, RetryPolicy, RotationConfig, RotationDraft, RotationId,
    RotationSchedule, RotationStatus, RotationType, RotationUpdate, SecretMapping,
};
pub use connector::{Connector, ConnectorError, ConnectorRegistry, IssueContext, LiveStatus};
pub use engine::RotationEngine;
pub use error::{KeyturnError, Result};
pub use mapping::{MemorySecretStore, SecretsMappingWriter};
pub use orchestrator::{ReconcileOutcome, RotationOrchestrator, Trigger};
pub use record::{CredentialRecord, CredentialSet};
pub use repository::{LockOwner, MemoryRepository, RotationRepository};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerOptions};
