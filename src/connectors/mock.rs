//! Mock connector for testing.
//!
//! A complete in-memory implementation with error injection and
//! issuance/revocation journals for testing code that drives rotations.

use crate::connector::{Connector, ConnectorError, IssueContext, LiveStatus};
use crate::record::CredentialRecord;
use crate::{Result, RotationType};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Owned snapshot of the records an [`IssueContext`] carried.
#[derive(Debug, Clone, Default)]
pub struct RecordedContext {
    /// The active record at issue time, if any.
    pub active: Option<CredentialRecord>,
    /// The inactive record at issue time, if any.
    pub inactive: Option<CredentialRecord>,
}

/// Mock connector for testing.
///
/// Issues deterministic `{username, password}` records with an incrementing
/// counter, keeps journals of everything issued and revoked, tracks what
/// the simulated target currently honors (for `test`), and supports error
/// injection to simulate failure conditions.
///
/// # Example
///
/// ```
/// use keyturn::connectors::mock::MockConnector;
/// use keyturn::connector::{Connector, ConnectorError, IssueContext};
/// use keyturn::RotationType;
///
/// #[tokio::main]
/// async fn main() {
///     let connector = MockConnector::new(RotationType::CloudIamSecret);
///
///     let record = connector
///         .issue(&serde_json::json!({}), IssueContext::empty())
///         .await
///         .unwrap();
///     assert_eq!(record.get("password"), Some("generated-1"));
///
///     // Simulate a network outage
///     connector.fail_issue(ConnectorError::transient("connection reset"));
///     let result = connector
///         .issue(&serde_json::json!({}), IssueContext::empty())
///         .await;
///     assert!(result.is_err());
/// }
/// ```
pub struct MockConnector {
    rotation_type: RotationType,
    counter: AtomicU64,
    issued: Mutex<Vec<CredentialRecord>>,
    revoked: Mutex<Vec<CredentialRecord>>,
    last_context: Mutex<Option<RecordedContext>>,
    live: Mutex<Option<CredentialRecord>>,
    issue_delay: Mutex<Option<std::time::Duration>>,
    issue_error: Mutex<Option<ConnectorError>>,
    revoke_error: Mutex<Option<ConnectorError>>,
    test_error: Mutex<Option<ConnectorError>>,
}

impl MockConnector {
    /// Creates a mock connector serving the given rotation type.
    pub fn new(rotation_type: RotationType) -> Self {
        Self {
            rotation_type,
            counter: AtomicU64::new(0),
            issued: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
            last_context: Mutex::new(None),
            live: Mutex::new(None),
            issue_delay: Mutex::new(None),
            issue_error: Mutex::new(None),
            revoke_error: Mutex::new(None),
            test_error: Mutex::new(None),
        }
    }

    /// Injects an error for subsequent `issue` calls.
    pub fn fail_issue(&self, error: ConnectorError) {
        *self.issue_error.lock().unwrap() = Some(error);
    }

    /// Makes subsequent `issue` calls sleep first, to hold executions
    /// in flight for concurrency tests.
    pub fn delay_issue(&self, delay: std::time::Duration) {
        *self.issue_delay.lock().unwrap() = Some(delay);
    }

    /// Injects an error for subsequent `revoke` calls.
    pub fn fail_revoke(&self, error: ConnectorError) {
        *self.revoke_error.lock().unwrap() = Some(error);
    }

    /// Injects an error for subsequent `test` calls.
    pub fn fail_test(&self, error: ConnectorError) {
        *self.test_error.lock().unwrap() = Some(error);
    }

    /// Clears all injected errors.
    pub fn heal(&self) {
        *self.issue_error.lock().unwrap() = None;
        *self.revoke_error.lock().unwrap() = None;
        *self.test_error.lock().unwrap() = None;
    }

    /// Overrides what the simulated target currently honors, to simulate
    /// out-of-band drift.
    pub fn set_live(&self, record: CredentialRecord) {
        *self.live.lock().unwrap() = Some(record);
    }

    /// Everything issued so far, oldest first.
    pub fn issued(&self) -> Vec<CredentialRecord> {
        self.issued.lock().unwrap().clone()
    }

    /// Everything revoked so far, oldest first.
    pub fn revoked(&self) -> Vec<CredentialRecord> {
        self.revoked.lock().unwrap().clone()
    }

    /// The context the most recent `issue` call received.
    pub fn last_issue_context(&self) -> Option<RecordedContext> {
        self.last_context.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn rotation_type(&self) -> RotationType {
        self.rotation_type
    }

    fn validate_parameters(&self, _parameters: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn issue(
        &self,
        _parameters: &serde_json::Value,
        ctx: IssueContext<'_>,
    ) -> std::result::Result<CredentialRecord, ConnectorError> {
        *self.last_context.lock().unwrap() = Some(RecordedContext {
            active: ctx.active.cloned(),
            inactive: ctx.inactive.cloned(),
        });

        let delay = *self.issue_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.issue_error.lock().unwrap().clone() {
            return Err(error);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut record = CredentialRecord::new();
        record.insert("username", "svc-user");
        record.insert("password", format!("generated-{}", n));

        self.issued.lock().unwrap().push(record.clone());
        *self.live.lock().unwrap() = Some(record.clone());
        Ok(record)
    }

    async fn revoke(
        &self,
        _parameters: &serde_json::Value,
        credential: &CredentialRecord,
    ) -> std::result::Result<(), ConnectorError> {
        if let Some(error) = self.revoke_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.revoked.lock().unwrap().push(credential.clone());
        Ok(())
    }

    fn supports_test(&self) -> bool {
        true
    }

    async fn test(
        &self,
        _parameters: &serde_json::Value,
        credential: &CredentialRecord,
    ) -> std::result::Result<LiveStatus, ConnectorError> {
        if let Some(error) = self.test_error.lock().unwrap().clone() {
            return Err(error);
        }

        match self.live.lock().unwrap().clone() {
            // nothing issued or overridden yet; accept the stored values
            None => Ok(LiveStatus::Valid),
            Some(live) if &live == credential => Ok(LiveStatus::Valid),
            Some(live) => Ok(LiveStatus::Divergent(live)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> serde_json::Value {
        serde_json::json!({})
    }

    #[tokio::test]
    async fn test_issue_is_deterministic_and_journaled() {
        let connector = MockConnector::new(RotationType::CloudIamSecret);

        let first = connector.issue(&params(), IssueContext::empty()).await.unwrap();
        let second = connector.issue(&params(), IssueContext::empty()).await.unwrap();

        assert_eq!(first.get("password"), Some("generated-1"));
        assert_eq!(second.get("password"), Some("generated-2"));
        assert_eq!(connector.issued().len(), 2);
    }

    #[tokio::test]
    async fn test_issue_records_context() {
        let connector = MockConnector::new(RotationType::CloudIamSecret);
        let active = CredentialRecord::from([("username", "a")]);
        let inactive = CredentialRecord::from([("username", "b")]);

        connector
            .issue(
                &params(),
                IssueContext {
                    active: Some(&active),
                    inactive: Some(&inactive),
                },
            )
            .await
            .unwrap();

        let ctx = connector.last_issue_context().unwrap();
        assert_eq!(ctx.active, Some(active));
        assert_eq!(ctx.inactive, Some(inactive));
    }

    #[tokio::test]
    async fn test_error_injection_and_heal() {
        let connector = MockConnector::new(RotationType::CloudIamSecret);
        connector.fail_issue(ConnectorError::transient("connection reset"));

        assert!(connector
            .issue(&params(), IssueContext::empty())
            .await
            .is_err());

        connector.heal();
        assert!(connector
            .issue(&params(), IssueContext::empty())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_revoke_is_journaled_and_idempotent() {
        let connector = MockConnector::new(RotationType::CloudIamSecret);
        let record = CredentialRecord::from([("username", "svc-user")]);

        connector.revoke(&params(), &record).await.unwrap();
        connector.revoke(&params(), &record).await.unwrap();

        assert_eq!(connector.revoked().len(), 2);
    }

    #[tokio::test]
    async fn test_live_status_tracks_latest_issue() {
        let connector = MockConnector::new(RotationType::CloudIamSecret);
        let issued = connector.issue(&params(), IssueContext::empty()).await.unwrap();

        assert_eq!(
            connector.test(&params(), &issued).await.unwrap(),
            LiveStatus::Valid
        );

        // out-of-band change at the target
        let drifted = CredentialRecord::from([("username", "svc-user"), ("password", "changed")]);
        connector.set_live(drifted.clone());

        assert_eq!(
            connector.test(&params(), &issued).await.unwrap(),
            LiveStatus::Divergent(drifted)
        );
    }
}
