//! Local OS account password connector.
//!
//! An operating-system account holds exactly one password, so this type
//! cannot run the usual two-generation overlap: issuing overwrites the
//! single principal's password via `chpasswd`, and the superseded password
//! stops working at that moment. The inactive record is kept for
//! inspection only.

use crate::cli::{check_command_exists, run_command_with_stdin};
use crate::connector::{Connector, ConnectorError, IssueContext};
use crate::record::CredentialRecord;
use crate::validation::validate_principal;
use crate::{KeyturnError, Result, RotationType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Length of generated passwords.
const PASSWORD_LENGTH: usize = 32;

/// Parameters for a local-account-password rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAccountParameters {
    /// The OS account whose password is rotated.
    pub username: String,
}

impl LocalAccountParameters {
    fn parse(parameters: &serde_json::Value) -> std::result::Result<Self, ConnectorError> {
        serde_json::from_value(parameters.clone())
            .map_err(|e| ConnectorError::permanent(format!("invalid parameters: {}", e)))
    }
}

/// Connector rotating a local OS account password via `chpasswd`.
///
/// Requires the process to run with enough privilege to change the target
/// account's password.
pub struct LocalAccountConnector;

impl LocalAccountConnector {
    /// Creates the connector.
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalAccountConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for LocalAccountConnector {
    fn rotation_type(&self) -> RotationType {
        RotationType::LocalAccountPassword
    }

    fn validate_parameters(&self, parameters: &serde_json::Value) -> Result<()> {
        let params = LocalAccountParameters::parse(parameters)
            .map_err(|e| KeyturnError::InvalidParameters(e.to_string()))?;
        validate_principal(&params.username)?;
        Ok(())
    }

    async fn issue(
        &self,
        parameters: &serde_json::Value,
        _ctx: IssueContext<'_>,
    ) -> std::result::Result<CredentialRecord, ConnectorError> {
        let params = LocalAccountParameters::parse(parameters)?;
        validate_principal(&params.username)
            .map_err(|e| ConnectorError::permanent(e.to_string()))?;

        match check_command_exists("chpasswd").await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ConnectorError::permanent("chpasswd command not found"));
            }
            Err(e) => return Err(ConnectorError::transient(e.to_string())),
        }

        let password = super::generate_secret(PASSWORD_LENGTH);

        // chpasswd reads `user:password` lines on stdin, keeping the
        // secret out of the argument list.
        let stdin = format!("{}:{}\n", params.username, password);
        run_command_with_stdin("chpasswd", &[], &[], &stdin)
            .await
            .map_err(classify)?;

        let mut record = CredentialRecord::new();
        record.insert("username", params.username);
        record.insert("password", password);
        Ok(record)
    }

    async fn revoke(
        &self,
        parameters: &serde_json::Value,
        credential: &CredentialRecord,
    ) -> std::result::Result<(), ConnectorError> {
        let params = LocalAccountParameters::parse(parameters)?;

        // A superseded password is already invalid at the account - the
        // overwrite during issuance revoked it. Nothing to undo.
        debug!(
            username = %params.username,
            slots = credential.len(),
            "revoke is a no-op for superseded local account passwords"
        );
        Ok(())
    }
}

fn classify(err: KeyturnError) -> ConnectorError {
    match &err {
        KeyturnError::ConnectorNotInstalled(message) => ConnectorError::permanent(message.clone()),
        KeyturnError::CommandFailed(message) => {
            let lower = message.to_lowercase();
            let permanent = ["does not exist", "permission denied", "unknown user"];
            if permanent.iter().any(|needle| lower.contains(needle)) {
                ConnectorError::permanent(message.clone())
            } else {
                ConnectorError::transient(message.clone())
            }
        }
        _ => ConnectorError::transient(err.to_string()),
    }
}
