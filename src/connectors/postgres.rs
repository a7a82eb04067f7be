//! PostgreSQL credential connector.
//!
//! A SQL database cannot hold two passwords for one login, so rotation
//! cycles between two pre-provisioned logins with identical grants: the
//! new credential is always set on the login that is *not* live, then
//! verified with a probe query before the swap is reported. Integrates via
//! the `psql` command-line tool using an administrative login supplied in
//! the parameters.

use crate::cli::run_command;
use crate::connector::{Connector, ConnectorError, IssueContext};
use crate::record::CredentialRecord;
use crate::validation::{validate_connection_value, validate_principal};
use crate::{KeyturnError, Result, RotationType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Length of generated passwords.
const PASSWORD_LENGTH: usize = 32;

/// Parameters for a database-credentials rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresParameters {
    /// Database host.
    pub host: String,
    /// Database port (default 5432).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Administrative login used to run `ALTER ROLE`.
    pub admin_username: String,
    /// Administrative password.
    pub admin_password: String,
    /// First of the two cycled logins.
    pub username1: String,
    /// Second of the two cycled logins.
    pub username2: String,
}

fn default_port() -> u16 {
    5432
}

impl PostgresParameters {
    fn parse(parameters: &serde_json::Value) -> std::result::Result<Self, ConnectorError> {
        serde_json::from_value(parameters.clone())
            .map_err(|e| ConnectorError::permanent(format!("invalid parameters: {}", e)))
    }

    fn conninfo(&self, user: &str) -> String {
        format!(
            "host={} port={} dbname={} user={}",
            self.host, self.port, self.database, user
        )
    }
}

/// PostgreSQL connector cycling between two pre-provisioned logins.
pub struct PostgresConnector;

impl PostgresConnector {
    /// Creates the connector.
    pub fn new() -> Self {
        Self
    }

    /// Picks the login the new credential goes to.
    ///
    /// Steady state (two generations stored): reuse the inactive
    /// generation's login - it is the one no consumer reads anymore.
    /// After a first-ever issuance (one generation stored): the alternate
    /// of the single live login. First issuance: `username1`.
    fn choose_username(
        params: &PostgresParameters,
        ctx: &IssueContext<'_>,
    ) -> std::result::Result<String, ConnectorError> {
        let stored_username = |record: &CredentialRecord| {
            record
                .get("username")
                .map(str::to_string)
                .ok_or_else(|| ConnectorError::permanent("stored credential has no username slot"))
        };

        match (ctx.inactive, ctx.active) {
            (Some(inactive), _) => stored_username(inactive),
            (None, Some(active)) => {
                let live = stored_username(active)?;
                if live == params.username1 {
                    Ok(params.username2.clone())
                } else {
                    Ok(params.username1.clone())
                }
            }
            (None, None) => Ok(params.username1.clone()),
        }
    }

    async fn run_sql(
        &self,
        params: &PostgresParameters,
        user: &str,
        password: &str,
        sql: &str,
    ) -> Result<String> {
        let conninfo = params.conninfo(user);
        run_command(
            "psql",
            &[
                "-X",
                "-q",
                "-v",
                "ON_ERROR_STOP=1",
                "-A",
                "-t",
                "-c",
                sql,
                &conninfo,
            ],
            // secrets travel via the environment, never the argument list
            &[("PGPASSWORD", password), ("PGCONNECT_TIMEOUT", "10")],
        )
        .await
    }
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn rotation_type(&self) -> RotationType {
        RotationType::DatabaseCredentials
    }

    fn validate_parameters(&self, parameters: &serde_json::Value) -> Result<()> {
        let params = PostgresParameters::parse(parameters)
            .map_err(|e| KeyturnError::InvalidParameters(e.to_string()))?;

        validate_connection_value(&params.host)?;
        validate_connection_value(&params.database)?;
        validate_principal(&params.admin_username)?;
        validate_principal(&params.username1)?;
        validate_principal(&params.username2)?;

        if params.username1 == params.username2 {
            return Err(KeyturnError::InvalidParameters(
                "username1 and username2 must be distinct logins".to_string(),
            ));
        }
        Ok(())
    }

    async fn issue(
        &self,
        parameters: &serde_json::Value,
        ctx: IssueContext<'_>,
    ) -> std::result::Result<CredentialRecord, ConnectorError> {
        let params = PostgresParameters::parse(parameters)?;
        let username = Self::choose_username(&params, &ctx)?;
        validate_principal(&username)
            .map_err(|e| ConnectorError::permanent(e.to_string()))?;

        let password = super::generate_secret(PASSWORD_LENGTH);

        // Setting a password on the non-live login; the live login is
        // untouched, so consumers keep working throughout. ALTER ROLE is
        // idempotent, which makes a retry after partial failure safe.
        let alter = format!("ALTER ROLE \"{}\" WITH LOGIN PASSWORD '{}'", username, password);
        self.run_sql(&params, &params.admin_username, &params.admin_password, &alter)
            .await
            .map_err(classify)?;

        // Probe as the new login before reporting success.
        if let Err(e) = self
            .run_sql(&params, &username, &password, "SELECT 1")
            .await
        {
            return Err(ConnectorError::partial(format!(
                "password set on '{}' but verification failed: {}",
                username, e
            )));
        }

        let mut record = CredentialRecord::new();
        record.insert("username", username);
        record.insert("password", password);
        Ok(record)
    }

    async fn revoke(
        &self,
        parameters: &serde_json::Value,
        credential: &CredentialRecord,
    ) -> std::result::Result<(), ConnectorError> {
        let params = PostgresParameters::parse(parameters)?;
        let username = credential
            .get("username")
            .ok_or_else(|| ConnectorError::permanent("stored credential has no username slot"))?;
        validate_principal(username).map_err(|e| ConnectorError::permanent(e.to_string()))?;

        // NOLOGIN is idempotent: disabling an already-disabled role succeeds.
        let revoke = format!("ALTER ROLE \"{}\" WITH NOLOGIN", username);
        self.run_sql(&params, &params.admin_username, &params.admin_password, &revoke)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Maps a CLI failure onto the connector failure taxonomy based on the
/// driver's error text.
fn classify(err: KeyturnError) -> ConnectorError {
    match &err {
        KeyturnError::ConnectorNotInstalled(message) => ConnectorError::permanent(message.clone()),
        KeyturnError::CommandFailed(message) => {
            let lower = message.to_lowercase();
            let permanent = [
                "authentication failed",
                "password authentication",
                "permission denied",
                "does not exist",
                "syntax error",
            ];
            if permanent.iter().any(|needle| lower.contains(needle)) {
                ConnectorError::permanent(message.clone())
            } else {
                // connection refused, timeouts, resets, unknown driver text
                ConnectorError::transient(message.clone())
            }
        }
        _ => ConnectorError::transient(err.to_string()),
    }
}
