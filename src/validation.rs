//! Input validation to prevent command injection and other attacks.

use crate::{KeyturnError, Result};

/// Dangerous characters that could enable command injection in shell commands
/// or SQL identifier positions.
const DANGEROUS_CHARS: &str = ";|&$`<>(){}[]!*?~#%^\\\"'";

/// Maximum allowed length for rotation, slot, and destination names.
const MAX_NAME_LENGTH: usize = 255;

/// Validates a rotation name or secret destination key for safety.
///
/// This function prevents command injection attacks by checking for:
/// - Empty names
/// - Excessive length (>255 characters)
/// - Null bytes
/// - Control characters
/// - Shell metacharacters that could enable injection
///
/// # Errors
///
/// Returns [`KeyturnError::InvalidName`] if validation fails.
///
/// # Example
///
/// ```
/// use keyturn::validation::validate_name;
///
/// assert!(validate_name("orders-db-rotation").is_ok());
/// assert!(validate_name("DB_PASSWORD").is_ok());
/// assert!(validate_name("prod.database.password").is_ok());
///
/// assert!(validate_name("").is_err());
/// assert!(validate_name("name; rm -rf /").is_err());
/// assert!(validate_name("name$(whoami)").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KeyturnError::InvalidName("name cannot be empty".to_string()));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(KeyturnError::InvalidName(format!(
            "name exceeds maximum length of {} characters",
            MAX_NAME_LENGTH
        )));
    }

    if name.contains('\0') {
        return Err(KeyturnError::InvalidName(
            "name contains null byte".to_string(),
        ));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(KeyturnError::InvalidName(
            "name contains control characters".to_string(),
        ));
    }

    if name.chars().any(|c| DANGEROUS_CHARS.contains(c)) {
        return Err(KeyturnError::InvalidName(format!(
            "name contains dangerous characters (not allowed: {})",
            DANGEROUS_CHARS
        )));
    }

    Ok(())
}

/// Validates a principal identifier (database role, OS account name).
///
/// Principals end up inside SQL identifiers and CLI arguments, so the rules
/// are stricter than [`validate_name`]: ASCII alphanumerics, `_` and `-`
/// only, and the first character must not be `-`.
pub fn validate_principal(name: &str) -> Result<()> {
    validate_name(name)?;

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(KeyturnError::InvalidName(format!(
            "principal '{}' may only contain ASCII alphanumerics, '_' and '-'",
            name
        )));
    }

    if name.starts_with('-') {
        return Err(KeyturnError::InvalidName(format!(
            "principal '{}' must not start with '-'",
            name
        )));
    }

    Ok(())
}

/// Validates a host or database value destined for a connection string.
///
/// Same rules as [`validate_name`] plus a whitespace ban, since these values
/// are interpolated into space-separated `key=value` connection strings.
pub fn validate_connection_value(value: &str) -> Result<()> {
    validate_name(value)?;

    if value.chars().any(char::is_whitespace) {
        return Err(KeyturnError::InvalidName(
            "connection values must not contain whitespace".to_string(),
        ));
    }

    Ok(())
}
