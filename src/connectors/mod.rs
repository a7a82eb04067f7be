//! Connector implementations.
//!
//! The mock connector is not auto-registered: it serves whatever rotation
//! type a test constructs it with, so tests register it explicitly.

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "local-account")]
pub mod local_account;

use crate::connector::ConnectorRegistry;

/// Registers all compiled-in target connectors with a registry.
///
/// Called by [`ConnectorRegistry::builtin`]; can also be used to add the
/// built-in set to a registry that already carries custom connectors.
pub fn register_builtin(registry: &ConnectorRegistry) {
    let _ = registry;

    #[cfg(feature = "postgres")]
    registry.register(std::sync::Arc::new(postgres::PostgresConnector::new()));

    #[cfg(feature = "local-account")]
    registry.register(std::sync::Arc::new(
        local_account::LocalAccountConnector::new(),
    ));
}

/// Generates a random alphanumeric secret of the given length.
#[cfg(any(feature = "postgres", feature = "local-account", test))]
pub(crate) fn generate_secret(length: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_are_alphanumeric_and_distinct() {
        let a = generate_secret(32);
        let b = generate_secret(32);

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
