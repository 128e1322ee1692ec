//! Configuration values looked up by `params.get(name)`.

use thiserror::Error;

static SERVICE: &str = "stencil";
/// Environment variable selecting the parameter store backend.
pub const PARAMETER_STORE_ENV: &str = "STENCIL_PARAMETER_STORE";

#[derive(Debug, Error)]
pub enum ParameterStoreError {
    #[error("parameter '{name}' is not set")]
    Missing { name: String },

    #[error("keychain lookup for '{name}' failed: {error}")]
    Keychain { name: String, error: String },
}

pub trait ParameterStore {
    fn get(&self, name: &str) -> Result<String, ParameterStoreError>;
}

/// Reads parameters from environment variables. `/app/db/url` is read from
/// `APP_DB_URL`.
#[derive(Debug, Default)]
pub struct EnvironmentStore;

impl EnvironmentStore {
    fn variable_name(name: &str) -> String {
        name.trim_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

impl ParameterStore for EnvironmentStore {
    fn get(&self, name: &str) -> Result<String, ParameterStoreError> {
        std::env::var(Self::variable_name(name)).map_err(|_| ParameterStoreError::Missing { name: name.to_string() })
    }
}

/// Reads parameters from the OS keychain under the `stencil` service.
#[derive(Debug, Default)]
pub struct KeychainStore;

impl ParameterStore for KeychainStore {
    fn get(&self, name: &str) -> Result<String, ParameterStoreError> {
        let entry = keyring::Entry::new(SERVICE, name).map_err(|error| ParameterStoreError::Keychain {
            name: name.to_string(),
            error: error.to_string(),
        })?;
        entry.get_password().map_err(|error| match error {
            keyring::Error::NoEntry => ParameterStoreError::Missing { name: name.to_string() },
            other => ParameterStoreError::Keychain {
                name: name.to_string(),
                error: other.to_string(),
            },
        })
    }
}

/// Store selected by [`PARAMETER_STORE_ENV`]; `env` unless set to `keychain`.
pub fn active_store() -> Box<dyn ParameterStore> {
    match std::env::var(PARAMETER_STORE_ENV).unwrap_or_default().trim().to_ascii_lowercase().as_str() {
        "keychain" => Box::new(KeychainStore),
        _ => Box::new(EnvironmentStore),
    }
}
