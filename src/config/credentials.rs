//! API credentials and the key-value file they are read from

use std::collections::HashMap;
use std::path::Path;

use crate::common::errors::{ClientError, Result};

pub const API_KEY_VAR: &str = "API_KEY";
pub const API_SECRET_VAR: &str = "API_SECRET";

/// API key/secret pair. Immutable for the life of the process.
///
/// `Debug` never prints the secret, and only a prefix of the key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.trim().is_empty() {
            return Err(ClientError::Configuration(format!("{} is empty", API_KEY_VAR)));
        }
        if api_secret.trim().is_empty() {
            return Err(ClientError::Configuration(format!(
                "{} is empty",
                API_SECRET_VAR
            )));
        }
        Ok(Self {
            api_key,
            api_secret,
        })
    }

    /// Read `API_KEY` and `API_SECRET` from a dotenv-style file
    ///
    /// A missing file or key is a startup-fatal configuration error. Nothing
    /// is written into the process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClientError::Configuration(format!(
                "credentials file {} not found",
                path.display()
            )));
        }

        let mut values = HashMap::new();
        let entries = dotenvy::from_path_iter(path).map_err(|e| {
            ClientError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        for entry in entries {
            let (key, value) = entry.map_err(|e| {
                ClientError::Configuration(format!("malformed {}: {}", path.display(), e))
            })?;
            values.insert(key, value);
        }

        let api_key = values.remove(API_KEY_VAR).ok_or_else(|| {
            ClientError::Configuration(format!("{} missing from {}", API_KEY_VAR, path.display()))
        })?;
        let api_secret = values.remove(API_SECRET_VAR).ok_or_else(|| {
            ClientError::Configuration(format!(
                "{} missing from {}",
                API_SECRET_VAR,
                path.display()
            ))
        })?;

        Self::new(api_key, api_secret)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let visible: String = self.api_key.chars().take(4).collect();
        f.debug_struct("Credentials")
            .field("api_key", &format!("{}…", visible))
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
