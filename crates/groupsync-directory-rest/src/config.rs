//! REST directory configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error from validating a [`RestDirectoryConfig`].
#[derive(Debug, Error)]
pub enum RestDirectoryConfigError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("invalid base_url: {message}")]
    InvalidBaseUrl { message: String },

    #[error("could not build HTTP client: {message}")]
    Client { message: String },
}

/// Connection settings for the directory's admin REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestDirectoryConfig {
    /// Base URL of the directory server (e.g. `https://id.example.org`).
    pub base_url: String,

    /// Realm whose groups and users are managed.
    pub realm: String,

    /// OAuth2 client id for the client credentials grant.
    pub client_id: String,

    /// OAuth2 client secret.
    pub client_secret: String,

    /// Realm the service account authenticates against. Defaults to the
    /// managed realm.
    #[serde(default)]
    pub token_realm: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Page size for member and hierarchy listings.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    500
}

impl RestDirectoryConfig {
    /// Create a config with required fields and default settings.
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_realm: None,
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }

    /// Authenticate against a different realm than the managed one.
    #[must_use]
    pub fn with_token_realm(mut self, realm: impl Into<String>) -> Self {
        self.token_realm = Some(realm.into());
        self
    }

    /// Check the config is complete and the base URL parses.
    pub fn validate(&self) -> Result<(), RestDirectoryConfigError> {
        for (field, value) in [
            ("base_url", &self.base_url),
            ("realm", &self.realm),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ] {
            if value.is_empty() {
                return Err(RestDirectoryConfigError::Missing { field });
            }
        }
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            RestDirectoryConfigError::InvalidBaseUrl {
                message: e.to_string(),
            }
        })?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(RestDirectoryConfigError::InvalidBaseUrl {
                message: format!("unsupported scheme: {}", url.scheme()),
            });
        }
        Ok(())
    }

    /// Realm the token endpoint lives in.
    #[must_use]
    pub fn token_realm(&self) -> &str {
        self.token_realm.as_deref().unwrap_or(&self.realm)
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full URL for an admin API path within the managed realm.
    #[must_use]
    pub fn admin_url(&self, path: &str) -> String {
        format!(
            "{}/admin/realms/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.realm,
            path.trim_start_matches('/')
        )
    }

    /// URL of the OAuth2 token endpoint.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base_url.trim_end_matches('/'),
            self.token_realm()
        )
    }
}
