//! Configuration manager for gatehouse.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_TOKEN_LIFETIME: u64 = 3600; // 1 hour.

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name, also the `issuer` on otpauth URLs.
    pub name: String,
    /// Public URL of this API; verification links are built from it.
    pub url: String,
    /// URL of the frontend; password-reset links point there, and it is the
    /// only origin allowed by CORS.
    pub frontend_url: String,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Session token configuration.
    #[serde(skip_serializing, default)]
    pub token: Token,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Administrator account seeded at first boot.
    #[serde(skip_serializing)]
    pub admin: Option<AdminSeed>,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Mail queue configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// amqp(s)://hostname:(?port) for the broker instance.
    pub address: String,
    /// Broker username to access queue.
    pub username: String,
    /// Broker password to access queue.
    pub password: String,
    /// Broker default vhost.
    pub vhost: Option<String>,
    /// Queue name to send mailing events.
    pub queue: String,
    /// Sender address stamped on every event.
    pub from: String,
}

/// Session token configuration.
/// The signing secret itself comes from the `TOKEN_SECRET` environment
/// variable and never lives in the file.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Session lifetime in seconds.
    pub lifetime: u64,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_TOKEN_LIFETIME,
        }
    }
}

/// Administrator account created at first boot when no such username exists.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Configuration {
    /// Minimal configuration for embedding the router, e.g. in tests.
    pub fn with_urls(
        name: impl Into<String>,
        url: impl Into<String>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            frontend_url: frontend_url.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string().trim_end_matches('/').to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                config.url = Self::normalize_url(&config.url)?;
                config.frontend_url = Self::normalize_url(&config.frontend_url)?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            Configuration::normalize_url("account.example.com").unwrap(),
            "https://account.example.com"
        );
        assert_eq!(
            Configuration::normalize_url("http://localhost:5173").unwrap(),
            "http://localhost:5173"
        );
    }

    #[test]
    fn test_default_token_lifetime() {
        assert_eq!(Token::default().lifetime, 3600);
    }
}
