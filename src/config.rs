use thiserror::Error;

use crate::auth::DEFAULT_PBKDF2_ITERATIONS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Gcs,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for uploaded media with the local backend
    pub media_root: String,
    /// GCS bucket name (required when backend is gcs)
    pub gcs_bucket: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to ADC)
    pub gcs_credentials_file: Option<String>,
}

/// Ten years
pub const MAX_SESSION_TTL_SECONDS: i64 = 10 * 366 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub session_ttl_seconds: i64,
    pub password_hash_iterations: u32,
    /// Superuser created at startup if the username is free
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            media_root: "./media".to_string(),
            gcs_bucket: None,
            gcs_credentials_file: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 14 * 24 * 60 * 60,
            password_hash_iterations: DEFAULT_PBKDF2_ITERATIONS,
            bootstrap_admin: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let storage_backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            _ => StorageBackend::Local,
        };

        let media_root = std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string());
        let gcs_bucket = std::env::var("GCS_BUCKET").ok();
        let gcs_credentials_file = std::env::var("GCS_CREDENTIALS_FILE").ok();

        let session_ttl_seconds = std::env::var("SESSION_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(AuthConfig::default().session_ttl_seconds);

        let password_hash_iterations = std::env::var("PASSWORD_HASH_ITERATIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PBKDF2_ITERATIONS);

        let bootstrap_admin = match (
            std::env::var("ADMIN_USERNAME").ok(),
            std::env::var("ADMIN_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Some(BootstrapAdmin { username, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::ValidationError(
                    "ADMIN_USERNAME and ADMIN_PASSWORD must be set together".to_string(),
                ))
            }
        };

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig {
                backend: storage_backend,
                media_root,
                gcs_bucket,
                gcs_credentials_file,
            },
            auth: AuthConfig {
                session_ttl_seconds,
                password_hash_iterations,
                bootstrap_admin,
            },
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.storage.backend, StorageBackend::Gcs) && self.storage.gcs_bucket.is_none()
        {
            return Err(ConfigError::ValidationError(
                "GCS_BUCKET is required when STORAGE_BACKEND=gcs".to_string(),
            ));
        }

        if self.auth.session_ttl_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "SESSION_TTL_SECONDS must be positive".to_string(),
            ));
        }

        if self.auth.session_ttl_seconds > MAX_SESSION_TTL_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "SESSION_TTL_SECONDS cannot exceed {MAX_SESSION_TTL_SECONDS}"
            )));
        }

        if self.auth.password_hash_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "PASSWORD_HASH_ITERATIONS must be positive".to_string(),
            ));
        }

        if let Some(ref admin) = self.auth.bootstrap_admin {
            if admin.username.trim().is_empty() || admin.password.is_empty() {
                return Err(ConfigError::ValidationError(
                    "ADMIN_USERNAME and ADMIN_PASSWORD cannot be empty".to_string(),
                ));
            }
        }

        if self.auth.password_hash_iterations < 100_000 {
            tracing::warn!(
                "PASSWORD_HASH_ITERATIONS is {}. Values below 100000 are only suitable for tests.",
                self.auth.password_hash_iterations
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_ttl(session_ttl_seconds: i64) -> Config {
        Config {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig {
                session_ttl_seconds,
                ..AuthConfig::default()
            },
            max_upload_size: 1024,
        }
    }

    #[test]
    fn default_session_ttl_is_valid() {
        assert!(config_with_ttl(AuthConfig::default().session_ttl_seconds)
            .validate()
            .is_ok());
        assert!(config_with_ttl(MAX_SESSION_TTL_SECONDS).validate().is_ok());
    }

    #[test]
    fn session_ttl_must_be_positive_and_bounded() {
        for ttl in [0, -1, MAX_SESSION_TTL_SECONDS + 1, 100_000_000_000_000_000, i64::MAX] {
            assert!(
                matches!(
                    config_with_ttl(ttl).validate(),
                    Err(ConfigError::ValidationError(_))
                ),
                "{ttl} should be rejected"
            );
        }
    }
}
