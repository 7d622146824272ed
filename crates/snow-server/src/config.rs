//! Server configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// JWT secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Directory holding uploaded post images, served at `/uploads`.
    pub upload_dir: PathBuf,
    /// Base URL used to build links to uploaded images.
    pub public_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `SNOW_HOST` | Bind host | `0.0.0.0` |
    /// | `SNOW_PORT` | Bind port | `3000` |
    /// | `SNOW_DB_PATH` | SQLite file | `snowblog.db` |
    /// | `SNOW_JWT_SECRET` | Token signing secret | (required) |
    /// | `SNOW_UPLOAD_DIR` | Image upload directory | `./uploads` |
    /// | `SNOW_PUBLIC_URL` | Public base URL | `http://localhost:3000` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("SNOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SNOW_PORT").unwrap_or_else(|_| "3000".to_string());
        let addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(format!("{}:{}", host, port)))?;

        let jwt_secret = env::var("SNOW_JWT_SECRET").unwrap_or_default();
        check_secret(&jwt_secret)?;

        Ok(Self {
            addr,
            db_path: env::var("SNOW_DB_PATH")
                .unwrap_or_else(|_| "snowblog.db".to_string())
                .into(),
            jwt_secret,
            upload_dir: env::var("SNOW_UPLOAD_DIR")
                .unwrap_or_else(|_| "./uploads".to_string())
                .into(),
            public_url: env::var("SNOW_PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

fn check_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.is_empty() || PLACEHOLDER_SECRETS.contains(&secret) {
        return Err(ConfigError::WeakJwtSecret);
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bind address '{0}'")]
    InvalidAddr(String),

    #[error("SNOW_JWT_SECRET is unset or still a placeholder")]
    WeakJwtSecret,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_secrets_are_rejected() {
        assert!(matches!(check_secret(""), Err(ConfigError::WeakJwtSecret)));
        assert!(matches!(
            check_secret("dev-secret-change-me"),
            Err(ConfigError::WeakJwtSecret)
        ));
        assert!(check_secret("a-long-random-value").is_ok());
    }
}
