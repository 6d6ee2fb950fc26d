//! Application configuration from environment variables

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    /// Direct (non-pooled) URL for migrations, when the main URL goes
    /// through a pooler.
    pub database_direct_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 bytes");
        }

        let jwt_expiry_hours = std::env::var("JWT_EXPIRY_HOURS")
            .ok()
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("JWT_EXPIRY_HOURS must be an integer")?
            .unwrap_or(24);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url,
            database_direct_url: std::env::var("DATABASE_DIRECT_URL").ok(),
            jwt_secret,
            jwt_expiry_hours,
            allowed_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_env() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/studimed_test");
        std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        set_required_env();
        std::env::remove_var("JWT_EXPIRY_HOURS");
        std::env::remove_var("ALLOWED_ORIGINS");
        std::env::remove_var("BIND_ADDRESS");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.jwt_expiry_hours, 24);
        assert_eq!(config.allowed_origins, vec!["http://localhost:3000"]);
    }

    #[test]
    #[serial]
    fn test_config_rejects_short_jwt_secret() {
        set_required_env();
        std::env::set_var("JWT_SECRET", "short");

        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_parses_origin_list() {
        set_required_env();
        std::env::set_var(
            "ALLOWED_ORIGINS",
            "https://app.studimed.id, https://admin.studimed.id",
        );

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://app.studimed.id", "https://admin.studimed.id"]
        );

        std::env::remove_var("ALLOWED_ORIGINS");
    }
}
