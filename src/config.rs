//! Process configuration read from the environment.

use std::path::PathBuf;

use thiserror::Error;

pub const MIN_SECRET_LEN: usize = 32;
/// One year.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{0} must be at least {MIN_SECRET_LEN} bytes long")]
    WeakSecret(&'static str),
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must not exceed {max}")]
    TooLarge { var: &'static str, max: i64 },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub confirmation_ttl_secs: i64,
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    /// `None` when mail should only be logged.
    pub mail_dir: Option<PathBuf>,
    pub mail_from: String,
    pub frontend_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn number(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: i64) -> Result<i64, ConfigError> {
            match get(var) {
                None => Ok(default),
                Some(raw) => match raw.trim().parse::<i64>() {
                    Ok(v) if v > 0 => Ok(v),
                    _ => Err(ConfigError::Invalid { var, value: raw }),
                },
            }
        }

        let ttl_minutes = number(&get, "TOKEN_TTL_MINUTES", 150)?;
        let config = Self {
            jwt_secret: get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            token_ttl: chrono::Duration::try_minutes(ttl_minutes)
                .ok_or_else(|| ConfigError::Invalid { var: "TOKEN_TTL_MINUTES", value: ttl_minutes.to_string() })?,
            confirmation_ttl_secs: number(&get, "CONFIRMATION_TTL_SECS", 3 * 24 * 3600)?,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            database_url: get("DATABASE_URL").filter(|v| !v.is_empty()),
            data_dir: get("RATEDB_DATA_DIR").unwrap_or_else(|| "data".into()).into(),
            mail_dir: match get("MAIL_DIR") {
                None => Some(PathBuf::from("sent_emails")),
                Some(dir) if dir.trim().is_empty() => None,
                Some(dir) => Some(PathBuf::from(dir)),
            },
            mail_from: get("MAIL_FROM").unwrap_or_else(|| "admin@ratedb.local".into()),
            frontend_url: get("FRONTEND_URL").filter(|v| !v.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret("JWT_SECRET"));
        }
        if self.token_ttl > chrono::Duration::minutes(MAX_TOKEN_TTL_MINUTES) {
            return Err(ConfigError::TooLarge { var: "TOKEN_TTL_MINUTES", max: MAX_TOKEN_TTL_MINUTES });
        }
        Ok(())
    }
}
