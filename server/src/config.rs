use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use axum::http::HeaderValue;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub struct Config {
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub admin_password: String,
    pub contact_recipient: String,
    pub cors_origin: Option<HeaderValue>,
    pub smtp: SmtpConfig,
}

pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub timeout: Duration,
}

impl Config {
    /// Reads the process environment, falling back to `/run/secrets/<NAME>`
    /// for anything the environment does not set.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| var(key).or_else(|| read_secret(key)))
    }

    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let admin_password = required(&lookup, "ADMIN_PASSWORD", &[])?;
        let username = required(&lookup, "SMTP_USER", &["EMAIL_USER"])?;
        let password = required(&lookup, "SMTP_PASS", &["EMAIL_PASS"])?;

        let from = lookup("MAIL_FROM").unwrap_or_else(|| username.clone());
        let contact_recipient = lookup("CONTACT_RECIPIENT").unwrap_or_else(|| {
            info!("CONTACT_RECIPIENT not set, sending contact mail to {from}");
            from.clone()
        });

        let cors_origin = match lookup("CORS_ORIGIN") {
            Some(origin) => Some(origin.parse::<HeaderValue>().map_err(|e| {
                ConfigError::Invalid {
                    key: "CORS_ORIGIN",
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            port: try_load(&lookup, "PORT", "5000")?,
            upload_dir: try_load(&lookup, "UPLOAD_DIR", "uploads")?,
            max_upload_bytes: try_load(&lookup, "MAX_UPLOAD_BYTES", "10485760")?,
            admin_password,
            contact_recipient,
            cors_origin,
            smtp: SmtpConfig {
                host: try_load(&lookup, "SMTP_HOST", "smtp.gmail.com")?,
                username,
                password,
                from,
                max_retries: try_load(&lookup, "MAIL_MAX_RETRIES", "2")?,
                retry_base: Duration::from_millis(try_load(&lookup, "MAIL_RETRY_BASE_MS", "250")?),
                timeout: Duration::from_secs(try_load(&lookup, "MAIL_TIMEOUT_SECS", "30")?),
            },
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .map_err(|_| {
            debug!("Environment variable {key} not found");
        })
        .ok()
}

fn required<F>(lookup: &F, key: &'static str, aliases: &[&str]) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    std::iter::once(key)
        .chain(aliases.iter().copied())
        .find_map(lookup)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");

            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            debug!("No secret file for {secret_name}: {e}");
        })
        .ok()
}
