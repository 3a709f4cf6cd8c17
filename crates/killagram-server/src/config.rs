use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use killagram_crypto::keys::{generate_secret, secret_from_base64};

const PLACEHOLDER_SECRETS: [&str; 4] = ["change-me", "changeme", "secret", "dev-secret-change-me"];

/// Process configuration, read from `KILLAGRAM_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub session_secret: String,
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub rate_limit_per_minute: usize,
    pub sync_interval: Duration,
    pub admin_key: Option<String>,
    pub maintenance_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let session_secret = lookup("KILLAGRAM_SESSION_SECRET")
            .context("KILLAGRAM_SESSION_SECRET must be set")?;
        if session_secret.trim().is_empty()
            || PLACEHOLDER_SECRETS.contains(&session_secret.to_lowercase().as_str())
        {
            bail!(
                "KILLAGRAM_SESSION_SECRET is a placeholder, try {}",
                generate_secret()
            );
        }

        // Intervals and the rate limit feed timers and windows that need a
        // non-zero period
        let positive = |key: &str, default: &str| -> Result<u64> {
            let value: u64 = var(key, default).parse().with_context(|| key.to_string())?;
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
            Ok(value)
        };

        Ok(Self {
            session_secret,
            host: var("KILLAGRAM_HOST", "0.0.0.0"),
            port: var("KILLAGRAM_PORT", "3000")
                .parse()
                .context("KILLAGRAM_PORT")?,
            db_path: PathBuf::from(var("KILLAGRAM_DB_PATH", "killagram.db")),
            rate_limit_per_minute: usize::try_from(positive("KILLAGRAM_RATE_LIMIT_PER_MINUTE", "60")?)
                .context("KILLAGRAM_RATE_LIMIT_PER_MINUTE")?,
            sync_interval: Duration::from_millis(positive("KILLAGRAM_SYNC_INTERVAL_MS", "2000")?),
            admin_key: lookup("KILLAGRAM_ADMIN_KEY").filter(|key| !key.is_empty()),
            maintenance_interval: Duration::from_secs(positive("KILLAGRAM_MAINTENANCE_SECS", "60")?),
        })
    }

    /// Secrets made by `generate_secret` are base64; anything else is used
    /// as raw bytes.
    pub fn secret_bytes(&self) -> Vec<u8> {
        secret_from_base64(&self.session_secret)
            .unwrap_or_else(|_| self.session_secret.clone().into_bytes())
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("KILLAGRAM_SESSION_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.sync_interval, Duration::from_secs(2));
        assert_eq!(config.admin_key, None);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn secret_is_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("KILLAGRAM_SESSION_SECRET", "change-me")]).is_err());
        assert!(config(&[("KILLAGRAM_SESSION_SECRET", "  ")]).is_err());
    }

    #[test]
    fn generated_secrets_are_decoded() {
        let secret = generate_secret();
        let config = config(&[("KILLAGRAM_SESSION_SECRET", secret.as_str())]).unwrap();
        assert_eq!(config.secret_bytes().len(), 32);

        let config = config_raw("plain-secret");
        assert_eq!(config.secret_bytes(), b"plain-secret");
    }

    fn config_raw(secret: &str) -> Config {
        config(&[("KILLAGRAM_SESSION_SECRET", secret)]).unwrap()
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("KILLAGRAM_SESSION_SECRET", "s3cr3t-value"),
            ("KILLAGRAM_PORT", "8080"),
            ("KILLAGRAM_SYNC_INTERVAL_MS", "250"),
            ("KILLAGRAM_ADMIN_KEY", "ops"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.sync_interval, Duration::from_millis(250));
        assert_eq!(config.admin_key.as_deref(), Some("ops"));

        assert!(config_err("KILLAGRAM_PORT", "eighty"));
    }

    #[test]
    fn zero_periods_and_limits_are_rejected() {
        for key in [
            "KILLAGRAM_SYNC_INTERVAL_MS",
            "KILLAGRAM_MAINTENANCE_SECS",
            "KILLAGRAM_RATE_LIMIT_PER_MINUTE",
        ] {
            let err = config(&[("KILLAGRAM_SESSION_SECRET", "s3cr3t-value"), (key, "0")])
                .unwrap_err()
                .to_string();
            assert!(err.contains(key), "{key}: {err}");
            assert!(config_err(key, "-5"), "{key}");
        }
    }

    fn config_err(key: &str, value: &str) -> bool {
        config(&[("KILLAGRAM_SESSION_SECRET", "s3cr3t-value"), (key, value)]).is_err()
    }
}
