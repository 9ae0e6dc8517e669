use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use orbit_conversation::DEFAULT_HISTORY_WINDOW;

/// Secrets that ship in examples and docs. Refused unless explicitly allowed.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub generation_url: Option<String>,
    pub generation_api_key: String,
    pub generation_timeout: Duration,
    pub chatbot_name: String,
    pub history_window: usize,
    pub ack_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("ORBIT_JWT_SECRET").context("ORBIT_JWT_SECRET must be set")?;
        let allow_dev_secret = var("ORBIT_ALLOW_DEV_SECRET").is_some_and(|v| v == "1");
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) && !allow_dev_secret {
            bail!("ORBIT_JWT_SECRET is a placeholder value; set a real secret or ORBIT_ALLOW_DEV_SECRET=1");
        }

        let history_window = parse_or(var("ORBIT_HISTORY_WINDOW"), "ORBIT_HISTORY_WINDOW", DEFAULT_HISTORY_WINDOW)?;
        if history_window == 0 {
            bail!("ORBIT_HISTORY_WINDOW must be at least 1");
        }

        Ok(Self {
            host: var("ORBIT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(var("ORBIT_PORT"), "ORBIT_PORT", 3000)?,
            db_path: PathBuf::from(var("ORBIT_DB_PATH").unwrap_or_else(|| "orbit.db".into())),
            jwt_secret,
            generation_url: var("ORBIT_GENERATION_URL"),
            generation_api_key: var("ORBIT_GENERATION_API_KEY").unwrap_or_default(),
            generation_timeout: Duration::from_secs(parse_or(
                var("ORBIT_GENERATION_TIMEOUT_SECS"),
                "ORBIT_GENERATION_TIMEOUT_SECS",
                120,
            )?),
            chatbot_name: var("ORBIT_CHATBOT_NAME").unwrap_or_else(|| "Orbit".into()),
            history_window,
            ack_timeout: Duration::from_millis(parse_or(var("ORBIT_ACK_TIMEOUT_MS"), "ORBIT_ACK_TIMEOUT_MS", 5000)?),
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v.trim().parse().with_context(|| format!("invalid {}: {:?}", key, v)),
        None => Ok(default),
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
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = config(&[("ORBIT_JWT_SECRET", "s3cr3t-for-tests")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("orbit.db"));
        assert_eq!(config.generation_url, None);
        assert_eq!(config.chatbot_name, "Orbit");
        assert_eq!(config.history_window, 10);
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
        assert_eq!(config.generation_timeout, Duration::from_secs(120));
    }

    #[test]
    fn secret_is_required_and_placeholders_are_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("ORBIT_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(
            config(&[
                ("ORBIT_JWT_SECRET", "dev-secret-change-me"),
                ("ORBIT_ALLOW_DEV_SECRET", "1"),
            ])
            .is_ok()
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("ORBIT_JWT_SECRET", "s3cr3t-for-tests"),
            ("ORBIT_PORT", "8080"),
            ("ORBIT_GENERATION_URL", "http://localhost:5000/generate"),
            ("ORBIT_HISTORY_WINDOW", "4"),
            ("ORBIT_ACK_TIMEOUT_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.generation_url.as_deref(), Some("http://localhost:5000/generate"));
        assert_eq!(config.history_window, 4);
        assert_eq!(config.ack_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = config(&[("ORBIT_JWT_SECRET", "s3cr3t-for-tests"), ("ORBIT_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("ORBIT_PORT"));
        assert!(config(&[("ORBIT_JWT_SECRET", "s3cr3t-for-tests"), ("ORBIT_HISTORY_WINDOW", "0")]).is_err());
    }
}
