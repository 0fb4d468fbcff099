use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use colloquy_api::entitlements::Entitlements;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub title_model: String,
    pub retrieval_url: String,
    pub enabled_tools: Vec<String>,
    pub max_steps: usize,
    pub smooth_delay: Duration,
    pub entitlements: Entitlements,
    pub stream_retention: Duration,
    pub max_duration: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("COLLOQUY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COLLOQUY_JWT_SECRET is unset or still a placeholder; it must match the identity service's secret");
        }
        let openai_api_key = get("OPENAI_API_KEY").filter(|v| !v.is_empty()).context("OPENAI_API_KEY is not set")?;

        let defaults = Entitlements::default();
        Ok(Self {
            host: var("COLLOQUY_HOST", "0.0.0.0"),
            port: parse(&get, "COLLOQUY_PORT", 3000)?,
            db_path: var("COLLOQUY_DB_PATH", "colloquy.db").into(),
            jwt_secret,
            openai_api_key,
            openai_base_url: var("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            chat_model: var("COLLOQUY_CHAT_MODEL", "gpt-4o"),
            title_model: var("COLLOQUY_TITLE_MODEL", "gpt-4.1"),
            retrieval_url: var("COLLOQUY_RETRIEVAL_URL", "http://localhost:8000"),
            enabled_tools: var("COLLOQUY_ENABLED_TOOLS", "getInformation")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            max_steps: parse(&get, "COLLOQUY_MAX_STEPS", 5)?,
            smooth_delay: Duration::from_millis(parse(&get, "COLLOQUY_SMOOTH_DELAY_MS", 20)?),
            entitlements: Entitlements {
                guest_max_messages_per_day: parse(
                    &get,
                    "COLLOQUY_MAX_MESSAGES_GUEST",
                    defaults.guest_max_messages_per_day,
                )?,
                regular_max_messages_per_day: parse(
                    &get,
                    "COLLOQUY_MAX_MESSAGES_REGULAR",
                    defaults.regular_max_messages_per_day,
                )?,
            },
            stream_retention: Duration::from_secs(parse(&get, "COLLOQUY_STREAM_RETENTION_SECS", 600)?),
            max_duration: Duration::from_secs(parse(&get, "COLLOQUY_MAX_DURATION_SECS", 60)?),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key).filter(|v| !v.is_empty()) {
        Some(v) => v.trim().parse().with_context(|| format!("{key} has an invalid value '{v}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_fill_everything_but_secrets() {
        let config = Config::from_lookup(lookup(&[
            ("COLLOQUY_JWT_SECRET", "a-real-secret"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.enabled_tools, vec!["getInformation"]);
        assert_eq!(config.entitlements, Entitlements::default());
        assert_eq!(config.smooth_delay, Duration::from_millis(20));
    }

    #[test]
    fn placeholder_secret_is_refused() {
        let err = Config::from_lookup(lookup(&[
            ("COLLOQUY_JWT_SECRET", "dev-secret-change-me"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("COLLOQUY_JWT_SECRET"));
        assert!(Config::from_lookup(lookup(&[("COLLOQUY_JWT_SECRET", "a-real-secret")])).is_err());
    }

    #[test]
    fn tool_list_and_numbers_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("COLLOQUY_JWT_SECRET", "a-real-secret"),
            ("OPENAI_API_KEY", "sk-test"),
            ("COLLOQUY_ENABLED_TOOLS", "getInformation, understandQuery"),
            ("COLLOQUY_MAX_MESSAGES_GUEST", "3"),
        ]))
        .unwrap();
        assert_eq!(config.enabled_tools, vec!["getInformation", "understandQuery"]);
        assert_eq!(config.entitlements.guest_max_messages_per_day, 3);

        assert!(
            Config::from_lookup(lookup(&[
                ("COLLOQUY_JWT_SECRET", "a-real-secret"),
                ("OPENAI_API_KEY", "sk-test"),
                ("COLLOQUY_PORT", "http"),
            ]))
            .is_err()
        );
    }
}
