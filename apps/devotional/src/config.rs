use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::novelty::fingerprint::DEFAULT_TOKEN_MIN_LEN;
use crate::novelty::gate::{NoveltyPolicy, ScripturePolicy};
use crate::providers::retry::RetryPolicy;
use crate::providers::{ProviderDescriptor, ProviderKind};

const DEFAULT_PROVIDER_ORDER: &str = "groq,openai,deepseek,anthropic";

/// Known providers: (name, kind, endpoint, model).
const BUILTIN_PROVIDERS: &[(&str, ProviderKind, &str, &str)] = &[
    (
        "groq",
        ProviderKind::OpenAi,
        "https://api.groq.com/openai/v1/chat/completions",
        "llama-3.3-70b-versatile",
    ),
    (
        "openai",
        ProviderKind::OpenAi,
        "https://api.openai.com/v1/chat/completions",
        "gpt-4o-mini",
    ),
    (
        "deepseek",
        ProviderKind::OpenAi,
        "https://api.deepseek.com/v1/chat/completions",
        "deepseek-chat",
    ),
    (
        "anthropic",
        ProviderKind::Anthropic,
        "https://api.anthropic.com/v1/messages",
        "claude-sonnet-4-5",
    ),
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}='{value}' is invalid: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("provider '{name}' has an API key but no {missing}")]
    IncompleteProvider { name: String, missing: String },
}

/// Run configuration loaded from environment variables (and `.env`).
/// Immutable once built; passed explicitly to everything that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub devotional_dir: PathBuf,
    pub tracker_path: PathBuf,
    pub write_markdown: bool,
    pub ledger_capacity: usize,
    pub max_attempts: u32,
    pub token_min_len: usize,
    pub novelty: NoveltyPolicy,
    /// In priority order; providers without an API key are already dropped.
    pub providers: Vec<ProviderDescriptor>,
    /// Names from `PROVIDER_ORDER` left out for lack of an API key.
    pub skipped_providers: Vec<String>,
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    pub base_temperature: f32,
    pub temperature_step: f32,
    pub max_tokens: u32,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the config from any variable source.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let novelty = NoveltyPolicy {
            title_threshold: vars.fraction("TITLE_SIMILARITY_THRESHOLD", 0.7)?,
            content_exact_threshold: vars.fraction("CONTENT_EXACT_THRESHOLD", 1.0)?,
            content_overlap_threshold: vars.fraction("CONTENT_OVERLAP_THRESHOLD", 0.5)?,
            content_window: vars.positive("CONTENT_COMPARE_WINDOW", 20)?,
            scripture_lookback_days: vars.parse("SCRIPTURE_LOOKBACK_DAYS", 21i64)?,
            scripture_policy: vars.parse("SCRIPTURE_REUSE_POLICY", ScripturePolicy::Reject)?,
        };
        if novelty.scripture_lookback_days < 0 {
            return Err(invalid(
                "SCRIPTURE_LOOKBACK_DAYS",
                novelty.scripture_lookback_days,
                "must not be negative",
            ));
        }

        let base_temperature: f32 = vars.parse("BASE_TEMPERATURE", 0.9)?;
        if !(0.0..=2.0).contains(&base_temperature) {
            return Err(invalid("BASE_TEMPERATURE", base_temperature, "must be within [0, 2]"));
        }
        let temperature_step: f32 = vars.parse("TEMPERATURE_STEP", 0.05)?;
        if temperature_step < 0.0 {
            return Err(invalid("TEMPERATURE_STEP", temperature_step, "must not be negative"));
        }

        let backoff_ms: u64 = vars.parse("PROVIDER_BACKOFF_MS", 500)?;
        let (providers, skipped_providers) = resolve_providers(&vars)?;

        Ok(Config {
            devotional_dir: PathBuf::from(vars.string("DEVOTIONAL_DIR", "devotionals")),
            tracker_path: PathBuf::from(vars.string("TRACKER_PATH", "content_tracker.json")),
            write_markdown: vars.flag("WRITE_MARKDOWN", true)?,
            ledger_capacity: vars.positive("LEDGER_CAPACITY", 90)?,
            max_attempts: vars.positive("MAX_ATTEMPTS", 3)?,
            token_min_len: vars.parse("TOKEN_MIN_LENGTH", DEFAULT_TOKEN_MIN_LEN)?,
            novelty,
            providers,
            skipped_providers,
            provider_timeout: Duration::from_secs(vars.positive("PROVIDER_TIMEOUT_SECS", 30)?),
            retry: RetryPolicy {
                max_retries: vars.parse("PROVIDER_MAX_RETRIES", 2)?,
                base_delay: Duration::from_millis(backoff_ms),
                max_delay: Duration::from_millis(backoff_ms.saturating_mul(16)),
            },
            base_temperature,
            temperature_step,
            max_tokens: vars.positive("MAX_TOKENS", 900)?,
            rust_log: vars.string("RUST_LOG", "info"),
        })
    }

    /// Sampling temperature for a 1-based attempt, rising with each attempt.
    pub fn temperature_for(&self, attempt: u32) -> f32 {
        (self.base_temperature + self.temperature_step * attempt as f32).min(1.5)
    }
}

/// Configured providers in priority order, plus the names skipped for lack of a key.
fn resolve_providers(
    vars: &Vars<'_>,
) -> Result<(Vec<ProviderDescriptor>, Vec<String>), ConfigError> {
    let order = vars.string("PROVIDER_ORDER", DEFAULT_PROVIDER_ORDER);
    let mut seen = HashSet::new();
    let mut providers = Vec::new();
    let mut skipped = Vec::new();

    for name in order.split(',').map(|n| n.trim().to_ascii_lowercase()) {
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        let prefix = name.to_ascii_uppercase().replace('-', "_");

        let api_key = match vars.get(&format!("{prefix}_API_KEY")) {
            Some(key) => key,
            None => {
                skipped.push(name);
                continue;
            }
        };

        let builtin = BUILTIN_PROVIDERS.iter().find(|(n, ..)| *n == name);
        let kind = match vars.get(&format!("{prefix}_KIND")) {
            Some(raw) => raw
                .parse::<ProviderKind>()
                .map_err(|reason| invalid(&format!("{prefix}_KIND"), &raw, reason))?,
            None => builtin.map(|b| b.1).unwrap_or(ProviderKind::OpenAi),
        };
        let endpoint = vars
            .get(&format!("{prefix}_ENDPOINT"))
            .or_else(|| builtin.map(|b| b.2.to_string()))
            .ok_or_else(|| ConfigError::IncompleteProvider {
                name: name.clone(),
                missing: format!("{prefix}_ENDPOINT"),
            })?;
        let model = vars
            .get(&format!("{prefix}_MODEL"))
            .or_else(|| builtin.map(|b| b.3.to_string()))
            .ok_or_else(|| ConfigError::IncompleteProvider {
                name: name.clone(),
                missing: format!("{prefix}_MODEL"),
            })?;

        providers.push(ProviderDescriptor {
            name,
            kind,
            endpoint,
            model,
            api_key,
        });
    }

    Ok((providers, skipped))
}

fn invalid(key: &str, value: impl ToString, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Typed accessors over a variable lookup. Blank values count as unset.
struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        match self.get(key) {
            Some(raw) => raw.parse::<T>().map_err(|e| invalid(key, &raw, e)),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + ToString,
        T::Err: ToString,
    {
        let value = self.parse(key, default)?;
        if value <= T::default() {
            return Err(invalid(key, value, "must be greater than zero"));
        }
        Ok(value)
    }

    fn fraction(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = self.parse(key, default)?;
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid(key, value, "must be within [0, 1]"));
        }
        Ok(value)
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(invalid(key, v, "expected true or false")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.devotional_dir, PathBuf::from("devotionals"));
        assert_eq!(c.tracker_path, PathBuf::from("content_tracker.json"));
        assert!(c.write_markdown);
        assert_eq!(c.ledger_capacity, 90);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.token_min_len, 3);
        assert_eq!(c.novelty, NoveltyPolicy::default());
        assert!(c.providers.is_empty());
        assert_eq!(c.provider_timeout, Duration::from_secs(30));
        assert_eq!(c.retry.max_retries, 2);
        assert_eq!(c.max_tokens, 900);
        assert_eq!(c.rust_log, "info");
    }

    #[test]
    fn test_providers_follow_order_and_skip_missing_keys() {
        let c = config(&[
            ("PROVIDER_ORDER", "openai, groq,openai"),
            ("GROQ_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "o-key"),
            ("OPENAI_MODEL", "gpt-4.1-mini"),
            ("ANTHROPIC_API_KEY", "a-key"),
        ])
        .unwrap();

        let names: Vec<&str> = c.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["openai", "groq"]);
        assert_eq!(c.providers[0].model, "gpt-4.1-mini");
        assert_eq!(c.providers[1].model, "llama-3.3-70b-versatile");
        assert_eq!(c.providers[1].kind, ProviderKind::OpenAi);
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let c = config(&[("GROQ_API_KEY", "   ")]).unwrap();
        assert!(c.providers.is_empty());
    }

    #[test]
    fn test_skipped_providers_are_reported() {
        let c = config(&[("OPENAI_API_KEY", "o-key")]).unwrap();
        assert_eq!(c.skipped_providers, vec!["groq", "deepseek", "anthropic"]);

        let c = config(&[("PROVIDER_ORDER", "groq,groq"), ("GROQ_API_KEY", "g")]).unwrap();
        assert!(c.skipped_providers.is_empty());
    }

    #[test]
    fn test_default_order_includes_anthropic() {
        let c = config(&[("ANTHROPIC_API_KEY", "a-key")]).unwrap();
        assert_eq!(c.providers.len(), 1);
        assert_eq!(c.providers[0].kind, ProviderKind::Anthropic);
        assert_eq!(c.providers[0].endpoint, "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn test_custom_provider_needs_endpoint_and_model() {
        let err = config(&[
            ("PROVIDER_ORDER", "local-llm"),
            ("LOCAL_LLM_API_KEY", "k"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::IncompleteProvider {
                name: "local-llm".into(),
                missing: "LOCAL_LLM_ENDPOINT".into()
            }
        );

        let c = config(&[
            ("PROVIDER_ORDER", "local-llm"),
            ("LOCAL_LLM_API_KEY", "k"),
            ("LOCAL_LLM_ENDPOINT", "http://localhost:8000/v1/messages"),
            ("LOCAL_LLM_MODEL", "m"),
            ("LOCAL_LLM_KIND", "anthropic"),
        ])
        .unwrap();
        assert_eq!(c.providers[0].kind, ProviderKind::Anthropic);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config(&[("TITLE_SIMILARITY_THRESHOLD", "1.5")]).is_err());
        assert!(config(&[("CONTENT_OVERLAP_THRESHOLD", "-0.1")]).is_err());
        assert!(config(&[("MAX_ATTEMPTS", "0")]).is_err());
        assert!(config(&[("LEDGER_CAPACITY", "0")]).is_err());
        assert!(config(&[("LEDGER_CAPACITY", "many")]).is_err());
        assert!(config(&[("SCRIPTURE_REUSE_POLICY", "ignore")]).is_err());
        assert!(config(&[("SCRIPTURE_LOOKBACK_DAYS", "-1")]).is_err());
        assert!(config(&[("WRITE_MARKDOWN", "maybe")]).is_err());
        assert!(config(&[("GROQ_API_KEY", "k"), ("GROQ_KIND", "soap")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("SCRIPTURE_REUSE_POLICY", "WARN"),
            ("WRITE_MARKDOWN", "false"),
            ("CONTENT_COMPARE_WINDOW", "5"),
        ])
        .unwrap();
        assert_eq!(c.novelty.scripture_policy, ScripturePolicy::Warn);
        assert!(!c.write_markdown);
        assert_eq!(c.novelty.content_window, 5);
    }

    #[test]
    fn test_temperature_rises_and_caps() {
        let c = config(&[]).unwrap();
        assert!((c.temperature_for(1) - 0.95).abs() < 1e-6);
        assert!((c.temperature_for(2) - 1.0).abs() < 1e-6);
        assert_eq!(c.temperature_for(100), 1.5);
    }
}
