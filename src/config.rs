use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::llm_providers::LLMProviderType;

// Import logging macros
use crate::log_validation;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub llm: LLMConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Object storage holding the uploaded source documents
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub url: String, // always ends with '/'
    pub access_key: String,
    pub bucket: String,
    pub timeout_secs: u64,
}

/// Large Language Model service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub provider: LLMProviderType,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_bytes: usize,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup; missing secrets are an error.
    /// Runs before the subscriber exists, so it stays silent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            database: DatabaseConfig::from_lookup(&lookup)?,
            storage: StorageConfig::from_lookup(&lookup)?,
            llm: LLMConfig::from_lookup(&lookup)?,
            server: ServerConfig::from_lookup(&lookup)?,
            logging: LoggingConfig::from_lookup(&lookup)?,
        })
    }

    /// Log a summary of loaded configuration (without sensitive data)
    pub fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            storage_url = %self.storage.url,
            storage_key_masked = %mask_sensitive_data(&self.storage.access_key),
            storage_bucket = %self.storage.bucket,
            llm_provider = ?self.llm.provider,
            llm_model = ?self.llm.model,
            llm_api_key_masked = %mask_sensitive_data(&self.llm.api_key),
            llm_timeout_secs = self.llm.timeout_secs,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if !self.storage.url.starts_with("http://") && !self.storage.url.starts_with("https://") {
            return Err(anyhow!("STORAGE_URL must be an http(s) URL"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.llm.timeout_secs == 0 || self.storage.timeout_secs == 0 {
            return Err(anyhow!("Request timeouts must be at least one second"));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(anyhow!("MAX_UPLOAD_BYTES must be greater than 0"));
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Unrecognised log level '{}', the filter may fall back to defaults", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(anyhow!("{} must be set", key)),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", key, raw)),
        None => Ok(default),
    }
}

fn flag_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse::<bool>().ok())
        .unwrap_or(default)
}

impl DatabaseConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let url = lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:study_forge.db".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl StorageConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let mut url = required(lookup, "STORAGE_URL")?;
        if !url.ends_with('/') {
            url.push('/');
        }
        let access_key = required(lookup, "STORAGE_KEY")?;
        let bucket = lookup("STORAGE_BUCKET").unwrap_or_else(|| "documents".to_string());
        let timeout_secs = parse_or(lookup, "STORAGE_TIMEOUT_SECS", 30u64)?;

        Ok(StorageConfig {
            url,
            access_key,
            bucket,
            timeout_secs,
        })
    }
}

impl LLMConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let api_key = required(lookup, "LLM_API_KEY")?;

        let base_url = lookup("LLM_BASE_URL");

        let provider_str = lookup("LLM_PROVIDER").unwrap_or_else(|| "gemini".to_string());

        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" | "google" => LLMProviderType::Gemini,
            "openai" | "chatgpt" | "gpt" => LLMProviderType::OpenAI,
            // unknown names fall back to Gemini
            _ => LLMProviderType::Gemini,
        };

        let model = lookup("LLM_MODEL");
        let timeout_secs = parse_or(lookup, "LLM_TIMEOUT_SECS", 60u64)?;

        Ok(LLMConfig {
            api_key,
            base_url,
            provider,
            model,
            timeout_secs,
        })
    }
}

impl ServerConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let port = parse_or(lookup, "PORT", 3000u16)?;
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let max_upload_bytes = parse_or(lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        Ok(ServerConfig {
            port,
            host,
            max_upload_bytes,
        })
    }
}

impl LoggingConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let level = lookup("RUST_LOG").unwrap_or_else(|| "info,study_forge=debug".to_string());
        let file_enabled = flag_or(lookup, "LOG_FILE_ENABLED", true);
        let console_enabled = flag_or(lookup, "LOG_CONSOLE_ENABLED", true);
        let log_directory = lookup("LOG_DIRECTORY").unwrap_or_else(|| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required_secrets() -> Vec<(&'static str, &'static str)> {
        vec![
            ("STORAGE_URL", "https://project.supabase.co"),
            ("STORAGE_KEY", "service-role-key-123"),
            ("LLM_API_KEY", "AIza-test-key"),
        ]
    }

    struct EventCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCounter {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_loading_emits_no_events() {
        use tracing_subscriber::layer::SubscriberExt;

        let events = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(EventCounter(events.clone()));

        let mut pairs = required_secrets();
        pairs.push(("LLM_PROVIDER", "somebody-else"));
        let config = tracing::subscriber::with_default(subscriber, || {
            Config::from_lookup(lookup_from(&pairs)).unwrap()
        });

        assert_eq!(config.llm.provider, LLMProviderType::Gemini);
        assert_eq!(events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("sqlite:study_forge.db"), "sqli***e.db");
        assert_eq!(mask_sensitive_data("sk-1234567890abcdef"), "sk-1***cdef");
    }

    #[test]
    fn test_defaults_with_required_secrets() {
        let config = Config::from_lookup(lookup_from(&required_secrets())).unwrap();

        assert_eq!(config.database.url, "sqlite:study_forge.db");
        assert_eq!(config.storage.url, "https://project.supabase.co/");
        assert_eq!(config.storage.bucket, "documents");
        assert_eq!(config.storage.timeout_secs, 30);
        assert_eq!(config.llm.provider, LLMProviderType::Gemini);
        assert_eq!(config.llm.timeout_secs, 60);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_each_secret_is_required() {
        for missing in ["STORAGE_URL", "STORAGE_KEY", "LLM_API_KEY"] {
            let pairs: Vec<(&str, &str)> = required_secrets()
                .into_iter()
                .filter(|(k, _)| *k != missing)
                .collect();
            let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(err.to_string().contains(missing), "error should name {}", missing);
        }
    }

    #[test]
    fn test_blank_secret_counts_as_missing() {
        let pairs = [
            ("STORAGE_URL", "https://project.supabase.co"),
            ("STORAGE_KEY", "service-role-key-123"),
            ("LLM_API_KEY", "   "),
        ];
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn test_llm_provider_parsing() {
        let test_cases = vec![
            ("openai", LLMProviderType::OpenAI),
            ("OpenAI", LLMProviderType::OpenAI),
            ("chatgpt", LLMProviderType::OpenAI),
            ("gpt", LLMProviderType::OpenAI),
            ("gemini", LLMProviderType::Gemini),
            ("Google", LLMProviderType::Gemini),
            ("unknown", LLMProviderType::Gemini),
        ];

        for (input, expected) in test_cases {
            let mut pairs = required_secrets();
            pairs.push(("LLM_PROVIDER", input));
            let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
            assert_eq!(config.llm.provider, expected, "Input '{}' should map to {:?}", input, expected);
        }
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        for key in ["PORT", "LLM_TIMEOUT_SECS", "STORAGE_TIMEOUT_SECS", "MAX_UPLOAD_BYTES"] {
            let mut pairs = required_secrets();
            pairs.push((key, "not-a-number"));
            assert!(Config::from_lookup(lookup_from(&pairs)).is_err(), "{} should be rejected", key);
        }
    }

    #[test]
    fn test_config_validation() {
        let config = Config::from_lookup(lookup_from(&required_secrets())).unwrap();

        let mut invalid = config.clone();
        invalid.server.port = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.database.url = "postgres://localhost/study".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.storage.url = "ftp://files.example.com/".to_string();
        assert!(invalid.validate().is_err());
    }
}
