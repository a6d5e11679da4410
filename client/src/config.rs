//! Client configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::ClientError;

/// Largest queue capacity or gate size the runtime can represent.
pub const MAX_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Configuration for the queueing, batching and limiting layer.
///
/// Transport settings (endpoints, timeouts, TLS) belong to the backend and
/// are not part of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Largest value accepted by `set_async`, e.g. "16MB". 0 disables the
    /// check.
    #[serde(default = "default_max_item_size", deserialize_with = "deserialize_size")]
    pub max_item_size: usize,

    /// Number of async write workers. Must be positive.
    #[serde(default = "default_max_async_concurrency")]
    pub max_async_concurrency: usize,

    /// Capacity of the async write queue. Must be positive.
    #[serde(default = "default_max_async_buffer_size")]
    pub max_async_buffer_size: usize,

    /// Maximum multi-get batches in flight at once. 0 means unlimited.
    #[serde(default = "default_max_get_multi_concurrency")]
    pub max_get_multi_concurrency: usize,

    /// Maximum keys per backend multi-get call. Must be positive.
    #[serde(default = "default_get_multi_batch_size")]
    pub get_multi_batch_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_item_size: default_max_item_size(),
            max_async_concurrency: default_max_async_concurrency(),
            max_async_buffer_size: default_max_async_buffer_size(),
            max_get_multi_concurrency: default_max_get_multi_concurrency(),
            get_multi_batch_size: default_get_multi_batch_size(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ClientError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.max_async_concurrency == 0 {
            return Err(ClientError::Config(
                "max async concurrency must be positive".to_string(),
            ));
        }
        if self.max_async_buffer_size == 0 {
            return Err(ClientError::Config(
                "max async buffer size must be positive".to_string(),
            ));
        }
        if self.get_multi_batch_size == 0 {
            return Err(ClientError::Config(
                "get multi batch size must be positive".to_string(),
            ));
        }
        if self.max_async_buffer_size > MAX_LIMIT {
            return Err(ClientError::Config(format!(
                "max async buffer size must not exceed {MAX_LIMIT}"
            )));
        }
        if self.max_get_multi_concurrency > MAX_LIMIT {
            return Err(ClientError::Config(format!(
                "max get multi concurrency must not exceed {MAX_LIMIT}"
            )));
        }
        Ok(())
    }
}

/// Logging configuration for binaries embedding the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Log format: "pretty", "json", or "compact".
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_format() -> String {
        "pretty".to_string()
    }
}

// Default value functions

fn default_max_item_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_max_async_concurrency() -> usize {
    50
}

fn default_max_async_buffer_size() -> usize {
    25_000
}

fn default_max_get_multi_concurrency() -> usize {
    100
}

fn default_get_multi_batch_size() -> usize {
    100
}

/// Deserialize a size string like "64MB" or a plain byte count.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "512KB", "16MB", "1GB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_item_size, 16 * 1024 * 1024);
        assert_eq!(config.max_async_concurrency, 50);
        assert_eq!(config.max_async_buffer_size, 25_000);
        assert_eq!(config.max_get_multi_concurrency, 100);
        assert_eq!(config.get_multi_batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = ClientConfig::parse("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn parses_sizes_and_overrides() {
        let config = ClientConfig::parse(
            r#"
            max_item_size = "1MB"
            max_async_concurrency = 4
            max_async_buffer_size = 128
            max_get_multi_concurrency = 0
            get_multi_batch_size = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.max_item_size, 1024 * 1024);
        assert_eq!(config.max_async_concurrency, 4);
        assert_eq!(config.max_async_buffer_size, 128);
        assert_eq!(config.max_get_multi_concurrency, 0);
        assert_eq!(config.get_multi_batch_size, 16);

        let config = ClientConfig::parse("max_item_size = 0").unwrap();
        assert_eq!(config.max_item_size, 0);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            ClientConfig::parse("endpoint = \"127.0.0.1:6379\""),
            Err(ClientError::Parse(_))
        ));
    }

    #[test]
    fn rejects_non_positive_limits() {
        for field in [
            "max_async_concurrency",
            "max_async_buffer_size",
            "get_multi_batch_size",
        ] {
            let err = ClientConfig::parse(&format!("{field} = 0")).unwrap_err();
            assert!(matches!(err, ClientError::Config(_)), "{field}: {err}");
        }
    }

    #[test]
    fn rejects_limits_above_runtime_maximum() {
        for field in ["max_async_buffer_size", "max_get_multi_concurrency"] {
            let err = ClientConfig::parse(&format!("{field} = 3000000000000000000")).unwrap_err();
            assert!(matches!(err, ClientError::Config(_)), "{field}: {err}");
        }

        let config = ClientConfig {
            max_async_buffer_size: MAX_LIMIT,
            max_get_multi_concurrency: MAX_LIMIT,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn size_strings() {
        assert_eq!(parse_size("100"), Ok(100));
        assert_eq!(parse_size("100B"), Ok(100));
        assert_eq!(parse_size("4kb"), Ok(4096));
        assert_eq!(parse_size(" 16MB "), Ok(16 * 1024 * 1024));
        assert_eq!(parse_size("1GiB"), Ok(1024 * 1024 * 1024));
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("12XB").is_err());
    }

    #[test]
    fn logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "pretty");
    }
}
