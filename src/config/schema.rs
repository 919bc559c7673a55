use std::path::Path;

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::remote::RemoteErrorKind;

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct TableSyncConfig {
    #[serde(default)]
    pub rate_limits: RateLimits,
    #[serde(default)]
    pub retry: Retry,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct RateLimits {
    pub general_per_second: u32,
    pub metadata_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            general_per_second: 10,
            metadata_per_minute: 12,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
    // Falls back to network, throttling and unavailability errors
    #[serde(default)]
    pub retryable: Option<Vec<RemoteErrorKind>>,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Retry {
    pub metadata: RetryConfig,
    pub upload: RetryConfig,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            metadata: RetryConfig {
                attempts: 2,
                delay_ms: 100,
                retryable: None,
            },
            upload: RetryConfig {
                attempts: 2,
                delay_ms: 1000,
                retryable: None,
            },
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PollConfig {
    pub max_polls: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    // When set, replaces the fixed interval
    #[serde(default)]
    pub backoff_ms: Option<Vec<u64>>,
}

fn default_interval_ms() -> u64 {
    1000
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Polling {
    pub schema_change: PollConfig,
    pub tsv_upload: PollConfig,
    pub row_append: PollConfig,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            schema_change: PollConfig {
                max_polls: 60,
                interval_ms: 1000,
                backoff_ms: None,
            },
            tsv_upload: PollConfig {
                max_polls: 40,
                interval_ms: 1000,
                backoff_ms: Some(vec![1000, 2000, 4000, 8000, 15000]),
            },
            row_append: PollConfig {
                max_polls: 60,
                interval_ms: 500,
                backoff_ms: None,
            },
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Logging {
    pub filter: String,
    pub json: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            filter: "tablesync=info".to_string(),
            json: false,
        }
    }
}

pub fn validate_config(config: TableSyncConfig) -> Result<TableSyncConfig, ConfigError> {
    for (name, retry) in [
        ("retry.metadata", &config.retry.metadata),
        ("retry.upload", &config.retry.upload),
    ] {
        if retry.attempts == 0 {
            return Err(ConfigError::Message(format!(
                "{name}.attempts must be at least 1"
            )));
        }
    }

    for (name, poll) in [
        ("polling.schema_change", &config.polling.schema_change),
        ("polling.tsv_upload", &config.polling.tsv_upload),
        ("polling.row_append", &config.polling.row_append),
    ] {
        if poll.max_polls == 0 {
            return Err(ConfigError::Message(format!(
                "{name}.max_polls must be at least 1"
            )));
        }
        if matches!(&poll.backoff_ms, Some(delays) if delays.is_empty()) {
            return Err(ConfigError::Message(format!(
                "{name}.backoff_ms must not be empty; omit it to poll at a fixed interval"
            )));
        }
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<TableSyncConfig, ConfigError> {
    let path = path.to_str().ok_or_else(|| {
        ConfigError::Message(format!("Invalid config path {}", path.display()))
    })?;
    let config = Config::builder().add_source(File::with_name(path));

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<TableSyncConfig, ConfigError> {
    let config =
        Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
