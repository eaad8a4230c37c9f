use std::collections::HashMap;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => {
                write!(f, "Invalid value for {}: '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime settings shared by every engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuelConfig {
    pub queue_table: String,
    pub matches_table: String,
    pub queue_name: String,
    /// How many of the oldest waiting entries one claim attempt looks at.
    pub scan_limit: usize,
    /// Claim attempts after losing an opponent to a concurrent engine.
    pub max_claim_attempts: u32,
    pub retry: RetryPolicy,
    /// How often DynamoDB-backed subscriptions re-read their matches.
    pub poll_interval: Duration,
    /// A waiting session re-attempts a claim this often. `None` disables it.
    pub rescan_interval: Option<Duration>,
    /// A participant who answered correctly may claim the win once this much
    /// time has passed since match creation without an opponent answer.
    pub forfeit_after: Option<Duration>,
    pub question_bank_path: Option<String>,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            queue_table: "duel-queue".to_string(),
            matches_table: "duel-matches".to_string(),
            queue_name: "quickplay".to_string(),
            scan_limit: 10,
            max_claim_attempts: 5,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
            rescan_interval: Some(Duration::from_secs(2)),
            forfeit_after: None,
            question_bank_path: None,
        }
    }
}

impl DuelConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    /// Starts from the defaults and overrides whatever `lookup` provides.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("QUEUE_TABLE") {
            config.queue_table = value;
        }
        if let Some(value) = lookup("MATCHES_TABLE") {
            config.matches_table = value;
        }
        if let Some(value) = lookup("QUEUE_NAME") {
            config.queue_name = value;
        }
        if let Some(value) = parse(&lookup, "SCAN_LIMIT")? {
            config.scan_limit = positive("SCAN_LIMIT", value)?;
        }
        if let Some(value) = parse(&lookup, "MAX_CLAIM_ATTEMPTS")? {
            config.max_claim_attempts = positive("MAX_CLAIM_ATTEMPTS", value)?;
        }
        if let Some(value) = parse(&lookup, "RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = positive("RETRY_MAX_ATTEMPTS", value)?;
        }
        if let Some(millis) = parse(&lookup, "RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(millis);
        }
        if let Some(millis) = parse(&lookup, "RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(millis);
        }
        if let Some(millis) = parse::<u64, _>(&lookup, "POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(positive("POLL_INTERVAL_MS", millis)?);
        }
        if let Some(millis) = parse::<u64, _>(&lookup, "RESCAN_INTERVAL_MS")? {
            config.rescan_interval = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "FORFEIT_AFTER_SECS")? {
            config.forfeit_after = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(value) = lookup("QUESTION_BANK_PATH") {
            config.question_bank_path = Some(value).filter(|path| !path.trim().is_empty());
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
    }
}

fn positive<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// DynamoDB client from the ambient AWS environment.
pub async fn dynamodb_client() -> aws_sdk_dynamodb::Client {
    let config = aws_config::load_from_env().await;
    aws_sdk_dynamodb::Client::new(&config)
}
