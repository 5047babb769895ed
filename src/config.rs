//! Configuration types.
//!
//! All business-policy values (eligibility windows, reply timeout, retry
//! bounds) live here rather than as constants — they are merchant policy,
//! not derived from any deeper constraint.

use std::time::Duration;

use crate::error::ConfigError;
use crate::order::FulfillmentMethod;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum extraction confidence required to start a workflow.
    /// Anything below this is routed to manual triage.
    pub min_intent_confidence: f32,
    /// Fallback fulfillment method when the merchant has not configured one.
    pub default_fulfillment_method: FulfillmentMethod,
    pub eligibility: EligibilityConfig,
    pub escalation: EscalationConfig,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_intent_confidence: 0.75,
            default_fulfillment_method: FulfillmentMethod::SelfFulfillment,
            eligibility: EligibilityConfig::default(),
            escalation: EscalationConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from `ORDER_ASSIST_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = read_env("ORDER_ASSIST_MIN_CONFIDENCE")? {
            config.min_intent_confidence = parse_value("ORDER_ASSIST_MIN_CONFIDENCE", &v)?;
        }
        if let Some(v) = read_env("ORDER_ASSIST_DEFAULT_METHOD")? {
            config.default_fulfillment_method =
                FulfillmentMethod::parse(&v).ok_or_else(|| ConfigError::InvalidValue {
                    key: "ORDER_ASSIST_DEFAULT_METHOD".into(),
                    message: format!("unknown fulfillment method: {v}"),
                })?;
        }
        if let Some(v) = read_env("ORDER_ASSIST_FLAT_WINDOW_HOURS")? {
            config.eligibility.flat_window_hours =
                parse_value("ORDER_ASSIST_FLAT_WINDOW_HOURS", &v)?;
        }
        if let Some(v) = read_env("ORDER_ASSIST_FRIDAY_AFTERNOON_HOUR")? {
            config.eligibility.friday_afternoon_hour =
                parse_value("ORDER_ASSIST_FRIDAY_AFTERNOON_HOUR", &v)?;
        }
        if let Some(v) = read_env("ORDER_ASSIST_MONDAY_CUTOFF_HOUR")? {
            config.eligibility.monday_cutoff_hour =
                parse_value("ORDER_ASSIST_MONDAY_CUTOFF_HOUR", &v)?;
        }
        if let Some(v) = read_env("ORDER_ASSIST_REPLY_TIMEOUT_SECS")? {
            config.escalation.reply_timeout =
                Duration::from_secs(parse_value("ORDER_ASSIST_REPLY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = read_env("ORDER_ASSIST_SWEEP_INTERVAL_SECS")? {
            config.escalation.sweep_interval =
                Duration::from_secs(parse_value("ORDER_ASSIST_SWEEP_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = read_env("ORDER_ASSIST_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = parse_value("ORDER_ASSIST_RETRY_MAX_ATTEMPTS", &v)?;
        }

        Ok(config)
    }
}

/// Eligibility window policy for time-barred fulfillment methods.
///
/// Hours are interpreted in UTC; merchants in other zones tune the hour
/// values to match their warehouse's local schedule.
#[derive(Debug, Clone)]
pub struct EligibilityConfig {
    /// Flat modification window for orders placed Monday–Friday morning.
    pub flat_window_hours: i64,
    /// Orders placed on Friday at or after this hour get the weekend grace
    /// window. Warehouse pick/pack does not run on weekends.
    pub friday_afternoon_hour: u32,
    /// Weekend-grace orders stay modifiable until Monday at this hour.
    pub monday_cutoff_hour: u32,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            flat_window_hours: 24,
            friday_afternoon_hour: 12,
            monday_cutoff_hour: 12,
        }
    }
}

/// Escalation policy for workflows awaiting a warehouse reply.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// How long to wait for a warehouse reply before escalating.
    pub reply_timeout: Duration,
    /// How often the escalation sweep runs.
    pub sweep_interval: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(8 * 3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Bounded exponential backoff for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

fn read_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        }),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.into(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.eligibility.flat_window_hours, 24);
        assert_eq!(config.eligibility.friday_afternoon_hour, 12);
        assert_eq!(config.eligibility.monday_cutoff_hour, 12);
        assert_eq!(config.escalation.reply_timeout, Duration::from_secs(8 * 3600));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<u32>("SOME_KEY", "not-a-number").unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "SOME_KEY"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
