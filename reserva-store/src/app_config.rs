use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

/// Every tunable of the booking engine in one place. Values land in the
/// engine's pricing, availability and orchestrator configs at wiring time.
#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_alternative_slot_limit")]
    pub alternative_slot_limit: usize,
    #[serde(default = "default_alternative_step_minutes")]
    pub alternative_step_minutes: i64,
    /// 0 keeps the alternative search on the requested calendar day.
    #[serde(default)]
    pub alternative_horizon_days: u64,
    pub cancellation_notice_hours: i64,
    pub resource_lock_ttl_seconds: u64,
    pub snapshot_cache_ttl_seconds: u64,
    pub payment_max_attempts: u32,
    pub payment_base_delay_ms: u64,
    pub payment_timeout_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_seconds: u64,
    pub version_retry_limit: u32,
}

fn default_alternative_slot_limit() -> usize {
    5
}

fn default_alternative_step_minutes() -> i64 {
    30
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides, e.g. config/production.
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides kept out of version control.
            .add_source(config::File::with_name("config/local").required(false))
            // RESERVA__BUSINESS_RULES__CANCELLATION_NOTICE_HOURS=48 etc.
            .add_source(config::Environment::with_prefix("RESERVA").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
