use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use validator::Validate;

/// Upper bound on a single backoff sleep between fetch attempts.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    pub publisher: PublisherConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScraperConfig {
    #[validate(range(min = 1, max = 32))]
    pub max_concurrent_stores: usize,
    /// Retries after the first attempt for transient failures.
    #[validate(range(max = 10))]
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_delay_ms: u64,
    /// Per-request HTTP timeout in seconds.
    #[validate(range(min = 1))]
    pub request_timeout: u64,
    /// Ceiling for a single fetch attempt of a whole store, in seconds.
    #[validate(range(min = 1))]
    pub store_timeout: u64,
    /// A store stuck in `scraping` longer than this is forced offline, in seconds.
    #[validate(range(min = 1))]
    pub watchdog_ceiling: u64,
    #[validate(length(min = 1))]
    pub user_agent: String,
    /// Pause between category pages of one store.
    pub politeness_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Five-field cron expression (minute hour day month weekday).
    pub interval: String,
    /// How often the stuck-store watchdog runs, in seconds.
    pub watchdog_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stdout only when unset.
    pub directory: Option<String>,
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/crops.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stores: 3,
            retry_attempts: 2,
            retry_delay_ms: 2000,
            request_timeout: 30,
            store_timeout: 120,
            watchdog_ceiling: 900,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 CropsWatcher/0.1"
                .to_string(),
            politeness_delay_ms: 500,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "*/5 * * * *".to_string(),
            watchdog_interval: 60,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            level: "info".to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout)
    }

    pub fn watchdog_ceiling(&self) -> Duration {
        Duration::from_secs(self.watchdog_ceiling)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }

    /// Sleeps between attempts: roughly `retry_delay`, doubling, one per retry.
    pub fn retry_backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.retry_delay_ms / 2).max(1))
            .max_delay(MAX_RETRY_BACKOFF)
            .take(self.retry_attempts as usize)
    }

    /// Longest a store fetch can legitimately take: every attempt hitting
    /// `store_timeout` plus every backoff sleep.
    pub fn worst_case_fetch(&self) -> Duration {
        let attempts = self.retry_attempts.saturating_add(1);
        self.retry_backoff()
            .fold(self.store_timeout().saturating_mul(attempts), Duration::saturating_add)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Built-in defaults so a bare checkout still starts
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("CROPS").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Message("Database url must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if let Err(e) = Validate::validate(&self.scraper) {
            return Err(ConfigError::Message(format!("Invalid scraper configuration: {}", e)));
        }

        if self.scraper.store_timeout < self.scraper.request_timeout {
            return Err(ConfigError::Message(
                "Scraper store_timeout cannot be shorter than request_timeout".into(),
            ));
        }

        let worst_case = self.scraper.worst_case_fetch();
        if self.scraper.watchdog_ceiling() <= worst_case {
            return Err(ConfigError::Message(format!(
                "Scraper watchdog_ceiling ({}s) must exceed the worst-case fetch time with retries ({}s)",
                self.scraper.watchdog_ceiling,
                worst_case.as_secs_f64()
            )));
        }

        if !is_valid_cron(&self.scheduler.interval) {
            return Err(ConfigError::Message(
                "Invalid cron expression in scheduler.interval".into(),
            ));
        }

        if self.scheduler.watchdog_interval == 0 {
            return Err(ConfigError::Message(
                "Scheduler watchdog_interval must be greater than 0".into(),
            ));
        }

        if self.publisher.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "Publisher channel_capacity must be greater than 0".into(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}

/// Five fields (minute hour day month weekday) of digits, ranges, lists, steps and wildcards.
pub fn is_valid_cron(cron_expr: &str) -> bool {
    let parts: Vec<&str> = cron_expr.split_whitespace().collect();
    if parts.len() != 5 {
        return false;
    }

    parts.iter().all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_digit() || c == '*' || c == '-' || c == ',' || c == '/')
    })
}
