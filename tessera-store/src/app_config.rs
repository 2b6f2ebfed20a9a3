use serde::Deserialize;
use std::env;
use tessera_core::EventSeed;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub hold_ttl_seconds: i64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: tessera_core::service::DEFAULT_HOLD_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdempotencyConfig {
    pub lock_ttl_seconds: u64,
    pub response_ttl_seconds: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: tessera_core::idempotency::DEFAULT_LOCK_TTL.as_secs(),
            response_ttl_seconds: tessera_core::idempotency::DEFAULT_RESPONSE_TTL.as_secs(),
        }
    }
}

/// `interval_seconds = 0` leaves expiry to the external `release-expired` job.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SweeperConfig {
    pub interval_seconds: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `TESSERA_DATABASE__URL=postgres://...` overrides `database.url`
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

/// Events to provision, read from e.g. `config/events.toml`:
///
/// ```toml
/// [[events]]
/// id = "0b8f0c8e-5f0a-4c36-9d6e-6f3f6c1f2a10"
/// name = "Premium Live"
/// total_seats = 100
/// start_at = "2027-03-01T18:00:00Z"
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct EventCatalog {
    #[serde(default)]
    pub events: Vec<EventSeed>,
}

impl EventCatalog {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?
            .try_deserialize()
    }
}
