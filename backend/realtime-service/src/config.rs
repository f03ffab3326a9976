use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which store implementation backs conversations, messages and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local maps; for development and tests only.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!("unknown STORE_BACKEND: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Key material for verifying identity tokens. Tokens are never issued here.
#[derive(Clone)]
pub enum JwtKey {
    /// RS256 public key (PEM)
    Rs256PublicPem(String),
    /// HS256 shared secret, development setups only
    Hs256Secret(String),
}

impl std::fmt::Debug for JwtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtKey::Rs256PublicPem(_) => f.write_str("Rs256PublicPem(..)"),
            JwtKey::Hs256Secret(_) => f.write_str("Hs256Secret([REDACTED])"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Delay before a sent message is marked delivered to online recipients
    pub delivery_delay: Duration,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            delivery_delay: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub dedupe_window: Duration,
    pub retention_days: i64,
    pub list_rate_per_minute: u32,
    pub cleanup_interval: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_secs(5),
            retention_days: 30,
            list_rate_per_minute: 100,
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub jwt_key: JwtKey,
    pub realtime: RealtimeConfig,
    pub notifications: NotificationConfig,
    pub cors_allowed_origin: Option<String>,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8085)?,
        };

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => StoreBackend::Postgres,
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config(
                "DATABASE_URL is required when STORE_BACKEND=postgres".into(),
            ));
        }

        let jwt_key = match (env::var("JWT_PUBLIC_KEY_PEM"), env::var("JWT_SECRET")) {
            (Ok(pem), _) if !pem.trim().is_empty() => JwtKey::Rs256PublicPem(pem),
            (_, Ok(secret)) if !secret.is_empty() => {
                tracing::warn!("JWT_SECRET set: verifying HS256 tokens, do not use in production");
                JwtKey::Hs256Secret(secret)
            }
            _ => {
                return Err(AppError::Config(
                    "one of JWT_PUBLIC_KEY_PEM or JWT_SECRET must be set".into(),
                ))
            }
        };

        let realtime = RealtimeConfig {
            delivery_delay: Duration::from_millis(env_parse("DELIVERY_DELAY_MS", 1000)?),
            heartbeat_interval: Duration::from_secs(env_parse("WS_HEARTBEAT_INTERVAL_SECS", 5)?),
            client_timeout: Duration::from_secs(env_parse("WS_CLIENT_TIMEOUT_SECS", 30)?),
        };

        let list_rate_per_minute = env_parse("NOTIFICATION_LIST_RATE_PER_MINUTE", 100u32)?;
        if list_rate_per_minute == 0 {
            return Err(AppError::Config(
                "NOTIFICATION_LIST_RATE_PER_MINUTE must be > 0".into(),
            ));
        }

        let notifications = NotificationConfig {
            dedupe_window: Duration::from_secs(env_parse("NOTIFICATION_DEDUPE_WINDOW_SECS", 5)?),
            retention_days: env_parse("NOTIFICATION_RETENTION_DAYS", 30)?,
            list_rate_per_minute,
            cleanup_interval: Duration::from_secs(env_parse(
                "NOTIFICATION_CLEANUP_INTERVAL_SECS",
                3600,
            )?),
        };

        Ok(Self {
            server,
            store_backend,
            database_url,
            jwt_key,
            realtime,
            notifications,
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN").ok(),
        })
    }

    /// In-memory configuration with an HS256 secret, used by tests and local runs.
    pub fn in_memory(secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8085,
            },
            store_backend: StoreBackend::Memory,
            database_url: None,
            jwt_key: JwtKey::Hs256Secret(secret.into()),
            realtime: RealtimeConfig::default(),
            notifications: NotificationConfig::default(),
            cors_allowed_origin: None,
        }
    }
}
