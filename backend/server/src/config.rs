use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use payloads::DwellPolicy;
use thiserror::Error;
use tracing::{info, warn};

use crate::policy::ReadingPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {message}")]
    Invalid { key: String, message: String },

    #[error("Secret {0} missing")]
    MissingSecret(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Redis,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store {other}")),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub redis_url: String,
    pub token_secret: Vec<u8>,
    pub token_ttl: Duration,
    pub points_per_read: u64,
    pub policy: ReadingPolicy,
    pub allowed_origin: Option<String>,
    /// `id:minutes` pairs, only used by the memory store.
    pub seed_articles: Vec<(String, u32)>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let dwell = DwellPolicy {
            fraction: try_load("READ_DWELL_FRACTION", "0.3")?,
            floor_ms: try_load("READ_DWELL_FLOOR_MS", "10000")?,
            ceiling_ms: try_load("READ_DWELL_CEILING_MS", "300000")?,
        };

        let policy = ReadingPolicy {
            dwell,
            min_scroll_depth_percent: try_load("READ_MIN_SCROLL_PERCENT", "5.0")?,
            min_focus_ratio: try_load("READ_MIN_FOCUS_RATIO", "0.5")?,
            clock_skew_ms: try_load("READ_CLOCK_SKEW_MS", "2000")?,
        };
        check_policy(&policy)?;

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            store: try_load("READ_STORE", "redis")?,
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            token_secret: read_secret("READ_TOKEN_SECRET")?.into_bytes(),
            token_ttl: Duration::from_secs(try_load("READ_TOKEN_TTL_SECS", "7200")?),
            points_per_read: try_load("READ_POINTS", "10")?,
            policy,
            allowed_origin: var("READ_ALLOWED_ORIGIN").ok(),
            seed_articles: parse_articles(&try_load::<String>("READ_SEED_ARTICLES", "")?)?,
        })
    }
}

/// Thresholds that parse but could never credit anyone, or credit everyone.
fn check_policy(policy: &ReadingPolicy) -> Result<(), ConfigError> {
    let invalid = |key: &str, message: String| -> Result<(), ConfigError> {
        warn!("Invalid {key} value: {message}");

        Err(ConfigError::Invalid {
            key: key.to_string(),
            message,
        })
    };

    let scroll = policy.min_scroll_depth_percent;
    if !scroll.is_finite() || !(0.0..100.0).contains(&scroll) {
        return invalid(
            "READ_MIN_SCROLL_PERCENT",
            format!("{scroll} is outside 0 to 100"),
        );
    }

    let ratio = policy.min_focus_ratio;
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        return invalid("READ_MIN_FOCUS_RATIO", format!("{ratio} is outside 0 to 1"));
    }

    let fraction = policy.dwell.fraction;
    if !fraction.is_finite() || fraction < 0.0 {
        return invalid(
            "READ_DWELL_FRACTION",
            format!("{fraction} is not a non-negative number"),
        );
    }

    Ok(())
}

fn parse_articles(raw: &str) -> Result<Vec<(String, u32)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let invalid = || ConfigError::Invalid {
                key: "READ_SEED_ARTICLES".to_string(),
                message: format!("expected id:minutes, got {pair}"),
            };

            let (id, minutes) = pair.rsplit_once(':').ok_or_else(invalid)?;
            let minutes: u32 = minutes.trim().parse().map_err(|_| invalid())?;

            Ok((id.trim().to_string(), minutes))
        })
        .collect()
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");

            ConfigError::Invalid {
                key: key.to_string(),
                message: e.to_string(),
            }
        })
}

fn read_secret(secret_name: &str) -> Result<String, ConfigError> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}, trying environment");
            env::var(secret_name).map(|s| s.trim().to_string())
        })
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingSecret(secret_name.to_string()))
}
