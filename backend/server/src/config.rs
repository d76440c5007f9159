use std::{env, fmt::Display, fs::read_to_string, ops::RangeInclusive, path::PathBuf, str::FromStr};

use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::{info, warn};

use crate::error::StartupError;

pub struct Config {
    pub port: u16,
    pub redis: ConnectionInfo,
    pub static_path: PathBuf,
    pub candidates: Vec<i64>,
    pub token_ttl_hours: i64,
}

impl Config {
    pub fn load() -> Result<Self, StartupError> {
        let host: String = try_load("REDIS_HOST", "127.0.0.1")?;
        let port: u16 = try_load("REDIS_PORT", "6379")?;
        let db: i64 = try_load("REDIS_DB", "0")?;
        let user = var("REDIS_USER").ok();
        let password = read_secret("REDIS_PASSWORD");

        Ok(Self {
            port: try_load("RUST_PORT", "8080")?,
            redis: redis_connection_info(host, port, db, user, password),
            static_path: try_load("STATIC_PATH", "./web/static")?,
            candidates: parse_candidates(&try_load::<String>("CANDIDATES", "45,13")?)?,
            token_ttl_hours: token_ttl_hours(try_load("VOTER_TOKEN_TTL_HOURS", "24")?)?,
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, StartupError>
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
            StartupError::Config {
                key,
                reason: e.to_string(),
            }
        })
}

/// Docker secret first, plain environment variable second. Absent means no auth.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret file ({e}), checking environment");
        })
        .or_else(|_| env::var(secret_name).map_err(|_| ()))
        .ok()
        .filter(|s| !s.is_empty())
}

/// Typed rather than a `redis://` URL so credentials never need escaping.
pub fn redis_connection_info(
    host: String,
    port: u16,
    db: i64,
    username: Option<String>,
    password: Option<String>,
) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db,
            username,
            password,
            ..RedisConnectionInfo::default()
        },
    }
}

/// One hour to one year. Zero or negative would expire the cookie on arrival.
const TOKEN_TTL_HOURS: RangeInclusive<i64> = 1..=8760;

pub fn token_ttl_hours(hours: i64) -> Result<i64, StartupError> {
    if TOKEN_TTL_HOURS.contains(&hours) {
        return Ok(hours);
    }

    warn!("Invalid VOTER_TOKEN_TTL_HOURS value: {hours}");
    Err(StartupError::Config {
        key: "VOTER_TOKEN_TTL_HOURS",
        reason: format!(
            "{hours} outside {}..={}",
            TOKEN_TTL_HOURS.start(),
            TOKEN_TTL_HOURS.end()
        ),
    })
}

pub fn parse_candidates(raw: &str) -> Result<Vec<i64>, StartupError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|e| StartupError::Config {
                key: "CANDIDATES",
                reason: format!("{s:?}: {e}"),
            })
        })
        .collect()
}
