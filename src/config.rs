use std::{env, net::SocketAddr, time::Duration};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub session_ttl: chrono::Duration,
    /// `None` disables the background re-match sweep.
    pub match_sweep_interval: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://rideasy.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let ttl_hours = parse_u64("SESSION_TTL_HOURS", 168)?;
        let session_ttl = i64::try_from(ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| AppError::Config("SESSION_TTL_HOURS out of range".into()))?;

        let sweep_secs = parse_u64("MATCH_SWEEP_SECS", 15)?;
        let match_sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        Ok(Self {
            database_url,
            listen_addr,
            session_ttl,
            match_sweep_interval,
        })
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
