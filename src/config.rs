use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::blockchain::DEFAULT_DIFFICULTY;
use crate::error::{LedgerError, Result};
use crate::peers::{DEFAULT_PEER_TIMEOUT, normalize_address};

/// Runtime settings, read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Base URL other nodes reach us at.
    pub node_address: String,
    pub difficulty: u32,
    /// Liveness ticks before a silent peer is evicted.
    pub peer_timeout: u32,
    pub keep_alive_interval: Duration,
    pub mine_interval: Duration,
    pub peer_request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let host = "127.0.0.1".to_string();
        let port = 8080;
        Self {
            node_address: format!("http://{host}:{port}"),
            host,
            port,
            difficulty: DEFAULT_DIFFICULTY,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            keep_alive_interval: Duration::from_secs(180),
            mine_interval: Duration::from_secs(30),
            peer_request_timeout: Duration::from_millis(5000),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults, set but
    /// unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse(&lookup, "PORT", defaults.port)?;
        let node_address = lookup("NODE_ADDRESS")
            .map(|a| normalize_address(&a))
            .unwrap_or_else(|| format!("http://{host}:{port}"));

        let config = Self {
            host,
            port,
            node_address,
            difficulty: parse(&lookup, "DIFFICULTY", defaults.difficulty)?,
            peer_timeout: parse(&lookup, "PEER_TIMEOUT", defaults.peer_timeout)?,
            keep_alive_interval: Duration::from_secs(parse(
                &lookup,
                "KEEP_ALIVE_INTERVAL_SECS",
                defaults.keep_alive_interval.as_secs(),
            )?),
            mine_interval: Duration::from_secs(parse(
                &lookup,
                "MINE_INTERVAL_SECS",
                defaults.mine_interval.as_secs(),
            )?),
            peer_request_timeout: Duration::from_millis(parse(
                &lookup,
                "PEER_REQUEST_TIMEOUT_MS",
                defaults.peer_request_timeout.as_millis() as u64,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.difficulty > 64 {
            return Err(LedgerError::Config("DIFFICULTY must be at most 64".into()));
        }
        if self.peer_timeout == 0 {
            return Err(LedgerError::Config("PEER_TIMEOUT must be positive".into()));
        }
        if self.keep_alive_interval.is_zero() || self.mine_interval.is_zero() {
            return Err(LedgerError::Config("intervals must be positive".into()));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| LedgerError::Config(format!("invalid {key}: {raw:?}"))),
        None => Ok(default),
    }
}
