use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub algod_url: String,
    pub algod_token: String,
    pub indexer_url: String,
    /// TTL of the per-asset run lock
    pub lock_ttl_secs: u64,
    /// TTL of cached account holdings
    pub holdings_ttl_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Rounds to wait for a submitted transaction before giving up
    pub confirmation_wait_rounds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/rewards".to_string()),
            algod_url: std::env::var("ALGOD_URL")
                .unwrap_or_else(|_| "https://mainnet-api.algonode.cloud".to_string()),
            algod_token: std::env::var("ALGOD_TOKEN").unwrap_or_default(),
            indexer_url: std::env::var("INDEXER_URL")
                .unwrap_or_else(|_| "https://mainnet-idx.algonode.cloud".to_string()),
            lock_ttl_secs: std::env::var("SETTLEMENT_LOCK_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            holdings_ttl_secs: std::env::var("HOLDINGS_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            retry_max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            retry_base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(250),
            confirmation_wait_rounds: std::env::var("CONFIRMATION_WAIT_ROUNDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        })
    }
}
