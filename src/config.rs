use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub rpc: RpcConfig,
    pub oracle: OracleConfig,
    pub payment: PaymentConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "postgres" or "memory".
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Ordered settlement endpoints, first is preferred at startup.
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceSourceConfig {
    pub name: String,
    pub url: String,
    /// JSON pointer to the price field in the response body.
    pub json_pointer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// On-chain oracle account queried through the RPC pool.
    pub oracle_account: String,
    pub cache_ttl_secs: u64,
    /// Conservative rate used when every source fails and no cache exists,
    /// in reference units per native unit.
    pub fallback_rate: f64,
    /// Sanity bounds: rates outside this window are discarded as garbage.
    pub min_plausible_rate: f64,
    pub max_plausible_rate: f64,
    /// Ranked off-chain fallback sources.
    pub http_sources: Vec<PriceSourceConfig>,
}

impl OracleConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Address all metered payments settle to.
    pub recipient_address: String,
    /// Reference price applied when a service has no catalog entry.
    pub default_price_usd: f64,
    /// Custodial signing secret used when a request does not carry one.
    /// Dev/testnet convenience only.
    pub payer_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub workers: usize,
    /// Pending transactions older than this are re-registered at startup.
    pub restart_grace_secs: u64,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_price_sources() -> Vec<PriceSourceConfig> {
    vec![
        PriceSourceConfig {
            name: "coingecko".to_string(),
            url: "https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd"
                .to_string(),
            json_pointer: "/solana/usd".to_string(),
        },
        PriceSourceConfig {
            name: "coinbase".to_string(),
            url: "https://api.coinbase.com/v2/prices/SOL-USD/spot".to_string(),
            json_pointer: "/data/amount".to_string(),
        },
    ]
}

/// Parse `name|url|pointer;name|url|pointer` from PRICE_SOURCES.
fn parse_price_sources(raw: &str) -> Vec<PriceSourceConfig> {
    raw.split(';')
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, '|');
            let name = parts.next()?.trim();
            let url = parts.next()?.trim();
            let json_pointer = parts.next()?.trim();
            if name.is_empty() || url.is_empty() {
                return None;
            }
            Some(PriceSourceConfig {
                name: name.to_string(),
                url: url.to_string(),
                json_pointer: json_pointer.to_string(),
            })
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            database: DatabaseConfig {
                // Only required when STORE_BACKEND=postgres; main checks.
                url: env::var("DATABASE_URL").unwrap_or_default(),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            },
            store: StoreConfig {
                backend: env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string()),
            },
            rpc: RpcConfig {
                endpoints: env::var("SETTLEMENT_RPC_ENDPOINTS")
                    .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            oracle: OracleConfig {
                oracle_account: env::var("ORACLE_ACCOUNT").unwrap_or_default(),
                cache_ttl_secs: env::var("ORACLE_CACHE_TTL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                fallback_rate: env::var("ORACLE_FALLBACK_RATE")
                    .unwrap_or_else(|_| "100.0".to_string())
                    .parse()?,
                min_plausible_rate: env::var("ORACLE_MIN_RATE")
                    .unwrap_or_else(|_| "0.01".to_string())
                    .parse()?,
                max_plausible_rate: env::var("ORACLE_MAX_RATE")
                    .unwrap_or_else(|_| "100000.0".to_string())
                    .parse()?,
                http_sources: env::var("PRICE_SOURCES")
                    .map(|raw| parse_price_sources(&raw))
                    .unwrap_or_else(|_| default_price_sources()),
            },
            payment: PaymentConfig {
                recipient_address: env::var("PAYMENT_RECIPIENT_ADDRESS").unwrap_or_default(),
                default_price_usd: env::var("DEFAULT_PRICE_USD")
                    .unwrap_or_else(|_| "0.01".to_string())
                    .parse()?,
                payer_secret: env::var("PAYER_SECRET").ok(),
            },
            monitor: MonitorConfig {
                poll_interval_ms: env::var("MONITOR_POLL_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse::<u64>()?
                    * 1000,
                timeout_ms: env::var("MONITOR_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse::<u64>()?
                    * 1000,
                workers: env::var("MONITOR_WORKERS")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()?,
                restart_grace_secs: env::var("MONITOR_RESTART_GRACE_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
        })
    }
}
