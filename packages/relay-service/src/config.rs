//! Configuration, loaded from the environment (`.env` tolerated, never
//! required). Mirrors the relayer's per-subsystem config structs: a
//! custom `Debug` redacts secrets, and `validate()` runs once after
//! load so a misconfigured deployment fails at startup rather than on
//! the first request.

use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use eyre::{eyre, Result, WrapErr};

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig").field("url", &"<redacted>").finish()
    }
}

#[derive(Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub registry_address: String,
    pub usdc_address: String,
    pub relay_private_key: String,
    pub relay_host: String,
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("registry_address", &self.registry_address)
            .field("usdc_address", &self.usdc_address)
            .field("relay_private_key", &"<redacted>")
            .field("relay_host", &self.relay_host)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
}

#[derive(Clone)]
pub struct IpfsConfig {
    pub api_url: String,
    pub gateway_url: String,
}

impl fmt::Debug for IpfsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpfsConfig")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    pub admin_token: String,
    pub rate_limit_attempts: u32,
    pub rate_limit_window: Duration,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("admin_token", &"<redacted>")
            .field("rate_limit_attempts", &self.rate_limit_attempts)
            .field("rate_limit_window", &self.rate_limit_window)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub duplicate_window: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    pub batch_interval: Duration,
    pub deposit_sync_interval: Duration,
    pub link_cleanup_interval: Duration,
    pub reconcile_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub store: StoreConfig,
    pub ipfs: IpfsConfig,
    pub auth: AuthConfig,
    pub guard: GuardConfig,
    pub http: HttpConfig,
    pub background: BackgroundConfig,
}

fn default_rate_limit_attempts() -> u32 {
    5
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_duplicate_window_secs() -> u64 {
    5
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| eyre!("{key} is not a valid value")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads `.env` if present, then reads from the environment. Missing
    /// required variables are a fatal init error (exit code 1, §6).
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path).wrap_err_with(|| format!("failed to load .env file from {path}"))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let chain = ChainConfig {
            rpc_url: env::var("RELAY_RPC_URL").map_err(|_| eyre!("RELAY_RPC_URL environment variable is required"))?,
            chain_id: env::var("RELAY_CHAIN_ID")
                .map_err(|_| eyre!("RELAY_CHAIN_ID environment variable is required"))?
                .parse()
                .wrap_err("RELAY_CHAIN_ID must be a valid u64")?,
            registry_address: env::var("RELAY_REGISTRY_ADDRESS")
                .map_err(|_| eyre!("RELAY_REGISTRY_ADDRESS environment variable is required"))?,
            usdc_address: env::var("RELAY_USDC_ADDRESS")
                .map_err(|_| eyre!("RELAY_USDC_ADDRESS environment variable is required"))?,
            relay_private_key: env::var("RELAY_PRIVATE_KEY")
                .map_err(|_| eyre!("RELAY_PRIVATE_KEY environment variable is required"))?,
            relay_host: env_or("RELAY_HOST", "local-relay"),
        };

        let store = StoreConfig {
            base_url: env_or("GUN_STORE_URL", "http://127.0.0.1:8765/gun"),
        };

        let ipfs = IpfsConfig {
            api_url: env_or("IPFS_API_URL", "http://127.0.0.1:5001"),
            gateway_url: env_or("IPFS_GATEWAY_URL", "http://127.0.0.1:8080"),
        };

        let auth = AuthConfig {
            admin_token: env::var("RELAY_ADMIN_TOKEN")
                .map_err(|_| eyre!("RELAY_ADMIN_TOKEN environment variable is required"))?,
            rate_limit_attempts: env_parsed_or("AUTH_RATE_LIMIT_ATTEMPTS", default_rate_limit_attempts())?,
            rate_limit_window: Duration::from_secs(env_parsed_or(
                "AUTH_RATE_LIMIT_WINDOW_SECS",
                default_rate_limit_window_secs(),
            )?),
        };

        let guard = GuardConfig {
            duplicate_window: Duration::from_secs(env_parsed_or(
                "GUARD_DUPLICATE_WINDOW_SECS",
                default_duplicate_window_secs(),
            )?),
        };

        let http = HttpConfig {
            bind_address: env_or("HTTP_BIND_ADDRESS", &default_bind_address()),
            port: env_parsed_or("HTTP_PORT", default_port())?,
        };

        let background = BackgroundConfig {
            batch_interval: Duration::from_secs(env_parsed_or("BATCH_INTERVAL_SECS", 30u64)?),
            deposit_sync_interval: Duration::from_secs(env_parsed_or("DEPOSIT_SYNC_INTERVAL_SECS", 15u64)?),
            link_cleanup_interval: Duration::from_secs(env_parsed_or("LINK_CLEANUP_INTERVAL_SECS", 300u64)?),
            reconcile_interval: Duration::from_secs(env_parsed_or("RECONCILE_INTERVAL_SECS", 900u64)?),
        };

        let config = Config {
            database,
            chain,
            store,
            ipfs,
            auth,
            guard,
            http,
            background,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }
        if self.chain.rpc_url.is_empty() {
            return Err(eyre!("chain.rpc_url cannot be empty"));
        }
        if self.chain.registry_address.len() != 42 || !self.chain.registry_address.starts_with("0x") {
            return Err(eyre!("chain.registry_address must be a valid hex address (42 chars with 0x prefix)"));
        }
        if self.chain.usdc_address.len() != 42 || !self.chain.usdc_address.starts_with("0x") {
            return Err(eyre!("chain.usdc_address must be a valid hex address (42 chars with 0x prefix)"));
        }
        if self.chain.relay_private_key.len() != 66 || !self.chain.relay_private_key.starts_with("0x") {
            return Err(eyre!("chain.relay_private_key must be 66 chars (0x + 64 hex chars)"));
        }
        if self.auth.admin_token.len() < 8 {
            return Err(eyre!("auth.admin_token must be at least 8 characters"));
        }
        if self.http.port == 0 {
            return Err(eyre!("http.port cannot be 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig { url: "postgres://localhost/relay".to_string() },
            chain: ChainConfig {
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 1,
                registry_address: "0x0000000000000000000000000000000000000001".to_string(),
                usdc_address: "0x0000000000000000000000000000000000000002".to_string(),
                relay_private_key: "0x0000000000000000000000000000000000000000000000000000000000000001"
                    .to_string(),
                relay_host: "local-relay".to_string(),
            },
            store: StoreConfig { base_url: "http://127.0.0.1:8765/gun".to_string() },
            ipfs: IpfsConfig {
                api_url: "http://127.0.0.1:5001".to_string(),
                gateway_url: "http://127.0.0.1:8080".to_string(),
            },
            auth: AuthConfig {
                admin_token: "super-secret-token".to_string(),
                rate_limit_attempts: 5,
                rate_limit_window: Duration::from_secs(60),
            },
            guard: GuardConfig { duplicate_window: Duration::from_secs(5) },
            http: HttpConfig { bind_address: "0.0.0.0".to_string(), port: 8080 },
            background: BackgroundConfig {
                batch_interval: Duration::from_secs(30),
                deposit_sync_interval: Duration::from_secs(15),
                link_cleanup_interval: Duration::from_secs(300),
                reconcile_interval: Duration::from_secs(900),
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn short_admin_token_is_rejected() {
        let mut config = valid_config();
        config.auth.admin_token = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_private_key_is_rejected() {
        let mut config = valid_config();
        config.chain.relay_private_key = "0x123".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = valid_config();
        config.http.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = valid_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("0000000000000000000000000000000000000000000000000000000000000001"));
        assert!(!rendered.contains("super-secret-token"));
    }
}
