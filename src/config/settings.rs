use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::BillingError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub keeper: KeeperConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 1,
            contract_address: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    pub tick_interval_secs: u64,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub database_path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: "data/billing.db".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> crate::error::Result<Self> {
        let config_path = Self::find_config_file()?;
        let config_content = std::fs::read_to_string(&config_path)?;
        let settings: Settings =
            toml::from_str(&config_content).map_err(|e| BillingError::Config(e.to_string()))?;
        Ok(settings)
    }

    fn find_config_file() -> crate::error::Result<String> {
        let possible_names = ["custom-config.toml", "config.toml"];

        for name in &possible_names {
            if Path::new(name).exists() {
                return Ok(name.to_string());
            }
        }

        Err(BillingError::Config(
            "Configuration file not found. Please create custom-config.toml or config.toml".into(),
        ))
    }
}
