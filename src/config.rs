use std::fs;
use std::path::{Path, PathBuf};

use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::contract::INSURANCE_CONTRACT_ADDRESS;
use crate::policy::{PolicyTerms, POLICY_VALIDITY_SECS, SERVICES_COVERED};
use crate::session::APP_NULLIFIER_SEED;
use crate::store::DEFAULT_STORE_KEY;

/// Environment variable holding the wallet's private key.
pub const PRIVATE_KEY_ENV: &str = "INSURANCE_PRIVATE_KEY";
/// Environment variable overriding `rpc_url`.
pub const RPC_URL_ENV: &str = "INSURANCE_RPC_URL";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse config: {0}")]
    Parse(String),

    #[error("unable to encode config: {0}")]
    Encode(String),

    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub rpc_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default = "default_contract_address")]
    pub contract_address: String,
    pub proof_store: PathBuf,
    #[serde(default = "default_store_key")]
    pub proof_store_key: String,
    #[serde(default = "default_nullifier_seed")]
    pub nullifier_seed: String,
    #[serde(default)]
    pub use_test_aadhaar: bool,
    #[serde(default = "default_confirmations")]
    pub confirmations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifying_key: Option<PathBuf>,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_contract_address() -> String {
    INSURANCE_CONTRACT_ADDRESS.to_string()
}

fn default_store_key() -> String {
    DEFAULT_STORE_KEY.to_string()
}

fn default_nullifier_seed() -> String {
    APP_NULLIFIER_SEED.to_string()
}

fn default_confirmations() -> usize {
    1
}

impl AppConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self).map_err(|err| ConfigError::Encode(err.to_string()))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.trim().is_empty() {
                self.rpc_url = url;
            }
        }
    }

    pub fn contract_address(&self) -> ConfigResult<Address> {
        self.contract_address
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                field: "contract_address",
                value: self.contract_address.clone(),
            })
    }

    pub fn nullifier_seed(&self) -> ConfigResult<U256> {
        U256::from_dec_str(self.nullifier_seed.trim()).map_err(|_| ConfigError::InvalidValue {
            field: "nullifier_seed",
            value: self.nullifier_seed.clone(),
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: None,
            contract_address: default_contract_address(),
            proof_store: PathBuf::from("./data/storage.json"),
            proof_store_key: default_store_key(),
            nullifier_seed: default_nullifier_seed(),
            use_test_aadhaar: false,
            confirmations: default_confirmations(),
            verifying_key: None,
            policy: PolicyConfig::default(),
        }
    }
}

/// Terms offered on issuance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Coverage in wei, decimal.
    #[serde(default = "default_coverage_wei")]
    pub coverage_wei: String,
    #[serde(default = "default_validity_secs")]
    pub validity_secs: u64,
    #[serde(default = "default_services")]
    pub services: Vec<String>,
}

fn default_coverage_wei() -> String {
    PolicyTerms::default().coverage_amount.to_string()
}

fn default_validity_secs() -> u64 {
    POLICY_VALIDITY_SECS
}

fn default_services() -> Vec<String> {
    SERVICES_COVERED.iter().map(|s| s.to_string()).collect()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            coverage_wei: default_coverage_wei(),
            validity_secs: default_validity_secs(),
            services: default_services(),
        }
    }
}

impl PolicyConfig {
    pub fn terms(&self) -> ConfigResult<PolicyTerms> {
        let coverage_amount =
            U256::from_dec_str(self.coverage_wei.trim()).map_err(|_| ConfigError::InvalidValue {
                field: "policy.coverage_wei",
                value: self.coverage_wei.clone(),
            })?;
        Ok(PolicyTerms {
            coverage_amount,
            validity_secs: self.validity_secs,
            services_covered: self.services.clone(),
        })
    }
}
