use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::generate_leaf_cert::DEFAULT_LEAF_ORGANIZATION;
use crate::key_material::MIN_RSA_KEY_SIZE;
use crate::validity::{CA_VALIDITY_MONTHS, LEAF_VALIDITY_MONTHS};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub ca: CaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub issuance: IssuanceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Subject and key parameters of the CA identity
#[derive(Debug, Deserialize, Clone)]
pub struct CaConfig {
    #[serde(default = "default_ca_cn")]
    pub common_name: String,
    #[serde(default = "default_ca_country")]
    pub country: String,
    #[serde(default = "default_ca_state")]
    pub state: String,
    #[serde(default = "default_ca_org")]
    pub organization: String,
    #[serde(default = "default_ca_key_size")]
    pub key_size: u32,
    #[serde(default = "default_ca_validity")]
    pub validity_months: u32,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            common_name: default_ca_cn(),
            country: default_ca_country(),
            state: default_ca_state(),
            organization: default_ca_org(),
            key_size: default_ca_key_size(),
            validity_months: default_ca_validity(),
        }
    }
}

fn default_ca_cn() -> String {
    "Secure Email CA".to_string()
}

fn default_ca_country() -> String {
    "US".to_string()
}

fn default_ca_state() -> String {
    "CA".to_string()
}

fn default_ca_org() -> String {
    "Secure Email PKI System".to_string()
}

fn default_ca_key_size() -> u32 {
    MIN_RSA_KEY_SIZE
}

fn default_ca_validity() -> u32 {
    CA_VALIDITY_MONTHS // 10 years
}

/// On-disk locations. Unset paths mean memory-only state.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub ca_key_path: Option<PathBuf>,
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Name of the environment variable holding the CA key passphrase
    #[serde(default)]
    pub ca_key_passphrase_env: Option<String>,
    #[serde(default)]
    pub revocation_path: Option<PathBuf>,
    #[serde(default)]
    pub issued_serials_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssuanceConfig {
    #[serde(default = "default_leaf_org")]
    pub organization: String,
    #[serde(default = "default_leaf_validity")]
    pub validity_months: u32,
    #[serde(default = "default_serial_retry_limit")]
    pub serial_retry_limit: u32,
    #[serde(default)]
    pub validate_email: bool,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            organization: default_leaf_org(),
            validity_months: default_leaf_validity(),
            serial_retry_limit: default_serial_retry_limit(),
            validate_email: false,
        }
    }
}

fn default_leaf_org() -> String {
    DEFAULT_LEAF_ORGANIZATION.to_string()
}

fn default_leaf_validity() -> u32 {
    LEAF_VALIDITY_MONTHS
}

fn default_serial_retry_limit() -> u32 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/secure_mail_ca.sock")
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(config_str).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.ca.key_size < MIN_RSA_KEY_SIZE {
            anyhow::bail!(
                "ca.key_size must be at least {} bits, got {}",
                MIN_RSA_KEY_SIZE,
                self.ca.key_size
            );
        }
        if self.storage.ca_key_path.is_some() != self.storage.ca_cert_path.is_some() {
            anyhow::bail!("storage.ca_key_path and storage.ca_cert_path must be set together");
        }
        if self.issuance.serial_retry_limit == 0 {
            anyhow::bail!("issuance.serial_retry_limit must be at least 1");
        }
        if self.ca.validity_months == 0 || self.issuance.validity_months == 0 {
            anyhow::bail!("validity_months must be greater than zero");
        }
        Ok(())
    }
}
