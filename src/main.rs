//! Secure Mail CA - Private Certificate Authority
//!
//! Issues, verifies and revokes user certificates for the secure email system and
//! serves those operations to local applications over a Unix socket.
//!
//! # Quick Start
//!
//! ```bash
//! cargo build --release
//! ./target/release/secure-mail-ca --config config.toml
//! ```
//!
//! Without a config file every setting takes its default and the CA identity and
//! revocation ledger live in memory only.

use anyhow::{Context, Result};
use clap::Parser;
use secure_mail_ca::configs::AppConfig;
use secure_mail_ca::external_interface;
use secure_mail_ca::service::CaService;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Secure Mail CA - certificate issuance, verification and revocation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Validate configuration and exit (doesn't start server)
    #[arg(long)]
    validate: bool,

    /// Generate a new CA identity before serving. Certificates issued under the
    /// previous identity stop verifying.
    #[arg(long)]
    reinitialize_ca: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if Path::new(&cli.config).exists() {
        AppConfig::from_file(&cli.config)?
    } else if cli.validate {
        anyhow::bail!("Configuration file {} not found", cli.config);
    } else {
        AppConfig::default()
    };

    if cli.validate {
        println!("✓ Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  CA subject: {}", config.ca.common_name);
        println!("  CA key size: {} bits", config.ca.key_size);
        println!("  Leaf validity: {} months", config.issuance.validity_months);
        println!("  Socket: {}", config.server.socket_path.display());
        match &config.storage.ca_key_path {
            Some(path) => println!("  CA key: {}", path.display()),
            None => println!("  ⚠️  CA identity is memory-only"),
        }
        match &config.storage.revocation_path {
            Some(path) => println!("  Revocation ledger: {}", path.display()),
            None => println!("  ⚠️  Revocation ledger is memory-only"),
        }
        match &config.storage.issued_serials_path {
            Some(path) => println!("  Issued serials: {}", path.display()),
            None => println!("  ⚠️  Issued-serial registry is memory-only"),
        }
        return Ok(());
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Secure Mail CA v{}", env!("CARGO_PKG_VERSION"));
    if Path::new(&cli.config).exists() {
        info!("Loaded configuration from: {}", cli.config);
    } else {
        warn!("No configuration at {}; using defaults", cli.config);
    }

    let service =
        Arc::new(CaService::from_config(&config).context("Failed to initialize CA service")?);

    if cli.reinitialize_ca {
        service
            .reinitialize()
            .context("Failed to reinitialize CA identity")?;
    }
    let ca = service
        .authority()
        .get_or_initialize()
        .context("Failed to initialize CA identity")?;
    let serial = ca.serial_number()?;
    info!(subject = %ca.common_name(), %serial, "CA ready");

    external_interface::start_socket_server(&config.server.socket_path, service)
}
