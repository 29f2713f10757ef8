//! Secure Mail CA - Private Certificate Authority Library
//!
//! A minimal private CA for a secure email system. It binds an email address and
//! display name to a user's RSA public key, verifies presented certificates against
//! its own trust anchor, and keeps a revocation ledger keyed by serial number.
//!
//! # Overview
//!
//! The hierarchy is two levels deep:
//!
//! ```text
//! CA (self-signed, CA=true, serial 1, 10 years)
//!   └── User Certificate (CA=false, clientAuth + emailProtection, 1 year)
//! ```
//!
//! - **Lazy bootstrap**: the CA identity is created (or loaded from disk) on first use
//! - **Unique serials**: 128-bit random serials checked against every serial handed out,
//!   optionally persisted in an issued-serial registry
//! - **Chain verification**: OpenSSL trust store holding only the current CA
//! - **Revocation ledger**: append-only, one entry per serial, optionally file-backed
//!
//! # Quick Start
//!
//! ```bash
//! cargo build --release
//! ./target/release/secure-mail-ca --config config.toml
//! ```
//!
//! ## As a Library
//!
//! ```no_run
//! use secure_mail_ca::configs::AppConfig;
//! use secure_mail_ca::service::CaService;
//!
//! fn main() -> anyhow::Result<()> {
//!     let service = CaService::from_config(&AppConfig::default())?;
//!     # let user_public_key_pem = String::new();
//!
//!     let issued = service.issue_certificate(&user_public_key_pem, "alice@example.com", "Alice A")?;
//!     assert!(service.verify_certificate(&issued.certificate_pem));
//!
//!     service.revoke_certificate(&issued.serial_number, Some("key-compromise"))?;
//!     assert!(!service.check_certificate(&issued.certificate_pem).is_valid);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! ## [`generate_ca`]
//!
//! Builder for the self-signed CA certificate and its key pair.
//!
//! ```no_run
//! use secure_mail_ca::generate_ca::RsaCaBuilder;
//!
//! let (key, cert) = RsaCaBuilder::new()
//!     .subject_common_name("Secure Email CA".to_string())
//!     .organization("Secure Email PKI System".to_string())
//!     .country("US".to_string())
//!     .state("CA".to_string())
//!     .validity_months(120)
//!     .build()?;
//! # Ok::<(), secure_mail_ca::CaError>(())
//! ```
//!
//! ## [`generate_leaf_cert`]
//!
//! Builder for user certificates signed by the CA key. The subject public key comes
//! from the user; the CA never sees the user's private key.
//!
//! ## [`certificate_authority`]
//!
//! The CA identity and [`certificate_authority::AuthorityCell`], which creates it on
//! first use and replaces it on operator request.
//!
//! ## [`issuer`], [`verifier`], [`revocation`]
//!
//! Issuance, chain verification and the revocation ledger. [`service::CaService`]
//! ties them together.
//!
//! ## [`external_interface`]
//!
//! Unix socket server for external IPC, speaking the framed JSON messages in [`protocol`].
//!
//! # Error Handling
//!
//! Library operations return [`CaResult`]. Chain verification never errors; it
//! yields a [`verifier::Verification`] outcome instead.
//!
//! ```no_run
//! use secure_mail_ca::{CaError, CaResult};
//! use secure_mail_ca::service::CaService;
//!
//! fn revoke(service: &CaService, serial: &str) -> CaResult<()> {
//!     match service.revoke_certificate(serial, None) {
//!         Err(CaError::InputFormat(msg)) => eprintln!("bad serial: {}", msg),
//!         other => { other?; }
//!     }
//!     Ok(())
//! }
//! ```

mod append_log;
pub mod certificate_authority;
pub mod configs;
pub mod error;
pub mod external_interface;
pub mod generate_ca;
pub mod generate_leaf_cert;
pub mod issuer;
pub mod key_material;
pub mod protocol;
pub mod revocation;
pub mod serial;
pub mod serial_registry;
pub mod service;
pub mod validity;
pub mod verifier;

pub use error::{CaError, CaResult};
