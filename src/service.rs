//! CA service facade
//!
//! Wires the authority, issuer, verifier and revocation ledger together behind the
//! operations exposed to the IPC layer. Messages in [`CertificateStatus`] are the
//! only verification detail meant for external callers; reasons go to the logs.

use crate::certificate_authority::{AuthorityCell, CaPersistence};
use crate::configs::AppConfig;
use crate::error::{CaError, CaResult};
use crate::issuer::{CertificateIssuer, IssuedCertificate};
use crate::revocation::{FileRevocationStore, RevocationEntry, RevocationLedger};
use crate::serial::{certificate_serial, RandomSerialSource};
use crate::serial_registry::{FileIssuedSerialStore, IssuedSerialStore, MemoryIssuedSerialStore};
use crate::verifier::{ChainVerifier, Verification};
use chrono::{DateTime, Utc};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const MSG_VALID: &str = "Certificate is valid";
pub const MSG_VALIDATION_FAILED: &str = "Certificate validation failed";
pub const MSG_REVOKED: &str = "Certificate has been revoked";
pub const MSG_PARSING_FAILED: &str = "Certificate parsing failed";

/// Combined chain and revocation status of a presented certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStatus {
    pub is_valid: bool,
    pub is_revoked: bool,
    pub message: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

pub struct CaService {
    authority: Arc<AuthorityCell>,
    issuer: CertificateIssuer,
    verifier: ChainVerifier,
    revocations: RevocationLedger,
}

impl CaService {
    pub fn new(
        authority: Arc<AuthorityCell>,
        issuer: CertificateIssuer,
        revocations: RevocationLedger,
    ) -> Self {
        let verifier = ChainVerifier::new(Arc::clone(&authority));
        Self {
            authority,
            issuer,
            verifier,
            revocations,
        }
    }

    /// Build the service from application configuration
    ///
    /// Serials in the issued-serial registry and the revocation ledger are never
    /// handed out again.
    pub fn from_config(config: &AppConfig) -> CaResult<Self> {
        let persistence = CaPersistence::from_config(&config.storage)?;
        let authority = Arc::new(AuthorityCell::new(config.ca.clone(), persistence));

        let registry: Box<dyn IssuedSerialStore> = match &config.storage.issued_serials_path {
            Some(path) => Box::new(FileIssuedSerialStore::open(path)?),
            None => {
                warn!("No issued-serial registry path configured; serial uniqueness is per process");
                Box::new(MemoryIssuedSerialStore::new())
            }
        };
        let issuer = CertificateIssuer::with_registry(
            Arc::clone(&authority),
            config.issuance.clone(),
            Box::new(RandomSerialSource),
            registry,
        );

        let revocations = match &config.storage.revocation_path {
            Some(path) => RevocationLedger::new(Box::new(FileRevocationStore::open(path)?)),
            None => {
                warn!("No revocation ledger path configured; revocations are kept in memory");
                RevocationLedger::in_memory()
            }
        };
        issuer.register_existing(revocations.list()?.iter().map(|e| e.serial_number.as_str()))?;

        Ok(Self::new(authority, issuer, revocations))
    }

    pub fn authority(&self) -> &Arc<AuthorityCell> {
        &self.authority
    }

    /// CA certificate PEM, creating the CA on first use
    pub fn ca_certificate(&self) -> CaResult<String> {
        self.authority.ca_certificate_pem()
    }

    pub fn issue_certificate(
        &self,
        public_key_pem: &str,
        email: &str,
        name: &str,
    ) -> CaResult<IssuedCertificate> {
        self.issuer.issue(public_key_pem, email, name)
    }

    /// Chain validity only; revocation is not consulted
    pub fn verify_certificate(&self, certificate_pem: &str) -> bool {
        self.verifier.verify(certificate_pem).is_valid()
    }

    pub fn verify_certificate_detailed(&self, certificate_pem: &str) -> Verification {
        self.verifier.verify(certificate_pem)
    }

    /// Chain verification plus revocation lookup
    ///
    /// Both checks run. A certificate that cannot be parsed reports
    /// [`MSG_PARSING_FAILED`] whether or not its serial is revoked; a chain failure
    /// takes precedence over revocation in the message.
    pub fn check_certificate(&self, certificate_pem: &str) -> CertificateStatus {
        let verification = self.verifier.verify(certificate_pem);
        if verification.is_malformed() {
            return CertificateStatus {
                is_valid: false,
                is_revoked: false,
                message: MSG_PARSING_FAILED.to_string(),
                revoked_at: None,
                reason: None,
            };
        }

        let revocation = match self.revocation_for(certificate_pem) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Revocation lookup failed");
                return CertificateStatus {
                    is_valid: false,
                    is_revoked: false,
                    message: MSG_PARSING_FAILED.to_string(),
                    revoked_at: None,
                    reason: None,
                };
            }
        };

        let chain_valid = verification.is_valid();
        let is_revoked = revocation.is_some();
        let message = if chain_valid && !is_revoked {
            MSG_VALID
        } else if !chain_valid {
            MSG_VALIDATION_FAILED
        } else {
            MSG_REVOKED
        };

        CertificateStatus {
            is_valid: chain_valid && !is_revoked,
            is_revoked,
            message: message.to_string(),
            revoked_at: revocation.as_ref().map(|e| e.revoked_at),
            reason: revocation.map(|e| e.reason),
        }
    }

    fn revocation_for(&self, certificate_pem: &str) -> CaResult<Option<RevocationEntry>> {
        let cert = X509::from_pem(certificate_pem.as_bytes())
            .map_err(|e| CaError::Parse(format!("Failed to parse certificate: {}", e)))?;
        self.revocations.is_revoked(&certificate_serial(&cert)?)
    }

    /// Revoke a serial number
    ///
    /// Returns `Ok(false)` if the serial was already revoked; the earlier entry stands.
    pub fn revoke_certificate(&self, serial_number: &str, reason: Option<&str>) -> CaResult<bool> {
        match self.revocations.record(serial_number, reason) {
            Ok(_) => Ok(true),
            Err(CaError::AlreadyRevoked(serial)) => {
                info!(%serial, "Revocation requested for an already revoked serial");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn revocation_status(&self, serial_number: &str) -> CaResult<Option<RevocationEntry>> {
        self.revocations.is_revoked(serial_number)
    }

    pub fn list_revocations(&self) -> CaResult<Vec<RevocationEntry>> {
        self.revocations.list()
    }

    /// Replace the CA identity; returns the new CA certificate PEM
    pub fn reinitialize(&self) -> CaResult<String> {
        let ca = self.authority.initialize()?;
        Ok(ca.certificate_pem().to_string())
    }
}
