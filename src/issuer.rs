//! Leaf certificate issuance
//!
//! Issues user certificates under the current CA identity. Each issuance draws a
//! serial from a [`SerialSource`] and reserves it in the issuer's serial set, which
//! always contains the CA's own serial. A drawn serial that is already reserved, or
//! recorded in the [`IssuedSerialStore`], is retried up to the configured limit
//! before failing with [`CaError::SerialCollision`]. A certificate is only returned
//! once its serial has been recorded in the store.

use crate::certificate_authority::{AuthorityCell, CertificateAuthority};
use crate::configs::IssuanceConfig;
use crate::error::{CaError, CaResult};
use crate::generate_leaf_cert::LeafCertificateBuilder;
use crate::key_material;
use crate::serial::{normalize_serial, serial_to_hex, RandomSerialSource, SerialSource};
use crate::serial_registry::{IssuedSerialEntry, IssuedSerialStore, MemoryIssuedSerialStore};
use crate::validity::ValidityWindow;
use chrono::{DateTime, Utc};
use openssl::bn::BigNum;
use openssl::pkey::{PKey, Public};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Result of a successful issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub serial_number: String,
    pub expires_at: DateTime<Utc>,
}

pub struct CertificateIssuer {
    authority: Arc<AuthorityCell>,
    config: IssuanceConfig,
    serial_source: Box<dyn SerialSource>,
    registry: Box<dyn IssuedSerialStore>,
    // In-flight reservations plus serials registered from other sources
    reserved: Mutex<HashSet<String>>,
}

impl CertificateIssuer {
    pub fn new(authority: Arc<AuthorityCell>, config: IssuanceConfig) -> Self {
        Self::with_serial_source(authority, config, Box::new(RandomSerialSource))
    }

    pub fn with_serial_source(
        authority: Arc<AuthorityCell>,
        config: IssuanceConfig,
        serial_source: Box<dyn SerialSource>,
    ) -> Self {
        Self::with_registry(
            authority,
            config,
            serial_source,
            Box::new(MemoryIssuedSerialStore::new()),
        )
    }

    pub fn with_registry(
        authority: Arc<AuthorityCell>,
        config: IssuanceConfig,
        serial_source: Box<dyn SerialSource>,
        registry: Box<dyn IssuedSerialStore>,
    ) -> Self {
        Self {
            authority,
            config,
            serial_source,
            registry,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Mark serials issued elsewhere (e.g. a previous run) as taken
    pub fn register_existing<I, S>(&self, serials: I) -> CaResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        for serial in serials {
            reserved.insert(normalize_serial(serial.as_ref())?);
        }
        Ok(())
    }

    /// Issue a certificate for `public_key_pem` bound to `email` and `display_name`
    ///
    /// # Errors
    /// - [`CaError::InvalidPublicKey`] if the PEM is not an RSA public key
    /// - [`CaError::InputFormat`] if the email or name cannot be encoded, or email
    ///   validation is enabled and the address is malformed
    /// - [`CaError::SerialCollision`] if no free serial was found
    /// - [`CaError::Storage`] / [`CaError::Io`] if the serial cannot be recorded
    /// - [`CaError::Signing`] / [`CaError::KeyGeneration`] on CA failures
    pub fn issue(
        &self,
        public_key_pem: &str,
        email: &str,
        display_name: &str,
    ) -> CaResult<IssuedCertificate> {
        if self.config.validate_email {
            validate_email_syntax(email)?;
        }
        let subject_key = key_material::public_key_from_pem(public_key_pem)?;
        let ca = self.authority.get_or_initialize()?;

        let (serial, serial_hex) = self.reserve_serial(&ca.serial_number()?)?;

        // The reservation is held until the serial is in the registry or the attempt failed
        let signed = self.sign_and_record(
            &ca,
            subject_key,
            email,
            display_name,
            serial,
            &serial_hex,
        );
        self.release_serial(&serial_hex);
        let (certificate_pem, window) = signed?;

        info!(
            serial = %serial_hex,
            email = %email,
            expires_at = %window.not_after,
            "Issued certificate"
        );

        Ok(IssuedCertificate {
            certificate_pem,
            serial_number: serial_hex,
            expires_at: window.not_after,
        })
    }

    fn sign_and_record(
        &self,
        ca: &CertificateAuthority,
        subject_key: PKey<Public>,
        email: &str,
        display_name: &str,
        serial: BigNum,
        serial_hex: &str,
    ) -> CaResult<(String, ValidityWindow)> {
        let (certificate, window) =
            LeafCertificateBuilder::new(ca.private_key(), ca.certificate(), subject_key)
                .display_name(display_name.to_string())
                .email(email.to_string())
                .organization(self.config.organization.clone())
                .validity_months(self.config.validity_months)
                .serial_number(serial)
                .build()?;

        let pem = certificate
            .to_pem()
            .map_err(|e| CaError::Signing(format!("Failed to encode certificate: {}", e)))?;
        let certificate_pem =
            String::from_utf8(pem).map_err(|e| CaError::Signing(e.to_string()))?;

        let recorded = self.registry.record(IssuedSerialEntry {
            serial_number: serial_hex.to_string(),
            email: email.to_string(),
            issued_at: window.not_before,
            expires_at: window.not_after,
        })?;
        if !recorded {
            return Err(CaError::SerialCollision(1));
        }
        Ok((certificate_pem, window))
    }

    fn reserve_serial(&self, ca_serial: &str) -> CaResult<(BigNum, String)> {
        let attempts = self.config.serial_retry_limit.max(1);
        for attempt in 1..=attempts {
            let serial = self.serial_source.next_serial()?;
            let hex = serial_to_hex(&serial)?;
            let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
            // Zero is not a valid X.509 serial
            if hex == "0"
                || hex == ca_serial
                || reserved.contains(&hex)
                || self.registry.contains(&hex)?
            {
                debug!(attempt, serial = %hex, "Serial number already in use, drawing again");
                continue;
            }
            reserved.insert(hex.clone());
            return Ok((serial, hex));
        }
        warn!(attempts, "Could not draw an unused serial number");
        Err(CaError::SerialCollision(attempts))
    }

    fn release_serial(&self, serial_hex: &str) {
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(serial_hex);
    }
}

/// Basic address syntax check: one `@`, non-empty local part, dotted domain, no whitespace
pub fn validate_email_syntax(email: &str) -> CaResult<()> {
    let invalid =
        |why: &str| CaError::InputFormat(format!("Invalid email address '{}': {}", email, why));

    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("contains whitespace"));
    }
    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return Err(invalid("must contain exactly one '@'")),
    };
    if local.is_empty() {
        return Err(invalid("empty local part"));
    }
    if domain.is_empty() || !domain.contains('.') {
        return Err(invalid("domain must contain a dot"));
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return Err(invalid("malformed domain"));
    }
    Ok(())
}
