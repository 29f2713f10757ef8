//! CA Certificate Generation Module
//!
//! Generates the self-signed certificate that anchors trust for every leaf
//! certificate the authority issues. There is a single level of hierarchy:
//!
//! ```text
//! Secure Email CA (self-signed) ← This module
//!   └── User certificate (signed by CA)
//! ```
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Key Usage**: keyCertSign, digitalSignature, nonRepudiation, keyEncipherment, dataEncipherment
//! - **Basic Constraints**: CA=true
//! - **Serial Number**: Fixed at `01`
//! - **Default Key Size**: RSA 2048-bit
//! - **Default Validity**: 120 months
//!
//! # Example
//! ```rust,no_run
//! # use secure_mail_ca::generate_ca::RsaCaBuilder;
//! # fn example() -> secure_mail_ca::CaResult<()> {
//! let (ca_key, ca_cert) = RsaCaBuilder::new()
//!     .subject_common_name("Secure Email CA".to_string())
//!     .country("US".to_string())
//!     .state("CA".to_string())
//!     .organization("Secure Email PKI System".to_string())
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{CaError, CaResult};
use crate::key_material::{self, MIN_RSA_KEY_SIZE};
use crate::validity::{ValidityWindow, CA_VALIDITY_MONTHS};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// Serial number carried by every CA certificate
pub const CA_SERIAL_NUMBER: u32 = 1;

/// Builder for the CA key pair and its self-signed certificate
///
/// Distinguished name fields default to empty strings; an empty field is left out
/// of the subject rather than encoded as an empty attribute.
pub struct RsaCaBuilder {
    subject_common_name: String,
    country: String,
    state: String,
    organization: String,
    key_size: u32,
    validity_months: u32,
}

impl Default for RsaCaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RsaCaBuilder {
    pub fn new() -> Self {
        Self {
            subject_common_name: String::new(),
            country: String::new(),
            state: String::new(),
            organization: String::new(),
            key_size: MIN_RSA_KEY_SIZE,
            validity_months: CA_VALIDITY_MONTHS,
        }
    }

    /// Set the common name (CN) for the certificate
    pub fn subject_common_name(mut self, cn: String) -> Self {
        self.subject_common_name = cn;
        self
    }

    /// Set the country (C) for the certificate (2-letter ISO code)
    pub fn country(mut self, country: String) -> Self {
        self.country = country;
        self
    }

    /// Set the state/province (ST) for the certificate
    pub fn state(mut self, state: String) -> Self {
        self.state = state;
        self
    }

    /// Set the organization (O) for the certificate
    pub fn organization(mut self, org: String) -> Self {
        self.organization = org;
        self
    }

    /// RSA modulus size in bits, never below 2048
    pub fn key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    pub fn validity_months(mut self, months: u32) -> Self {
        self.validity_months = months;
        self
    }

    /// Generate the key pair and the self-signed CA certificate
    ///
    /// # Errors
    /// - [`CaError::KeyGeneration`] if the RSA key cannot be generated
    /// - [`CaError::Signing`] if any certificate field, extension or the
    ///   signature cannot be produced
    pub fn build(self) -> CaResult<(PKey<Private>, X509)> {
        let private_key = key_material::generate_rsa_keypair(self.key_size)?;
        let certificate = self.self_sign(&private_key)?;
        Ok((private_key, certificate))
    }

    fn self_sign(&self, private_key: &PKey<Private>) -> CaResult<X509> {
        let sign_err = |what: &str, e: openssl::error::ErrorStack| {
            CaError::Signing(format!("Failed to {}: {}", what, e))
        };

        let mut builder = X509::builder().map_err(|e| sign_err("create X509 builder", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| sign_err("set version", e))?;

        let serial = BigNum::from_u32(CA_SERIAL_NUMBER)
            .and_then(|bn| bn.to_asn1_integer())
            .map_err(|e| sign_err("encode serial number", e))?;
        builder
            .set_serial_number(&serial)
            .map_err(|e| sign_err("set serial number", e))?;

        let mut name_builder =
            X509Name::builder().map_err(|e| sign_err("create name builder", e))?;
        for (nid, value, label) in [
            (Nid::COMMONNAME, &self.subject_common_name, "CN"),
            (Nid::COUNTRYNAME, &self.country, "country"),
            (Nid::STATEORPROVINCENAME, &self.state, "state/province"),
            (Nid::ORGANIZATIONNAME, &self.organization, "organization"),
        ] {
            if value.is_empty() {
                continue;
            }
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| sign_err(&format!("set {}", label), e))?;
        }
        let name = name_builder.build();

        builder
            .set_subject_name(&name)
            .map_err(|e| sign_err("set subject", e))?;
        builder
            .set_issuer_name(&name)
            .map_err(|e| sign_err("set issuer", e))?;

        let window = ValidityWindow::months_from_now(self.validity_months)?;
        let not_before = window.not_before_asn1()?;
        let not_after = window.not_after_asn1()?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| sign_err("set not_before", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| sign_err("set not_after", e))?;

        builder
            .set_pubkey(private_key)
            .map_err(|e| sign_err("set public key", e))?;

        let bc = BasicConstraints::new()
            .critical()
            .ca()
            .build()
            .map_err(|e| sign_err("build BasicConstraints", e))?;
        builder
            .append_extension(bc)
            .map_err(|e| sign_err("add BasicConstraints", e))?;

        let ku = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .digital_signature()
            .non_repudiation()
            .key_encipherment()
            .data_encipherment()
            .build()
            .map_err(|e| sign_err("build KeyUsage", e))?;
        builder
            .append_extension(ku)
            .map_err(|e| sign_err("add KeyUsage", e))?;

        builder
            .sign(private_key, MessageDigest::sha256())
            .map_err(|e| sign_err("sign certificate", e))?;
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cert: &X509, nid: Nid) -> String {
        crate::generate_leaf_cert::subject_entry(cert, nid).unwrap_or_default()
    }

    #[test]
    fn test_self_signed_ca_certificate() {
        let (key, cert) = RsaCaBuilder::new()
            .subject_common_name("Test CA".to_string())
            .country("US".to_string())
            .state("CA".to_string())
            .organization("Test Org".to_string())
            .build()
            .unwrap();

        assert_eq!(entry(&cert, Nid::COMMONNAME), "Test CA");
        assert_eq!(entry(&cert, Nid::COUNTRYNAME), "US");
        assert_eq!(entry(&cert, Nid::STATEORPROVINCENAME), "CA");
        assert_eq!(entry(&cert, Nid::ORGANIZATIONNAME), "Test Org");

        let subject = cert.subject_name().to_der().unwrap();
        let issuer = cert.issuer_name().to_der().unwrap();
        assert_eq!(subject, issuer);

        assert!(cert.verify(&key).unwrap());
        assert_eq!(
            cert.serial_number().to_bn().unwrap(),
            BigNum::from_u32(CA_SERIAL_NUMBER).unwrap()
        );
        assert_eq!(key.bits(), 2048);
    }

    #[test]
    fn test_ca_extensions_and_validity() {
        let (_key, cert) = RsaCaBuilder::new()
            .subject_common_name("Test CA".to_string())
            .build()
            .unwrap();

        let text = String::from_utf8(cert.to_text().unwrap()).unwrap();
        assert!(text.contains("CA:TRUE"));
        assert!(text.contains("Certificate Sign"));
        assert!(text.contains("Non Repudiation"));
        assert!(text.contains("Data Encipherment"));

        let not_before = crate::validity::asn1_to_datetime(cert.not_before()).unwrap();
        let not_after = crate::validity::asn1_to_datetime(cert.not_after()).unwrap();
        let years = not_after.years_since(not_before).unwrap();
        assert_eq!(years, 10);
    }

    #[test]
    fn test_weak_key_size_is_fatal() {
        let result = RsaCaBuilder::new()
            .subject_common_name("Weak".to_string())
            .key_size(1024)
            .build();
        assert!(matches!(result, Err(CaError::KeyGeneration(_))));
    }
}
