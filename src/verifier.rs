//! Chain verification against the CA trust anchor
//!
//! The verifier never fails: every problem becomes a [`Verification`] outcome.
//! `Malformed` means the input could not be read as a certificate at all;
//! `Invalid` means it parsed but is untrusted, tampered with or outside its
//! validity window. Callers facing end users should only expose
//! [`Verification::is_valid`]; the reason strings are for operator logs.

use crate::certificate_authority::AuthorityCell;
use crate::generate_leaf_cert::subject_entry;
use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509StoreContext, X509VerifyResult, X509};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PEM_CERTIFICATE_HEADER: &str = "-----BEGIN CERTIFICATE-----";

/// Outcome of verifying a presented certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason")]
pub enum Verification {
    Valid,
    Invalid(String),
    Malformed(String),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Verification::Malformed(_))
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Valid => write!(f, "valid"),
            Verification::Invalid(reason) => write!(f, "invalid: {}", reason),
            Verification::Malformed(reason) => write!(f, "malformed: {}", reason),
        }
    }
}

pub struct ChainVerifier {
    authority: Arc<AuthorityCell>,
}

impl ChainVerifier {
    pub fn new(authority: Arc<AuthorityCell>) -> Self {
        Self { authority }
    }

    /// Verify a PEM certificate against the current CA certificate
    pub fn verify(&self, certificate_pem: &str) -> Verification {
        let outcome = self.verify_inner(certificate_pem);
        match &outcome {
            Verification::Valid => debug!("Certificate chain verification passed"),
            Verification::Invalid(reason) => info!(%reason, "Certificate rejected"),
            Verification::Malformed(reason) => warn!(%reason, "Malformed certificate input"),
        }
        outcome
    }

    fn verify_inner(&self, certificate_pem: &str) -> Verification {
        if certificate_pem.trim().is_empty() {
            return Verification::Malformed("certificate input is empty".to_string());
        }
        if !certificate_pem.contains(PEM_CERTIFICATE_HEADER) {
            return Verification::Malformed("certificate is missing PEM headers".to_string());
        }

        let cert = match X509::from_pem(certificate_pem.as_bytes()) {
            Ok(cert) => cert,
            Err(e) => {
                return Verification::Malformed(format!("certificate parsing failed: {}", e));
            }
        };
        debug!(
            subject = %subject_common_name(&cert),
            serial = %crate::serial::certificate_serial(&cert).unwrap_or_default(),
            "Certificate parsed"
        );

        let ca = match self.authority.get_or_initialize() {
            Ok(ca) => ca,
            Err(e) => return Verification::Invalid(format!("trust anchor unavailable: {}", e)),
        };

        if presents_authority(&cert, ca.certificate()) {
            return Verification::Invalid(
                "certificate is a CA certificate, not a user certificate".to_string(),
            );
        }

        match verify_against(ca.certificate(), &cert) {
            Ok(true) => Verification::Valid,
            Ok(false) => Verification::Invalid("chain verification failed".to_string()),
            Err(reason) => Verification::Invalid(reason),
        }
    }
}

/// Run OpenSSL chain verification with `anchor` as the only trusted certificate
///
/// `Err` carries the OpenSSL verification error description.
fn verify_against(anchor: &X509, cert: &X509) -> Result<bool, String> {
    let mut store_builder =
        X509StoreBuilder::new().map_err(|e| format!("failed to create trust store: {}", e))?;
    store_builder
        .add_cert(anchor.clone())
        .map_err(|e| format!("failed to add CA to trust store: {}", e))?;
    let store = store_builder.build();

    let chain = Stack::new().map_err(|e| format!("failed to create chain stack: {}", e))?;
    let mut context =
        X509StoreContext::new().map_err(|e| format!("failed to create store context: {}", e))?;

    let result = context
        .init(&store, cert, &chain, |ctx| {
            let ok = ctx.verify_cert()?;
            Ok((ok, ctx.error()))
        })
        .map_err(|e| format!("verification error: {}", e))?;

    match result {
        (true, _) => Ok(true),
        (false, err) => Err(err.error_string().to_string()),
    }
}

/// Whether `cert` is the trust anchor itself or another self-issued certificate
///
/// The CA key only signs its own self-signed certificate and CA=false user
/// certificates, so anything self-issued is a CA certificate.
fn presents_authority(cert: &X509, anchor: &X509) -> bool {
    let same_as_anchor = match (cert.to_der(), anchor.to_der()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    same_as_anchor || cert.issued(cert) == X509VerifyResult::OK
}

fn subject_common_name(cert: &X509) -> String {
    subject_entry(cert, Nid::COMMONNAME).unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{CaConfig, IssuanceConfig};
    use crate::issuer::CertificateIssuer;
    use crate::key_material::{generate_rsa_keypair, public_key_to_pem};

    fn setup() -> (Arc<AuthorityCell>, CertificateIssuer, ChainVerifier) {
        let cell = Arc::new(AuthorityCell::new(CaConfig::default(), None));
        let issuer = CertificateIssuer::new(Arc::clone(&cell), IssuanceConfig::default());
        let verifier = ChainVerifier::new(Arc::clone(&cell));
        (cell, issuer, verifier)
    }

    fn user_key_pem() -> String {
        public_key_to_pem(&generate_rsa_keypair(2048).unwrap()).unwrap()
    }

    fn reencode(der: &[u8]) -> String {
        let body = openssl::base64::encode_block(der);
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for chunk in body.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(chunk).unwrap());
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }

    #[test]
    fn test_issued_certificate_verifies() {
        let (_cell, issuer, verifier) = setup();
        let issued = issuer
            .issue(&user_key_pem(), "alice@example.com", "Alice A")
            .unwrap();
        assert_eq!(verifier.verify(&issued.certificate_pem), Verification::Valid);
    }

    #[test]
    fn test_input_format_failures_are_malformed() {
        let (_cell, _issuer, verifier) = setup();
        assert!(verifier.verify("").is_malformed());
        assert!(verifier.verify("   \n").is_malformed());
        assert!(verifier.verify("MIIB...").is_malformed());
        assert!(verifier
            .verify("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n")
            .is_malformed());
    }

    #[test]
    fn test_tampered_signature_is_rejected() {
        let (_cell, issuer, verifier) = setup();
        let issued = issuer
            .issue(&user_key_pem(), "alice@example.com", "Alice A")
            .unwrap();
        let mut der = X509::from_pem(issued.certificate_pem.as_bytes())
            .unwrap()
            .to_der()
            .unwrap();
        let last = der.len() - 1;
        der[last] ^= 0x01;

        let outcome = verifier.verify(&reencode(&der));
        assert!(!outcome.is_valid());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let (_cell, issuer, verifier) = setup();
        let issued = issuer
            .issue(&user_key_pem(), "alice@example.com", "Alice A")
            .unwrap();
        let der = X509::from_pem(issued.certificate_pem.as_bytes())
            .unwrap()
            .to_der()
            .unwrap();

        // Flip bytes well inside the signed TBSCertificate, one at a time
        for offset in [40usize, 120, 200, 300] {
            let mut tampered = der.clone();
            tampered[offset] ^= 0x01;
            assert!(
                !verifier.verify(&reencode(&tampered)).is_valid(),
                "tampering at byte {} went unnoticed",
                offset
            );
        }
    }

    #[test]
    fn test_reinitialized_ca_rejects_old_certificates() {
        let (cell, issuer, verifier) = setup();
        let issued = issuer
            .issue(&user_key_pem(), "alice@example.com", "Alice A")
            .unwrap();
        assert!(verifier.verify(&issued.certificate_pem).is_valid());

        cell.initialize().unwrap();
        let outcome = verifier.verify(&issued.certificate_pem);
        assert!(matches!(outcome, Verification::Invalid(_)));
    }

    #[test]
    fn test_foreign_ca_is_untrusted() {
        let (_cell, issuer, _verifier) = setup();
        let issued = issuer
            .issue(&user_key_pem(), "alice@example.com", "Alice A")
            .unwrap();

        let other = Arc::new(AuthorityCell::new(CaConfig::default(), None));
        let foreign = ChainVerifier::new(other);
        assert!(matches!(
            foreign.verify(&issued.certificate_pem),
            Verification::Invalid(_)
        ));
    }

    #[test]
    fn test_ca_certificate_is_not_a_valid_leaf() {
        let (cell, _issuer, verifier) = setup();
        let ca_pem = cell.ca_certificate_pem().unwrap();
        match verifier.verify(&ca_pem) {
            Verification::Invalid(reason) => assert!(reason.contains("CA certificate")),
            other => panic!("expected CA rejection, got {:?}", other),
        }

        // A different self-signed CA is rejected before chain building too
        let (_key, other_ca) = crate::generate_ca::RsaCaBuilder::new()
            .subject_common_name("Other CA".to_string())
            .build()
            .unwrap();
        let other_pem = String::from_utf8(other_ca.to_pem().unwrap()).unwrap();
        assert!(matches!(
            verifier.verify(&other_pem),
            Verification::Invalid(_)
        ));
    }

    #[test]
    fn test_expired_certificate_is_invalid() {
        use crate::generate_leaf_cert::LeafCertificateBuilder;
        use openssl::asn1::Asn1Time;
        use openssl::bn::BigNum;

        let (cell, _issuer, verifier) = setup();
        let ca = cell.get_or_initialize().unwrap();
        let user = generate_rsa_keypair(2048).unwrap();
        let user_pub =
            openssl::pkey::PKey::public_key_from_pem(&user.public_key_to_pem().unwrap()).unwrap();
        let (cert, _) = LeafCertificateBuilder::new(ca.private_key(), ca.certificate(), user_pub)
            .display_name("Old".to_string())
            .email("old@example.com".to_string())
            .serial_number(BigNum::from_u32(99).unwrap())
            .build()
            .unwrap();

        // Re-sign a copy whose window ended yesterday
        let mut builder = openssl::x509::X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(cert.serial_number()).unwrap();
        builder.set_subject_name(cert.subject_name()).unwrap();
        builder.set_issuer_name(cert.issuer_name()).unwrap();
        builder.set_pubkey(&cert.public_key().unwrap()).unwrap();
        let yesterday = Asn1Time::from_unix(chrono::Utc::now().timestamp() - 86_400).unwrap();
        builder.set_not_before(&yesterday).unwrap();
        builder.set_not_after(&yesterday).unwrap();
        builder
            .sign(ca.private_key(), openssl::hash::MessageDigest::sha256())
            .unwrap();
        let expired = builder.build();
        let pem = String::from_utf8(expired.to_pem().unwrap()).unwrap();

        match verifier.verify(&pem) {
            Verification::Invalid(reason) => assert!(reason.contains("expired")),
            other => panic!("expected expiry rejection, got {:?}", other),
        }
    }
}
