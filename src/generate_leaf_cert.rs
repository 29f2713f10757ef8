//! Leaf Certificate Generation Module
//!
//! Builds end-entity certificates for mail users. The subject key is supplied by
//! the caller (the user keeps their private key); only the CA key signs here.
//!
//! # Certificate Properties
//! - **Subject**: CN=display name, emailAddress=email, O=organization
//! - **Key Usage**: digitalSignature, nonRepudiation, keyEncipherment, dataEncipherment
//! - **Extended Key Usage**: clientAuth, emailProtection
//! - **Subject Alternative Name**: rfc822Name = email, for ASCII addresses
//! - **Basic Constraints**: CA=false (cannot sign other certificates)
//! - **Default Validity**: 12 months

use crate::error::{CaError, CaResult};
use crate::validity::{ValidityWindow, LEAF_VALIDITY_MONTHS};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Type};
use openssl::bn::BigNum;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Extension, X509Name, X509Ref, X509};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SUBJECT_ALT_NAME_OID: &str = "2.5.29.17";

/// Default organization placed in leaf subjects
pub const DEFAULT_LEAF_ORGANIZATION: &str = "Secure Email System";

/// Builder for a user certificate signed by the CA
///
/// # Examples
/// ```rust,no_run
/// # use secure_mail_ca::generate_leaf_cert::LeafCertificateBuilder;
/// # use openssl::bn::BigNum;
/// # use openssl::pkey::{PKey, Private, Public};
/// # use openssl::x509::X509;
/// # fn example(ca_key: &PKey<Private>, ca_cert: &X509, user_key: PKey<Public>) -> secure_mail_ca::CaResult<()> {
/// let (cert, window) = LeafCertificateBuilder::new(ca_key, ca_cert, user_key)
///     .display_name("Alice A".to_string())
///     .email("alice@example.com".to_string())
///     .serial_number(BigNum::from_u32(0x2a).unwrap())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct LeafCertificateBuilder<'a> {
    display_name: String,
    email: String,
    organization: String,
    validity_months: u32,
    serial_number: Option<BigNum>,
    subject_key: PKey<Public>,
    signing_key: &'a PKeyRef<Private>,
    signing_cert: &'a X509Ref,
}

impl<'a> LeafCertificateBuilder<'a> {
    /// Create a builder for a certificate over `subject_key`
    ///
    /// # Arguments
    /// * `ca_key` - CA private key used to sign
    /// * `ca_cert` - CA certificate, source of the issuer name
    /// * `subject_key` - The user's public key
    pub fn new(
        ca_key: &'a PKeyRef<Private>,
        ca_cert: &'a X509Ref,
        subject_key: PKey<Public>,
    ) -> Self {
        Self {
            display_name: String::new(),
            email: String::new(),
            organization: DEFAULT_LEAF_ORGANIZATION.to_string(),
            validity_months: LEAF_VALIDITY_MONTHS,
            serial_number: None,
            subject_key,
            signing_key: ca_key,
            signing_cert: ca_cert,
        }
    }

    /// Set the common name (CN), the user's display name
    pub fn display_name(mut self, name: String) -> Self {
        self.display_name = name;
        self
    }

    /// Set the email address, used for both emailAddress and the SAN
    pub fn email(mut self, email: String) -> Self {
        self.email = email;
        self
    }

    /// Set the organization (O) for the certificate
    pub fn organization(mut self, org: String) -> Self {
        self.organization = org;
        self
    }

    pub fn validity_months(mut self, months: u32) -> Self {
        self.validity_months = months;
        self
    }

    /// Serial number to encode; required
    pub fn serial_number(mut self, serial: BigNum) -> Self {
        self.serial_number = Some(serial);
        self
    }

    /// Sign the certificate with the CA key
    ///
    /// # Returns
    /// The certificate together with the validity window it encodes.
    ///
    /// # Errors
    /// - [`CaError::InputFormat`] if the display name or email cannot be placed
    ///   in the subject
    /// - [`CaError::Signing`] if the serial is missing or signing fails
    pub fn build(self) -> CaResult<(X509, ValidityWindow)> {
        let sign_err = |what: &str, e: openssl::error::ErrorStack| {
            CaError::Signing(format!("Failed to {}: {}", what, e))
        };

        let serial = self
            .serial_number
            .as_ref()
            .ok_or_else(|| CaError::Signing("serial number not set".to_string()))?;

        let mut builder = X509::builder().map_err(|e| sign_err("create X509 builder", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| sign_err("set version", e))?;

        let asn1_serial = serial
            .to_asn1_integer()
            .map_err(|e| sign_err("encode serial number", e))?;
        builder
            .set_serial_number(&asn1_serial)
            .map_err(|e| sign_err("set serial number", e))?;

        // Subject values come from the caller and are stored as given, outside the
        // DN string table's length and charset limits
        let mut name_builder =
            X509Name::builder().map_err(|e| sign_err("create name builder", e))?;
        name_builder
            .append_entry_by_nid_with_type(
                Nid::COMMONNAME,
                &self.display_name,
                Asn1Type::UTF8STRING,
            )
            .map_err(|e| CaError::InputFormat(format!("Invalid display name: {}", e)))?;
        name_builder
            .append_entry_by_nid_with_type(
                Nid::PKCS9_EMAILADDRESS,
                &self.email,
                email_string_type(&self.email),
            )
            .map_err(|e| CaError::InputFormat(format!("Invalid email address: {}", e)))?;
        name_builder
            .append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.organization)
            .map_err(|e| sign_err("set organization", e))?;
        let subject_name = name_builder.build();

        builder
            .set_subject_name(&subject_name)
            .map_err(|e| sign_err("set subject", e))?;
        builder
            .set_issuer_name(self.signing_cert.subject_name())
            .map_err(|e| sign_err("set issuer from CA", e))?;

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
            .set_pubkey(&self.subject_key)
            .map_err(|e| sign_err("set public key", e))?;

        // No .ca() call - this is an end-entity certificate
        let bc = BasicConstraints::new()
            .critical()
            .build()
            .map_err(|e| sign_err("build BasicConstraints", e))?;
        builder
            .append_extension(bc)
            .map_err(|e| sign_err("add BasicConstraints", e))?;

        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .non_repudiation()
            .key_encipherment()
            .data_encipherment()
            .build()
            .map_err(|e| sign_err("build KeyUsage", e))?;
        builder
            .append_extension(ku)
            .map_err(|e| sign_err("add KeyUsage", e))?;

        let eku = ExtendedKeyUsage::new()
            .client_auth()
            .email_protection()
            .build()
            .map_err(|e| sign_err("build ExtendedKeyUsage", e))?;
        builder
            .append_extension(eku)
            .map_err(|e| sign_err("add ExtendedKeyUsage", e))?;

        // rfc822Name is an IA5String, so only ASCII addresses get a SAN entry
        if !self.email.is_empty() && self.email.is_ascii() {
            let san = email_san_extension(&self.email)
                .map_err(|e| sign_err("build SubjectAlternativeName", e))?;
            builder
                .append_extension(san)
                .map_err(|e| sign_err("add SubjectAlternativeName", e))?;
        }

        builder
            .sign(self.signing_key, MessageDigest::sha256())
            .map_err(|e| sign_err("sign certificate", e))?;

        Ok((builder.build(), window))
    }
}

fn email_string_type(email: &str) -> Asn1Type {
    if email.is_ascii() {
        Asn1Type::IA5STRING
    } else {
        Asn1Type::UTF8STRING
    }
}

/// subjectAltName holding a single rfc822Name, encoded directly so the address
/// never passes through the config-string parser
fn email_san_extension(email: &str) -> Result<X509Extension, ErrorStack> {
    // GeneralNames ::= SEQUENCE { [1] IMPLICIT IA5String }
    let der = der_tlv(0x30, &der_tlv(0x81, email.as_bytes()));
    let oid = Asn1Object::from_str(SUBJECT_ALT_NAME_OID)?;
    let value = Asn1OctetString::new_from_bytes(&der)?;
    X509Extension::new_from_der(&oid, false, &value)
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        out.push(0x80 | (bytes.len() - first) as u8);
        out.extend_from_slice(&bytes[first..]);
    }
    out.extend_from_slice(content);
    out
}

/// Text of the first subject entry with `nid`, if present
pub fn subject_entry(cert: &X509Ref, nid: Nid) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(nid)
        .next()
        .map(|e| String::from_utf8_lossy(e.data().as_slice()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_ca::RsaCaBuilder;
    use crate::key_material::generate_rsa_keypair;

    fn user_public_key() -> PKey<Public> {
        let key = generate_rsa_keypair(2048).unwrap();
        PKey::public_key_from_pem(&key.public_key_to_pem().unwrap()).unwrap()
    }

    #[test]
    fn test_leaf_signed_by_ca() {
        let (ca_key, ca_cert) = RsaCaBuilder::new()
            .subject_common_name("Test CA".to_string())
            .build()
            .unwrap();
        let user_key = user_public_key();

        let (cert, window) = LeafCertificateBuilder::new(&ca_key, &ca_cert, user_key.clone())
            .display_name("Alice A".to_string())
            .email("alice@example.com".to_string())
            .serial_number(BigNum::from_hex_str("c0ffee").unwrap())
            .build()
            .unwrap();

        assert!(cert.verify(&ca_key).unwrap());
        assert!(cert.public_key().unwrap().public_eq(&user_key));
        assert_eq!(
            cert.issuer_name().to_der().unwrap(),
            ca_cert.subject_name().to_der().unwrap()
        );
        assert_eq!(
            crate::validity::asn1_to_datetime(cert.not_after()).unwrap(),
            window.not_after
        );

        let emails: Vec<String> = cert
            .subject_alt_names()
            .unwrap()
            .iter()
            .filter_map(|n| n.email().map(|s| s.to_string()))
            .collect();
        assert_eq!(emails, vec!["alice@example.com".to_string()]);

        assert_eq!(
            subject_entry(&cert, Nid::ORGANIZATIONNAME).as_deref(),
            Some(DEFAULT_LEAF_ORGANIZATION)
        );
    }

    #[test]
    fn test_leaf_extensions() {
        let (ca_key, ca_cert) = RsaCaBuilder::new()
            .subject_common_name("Test CA".to_string())
            .build()
            .unwrap();
        let (cert, _) = LeafCertificateBuilder::new(&ca_key, &ca_cert, user_public_key())
            .display_name("Bob".to_string())
            .email("bob@example.com".to_string())
            .serial_number(BigNum::from_u32(7).unwrap())
            .build()
            .unwrap();

        let text = String::from_utf8(cert.to_text().unwrap()).unwrap();
        assert!(text.contains("CA:FALSE"));
        assert!(text.contains("TLS Web Client Authentication"));
        assert!(text.contains("E-mail Protection"));
        assert!(text.contains("email:bob@example.com"));
        assert!(!text.contains("Certificate Sign"));
    }

    #[test]
    fn test_subject_values_are_stored_verbatim() {
        let (ca_key, ca_cert) = RsaCaBuilder::new()
            .subject_common_name("Test CA".to_string())
            .build()
            .unwrap();
        let long_name = "N".repeat(65);
        let long_email = format!("{}@example.com", "l".repeat(130));

        let cases = [
            (long_name.as_str(), "long@example.com"),
            ("", "empty-name@example.com"),
            ("Long Email", long_email.as_str()),
            ("Jörg Ä", "jörg@example.com"),
            ("Comma", "a,b@example.com"),
        ];
        for (i, (name, email)) in cases.iter().enumerate() {
            let (cert, _) = LeafCertificateBuilder::new(&ca_key, &ca_cert, user_public_key())
                .display_name(name.to_string())
                .email(email.to_string())
                .serial_number(BigNum::from_u32(100 + i as u32).unwrap())
                .build()
                .unwrap();

            let reparsed = X509::from_pem(&cert.to_pem().unwrap()).unwrap();
            assert!(reparsed.verify(&ca_key).unwrap());
            assert_eq!(
                subject_entry(&reparsed, Nid::COMMONNAME).as_deref(),
                Some(*name)
            );
            assert_eq!(
                subject_entry(&reparsed, Nid::PKCS9_EMAILADDRESS).as_deref(),
                Some(*email)
            );
        }
    }

    #[test]
    fn test_san_only_for_ascii_email() {
        let (ca_key, ca_cert) = RsaCaBuilder::new()
            .subject_common_name("Test CA".to_string())
            .build()
            .unwrap();
        let build = |email: &str| {
            LeafCertificateBuilder::new(&ca_key, &ca_cert, user_public_key())
                .display_name("User".to_string())
                .email(email.to_string())
                .serial_number(BigNum::from_u32(9).unwrap())
                .build()
                .unwrap()
                .0
        };

        let comma = build("a,b@example.com");
        let emails: Vec<String> = comma
            .subject_alt_names()
            .unwrap()
            .iter()
            .filter_map(|n| n.email().map(|s| s.to_string()))
            .collect();
        assert_eq!(emails, vec!["a,b@example.com".to_string()]);

        assert!(build("jörg@example.com").subject_alt_names().is_none());
    }

    #[test]
    fn test_der_length_encoding() {
        assert_eq!(der_tlv(0x04, &[1, 2]), vec![0x04, 0x02, 1, 2]);
        let long = der_tlv(0x04, &[0u8; 200]);
        assert_eq!(&long[..3], &[0x04, 0x81, 200]);
        let longer = der_tlv(0x04, &[0u8; 300]);
        assert_eq!(&longer[..4], &[0x04, 0x82, 0x01, 0x2c]);
    }

    #[test]
    fn test_missing_serial_is_signing_error() {
        let (ca_key, ca_cert) = RsaCaBuilder::new()
            .subject_common_name("Test CA".to_string())
            .build()
            .unwrap();
        let result = LeafCertificateBuilder::new(&ca_key, &ca_cert, user_public_key())
            .display_name("Bob".to_string())
            .email("bob@example.com".to_string())
            .build();
        assert!(matches!(result, Err(CaError::Signing(_))));
    }
}
