//! RSA key generation and PEM encoding
//!
//! Stateless helpers shared by the CA bootstrap and the leaf issuer. Private keys
//! are written as PKCS#8 PEM, encrypted with AES-256-CBC when a passphrase is given.
//! Public keys are accepted either as SubjectPublicKeyInfo (`BEGIN PUBLIC KEY`)
//! or PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.

use crate::error::{CaError, CaResult};
use openssl::pkey::{HasPublic, Id, PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use secrecy::{ExposeSecret, SecretString};

/// Smallest RSA modulus the CA will generate or accept, in bits
pub const MIN_RSA_KEY_SIZE: u32 = 2048;

/// Generate a fresh RSA key pair
///
/// # Errors
/// Returns [`CaError::KeyGeneration`] if `bits` is below [`MIN_RSA_KEY_SIZE`]
/// or OpenSSL fails to produce the key. There is no fallback to a smaller size.
pub fn generate_rsa_keypair(bits: u32) -> CaResult<PKey<Private>> {
    if bits < MIN_RSA_KEY_SIZE {
        return Err(CaError::KeyGeneration(format!(
            "RSA key size {} is below the minimum of {} bits",
            bits, MIN_RSA_KEY_SIZE
        )));
    }
    let rsa = Rsa::generate(bits)
        .map_err(|e| CaError::KeyGeneration(format!("Failed to generate RSA keypair: {}", e)))?;
    PKey::from_rsa(rsa)
        .map_err(|e| CaError::KeyGeneration(format!("Failed to create private key: {}", e)))
}

/// Parse an RSA public key from PEM
///
/// # Errors
/// Returns [`CaError::InvalidPublicKey`] when the input is not PEM, does not decode,
/// or holds a non-RSA key.
pub fn public_key_from_pem(pem: &str) -> CaResult<PKey<Public>> {
    let trimmed = pem.trim();
    if trimmed.is_empty() {
        return Err(CaError::InvalidPublicKey("public key PEM is empty".to_string()));
    }

    let key = match PKey::public_key_from_pem(trimmed.as_bytes()) {
        Ok(key) => key,
        Err(spki_err) => {
            let rsa = Rsa::public_key_from_pem_pkcs1(trimmed.as_bytes()).map_err(|_| {
                CaError::InvalidPublicKey(format!("Failed to parse public key PEM: {}", spki_err))
            })?;
            PKey::from_rsa(rsa).map_err(|e| CaError::InvalidPublicKey(e.to_string()))?
        }
    };

    if key.id() != Id::RSA {
        return Err(CaError::InvalidPublicKey(format!(
            "expected an RSA key, found {:?}",
            key.id()
        )));
    }
    if key.bits() < MIN_RSA_KEY_SIZE {
        return Err(CaError::InvalidPublicKey(format!(
            "RSA key size {} is below the minimum of {} bits",
            key.bits(),
            MIN_RSA_KEY_SIZE
        )));
    }
    Ok(key)
}

/// Encode the public half of a key as SubjectPublicKeyInfo PEM
pub fn public_key_to_pem<T: HasPublic>(key: &PKey<T>) -> CaResult<String> {
    let pem = key
        .public_key_to_pem()
        .map_err(|e| CaError::Parse(format!("Failed to encode public key: {}", e)))?;
    String::from_utf8(pem).map_err(|e| CaError::Parse(e.to_string()))
}

/// Encode a private key as PKCS#8 PEM, encrypted if a passphrase is given
pub fn private_key_to_pem(
    key: &PKey<Private>,
    passphrase: Option<&SecretString>,
) -> CaResult<Vec<u8>> {
    match passphrase {
        Some(pwd) if !pwd.expose_secret().is_empty() => key
            .private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                pwd.expose_secret().as_bytes(),
            )
            .map_err(|e| CaError::Parse(format!("Failed to encrypt private key: {}", e))),
        _ => key
            .private_key_to_pem_pkcs8()
            .map_err(|e| CaError::Parse(format!("Failed to encode private key: {}", e))),
    }
}

/// Decode a PEM private key, decrypting with the passphrase if one is given
pub fn private_key_from_pem(
    pem: &[u8],
    passphrase: Option<&SecretString>,
) -> CaResult<PKey<Private>> {
    let key = match passphrase {
        Some(pwd) if !pwd.expose_secret().is_empty() => {
            PKey::private_key_from_pem_passphrase(pem, pwd.expose_secret().as_bytes())
                .map_err(|e| CaError::Parse(format!("Failed to decrypt private key: {}", e)))?
        }
        _ => PKey::private_key_from_pem(pem)
            .map_err(|e| CaError::Parse(format!("Failed to parse private key PEM: {}", e)))?,
    };
    if key.id() != Id::RSA {
        return Err(CaError::Parse("CA private key is not an RSA key".to_string()));
    }
    Ok(key)
}
