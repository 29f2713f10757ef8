//! Certificate serial numbers
//!
//! Serials travel as lowercase hex without separators. Comparisons always go
//! through [`normalize_serial`] so `0A1B`, `0a1b` and `a1b` name the same serial.

use crate::error::{CaError, CaResult};
use openssl::bn::{BigNum, MsbOption};
use openssl::x509::X509Ref;

/// Bits of randomness in a generated serial
pub const SERIAL_BITS: i32 = 128;

/// Canonical form of a hex serial: lowercase, no leading zeros
///
/// # Errors
/// [`CaError::InputFormat`] if the serial is empty or has non-hex characters.
pub fn normalize_serial(serial: &str) -> CaResult<String> {
    let trimmed = serial.trim();
    if trimmed.is_empty() {
        return Err(CaError::InputFormat("serial number is empty".to_string()));
    }
    if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CaError::InputFormat(format!(
            "serial number is not hexadecimal: {}",
            trimmed
        )));
    }
    let stripped = trimmed.trim_start_matches('0');
    if stripped.is_empty() {
        return Ok("0".to_string());
    }
    Ok(stripped.to_ascii_lowercase())
}

/// Canonical hex serial of a parsed certificate
pub fn certificate_serial(cert: &X509Ref) -> CaResult<String> {
    let bn = cert
        .serial_number()
        .to_bn()
        .map_err(|e| CaError::Parse(format!("Failed to read serial number: {}", e)))?;
    let hex = bn
        .to_hex_str()
        .map_err(|e| CaError::Parse(format!("Failed to encode serial number: {}", e)))?;
    normalize_serial(&hex)
}

/// Supplies candidate serial numbers to the issuer
pub trait SerialSource: Send + Sync {
    fn next_serial(&self) -> CaResult<BigNum>;
}

/// 128-bit serials from the OpenSSL CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSerialSource;

impl SerialSource for RandomSerialSource {
    fn next_serial(&self) -> CaResult<BigNum> {
        let mut serial = BigNum::new()
            .map_err(|e| CaError::Signing(format!("Failed to allocate serial: {}", e)))?;
        serial
            .rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)
            .map_err(|e| CaError::Signing(format!("Failed to generate serial: {}", e)))?;
        Ok(serial)
    }
}

/// Hex form of a serial as produced by [`normalize_serial`]
pub fn serial_to_hex(serial: &BigNum) -> CaResult<String> {
    let hex = serial
        .to_hex_str()
        .map_err(|e| CaError::Signing(format!("Failed to encode serial number: {}", e)))?;
    normalize_serial(&hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_serial() {
        assert_eq!(normalize_serial("0A1B").unwrap(), "a1b");
        assert_eq!(normalize_serial(" a1b ").unwrap(), "a1b");
        assert_eq!(normalize_serial("000").unwrap(), "0");
        assert!(matches!(normalize_serial(""), Err(CaError::InputFormat(_))));
        assert!(matches!(
            normalize_serial("12-34"),
            Err(CaError::InputFormat(_))
        ));
    }

    #[test]
    fn test_random_serials_are_hex_and_bounded() {
        let source = RandomSerialSource;
        for _ in 0..32 {
            let serial = source.next_serial().unwrap();
            assert!(serial.num_bits() <= SERIAL_BITS);
            let hex = serial_to_hex(&serial).unwrap();
            assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            assert!(hex.len() <= 32);
        }
    }
}
