//! Error types for certificate authority operations
//!
//! Chain verification failures are not represented here. A certificate that
//! fails to verify is a normal [`Verification`](crate::verifier::Verification)
//! outcome, not an error.

/// Errors raised by the CA core
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    /// Input is missing, empty or lacks the expected envelope
    #[error("Invalid input format: {0}")]
    InputFormat(String),

    /// Certificate or key structure could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Supplied public key is not an RSA public key in PEM form
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// RSA key pair generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Building or signing a certificate failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// No unused serial number could be drawn within the retry limit
    #[error("Serial number collision after {0} attempts")]
    SerialCollision(u32),

    /// Serial number already has a revocation entry
    #[error("Certificate already revoked: serial={0}")]
    AlreadyRevoked(String),

    /// Persistent store could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaError {
    /// Whether the failed operation may succeed if simply repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaError::SerialCollision(_))
    }
}

/// Result alias used across the CA core
pub type CaResult<T> = std::result::Result<T, CaError>;
