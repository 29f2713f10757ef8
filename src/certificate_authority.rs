//! CA identity ownership
//!
//! [`CertificateAuthority`] holds the CA private key and self-signed certificate.
//! It is constructed explicitly and shared by reference with the issuer and the
//! verifier. [`AuthorityCell`] adds lazy first-use creation behind a mutex so that
//! concurrent callers never end up with two different CA identities.
//!
//! When key and certificate paths are configured the identity is loaded from disk,
//! or generated and written there on first use, so certificates keep verifying
//! across restarts. Without paths the identity lives only as long as the process.

use crate::configs::{CaConfig, StorageConfig};
use crate::error::{CaError, CaResult};
use crate::generate_ca::RsaCaBuilder;
use crate::generate_leaf_cert::subject_entry;
use crate::key_material;
use crate::serial::certificate_serial;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::SecretString;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

/// The CA key pair and certificate
pub struct CertificateAuthority {
    private_key: PKey<Private>,
    certificate: X509,
    certificate_pem: String,
}

impl CertificateAuthority {
    /// Generate a new CA identity from configured subject attributes
    pub fn generate(config: &CaConfig) -> CaResult<Self> {
        let (private_key, certificate) = RsaCaBuilder::new()
            .subject_common_name(config.common_name.clone())
            .country(config.country.clone())
            .state(config.state.clone())
            .organization(config.organization.clone())
            .key_size(config.key_size)
            .validity_months(config.validity_months)
            .build()?;
        let ca = Self::from_parts(private_key, certificate)?;
        info!(
            common_name = %config.common_name,
            key_bits = config.key_size,
            "Certificate Authority initialized"
        );
        Ok(ca)
    }

    /// Wrap an existing key and certificate
    ///
    /// # Errors
    /// [`CaError::Parse`] if the certificate's public key does not belong to `private_key`.
    pub fn from_parts(private_key: PKey<Private>, certificate: X509) -> CaResult<Self> {
        let cert_key = certificate
            .public_key()
            .map_err(|e| CaError::Parse(format!("Failed to read CA certificate key: {}", e)))?;
        if !cert_key.public_eq(&private_key) {
            return Err(CaError::Parse(
                "CA certificate does not match CA private key".to_string(),
            ));
        }
        let pem = certificate
            .to_pem()
            .map_err(|e| CaError::Parse(format!("Failed to encode CA certificate: {}", e)))?;
        let certificate_pem = String::from_utf8(pem).map_err(|e| CaError::Parse(e.to_string()))?;
        Ok(Self {
            private_key,
            certificate,
            certificate_pem,
        })
    }

    /// Build from PEM encoded key and certificate
    pub fn from_pem(
        key_pem: &[u8],
        cert_pem: &[u8],
        passphrase: Option<&SecretString>,
    ) -> CaResult<Self> {
        let private_key = key_material::private_key_from_pem(key_pem, passphrase)?;
        let certificate = X509::from_pem(cert_pem)
            .map_err(|e| CaError::Parse(format!("Failed to parse CA certificate: {}", e)))?;
        Self::from_parts(private_key, certificate)
    }

    /// Load the CA from `persistence`, or generate and store a new one if no files exist
    pub fn load_or_create(config: &CaConfig, persistence: &CaPersistence) -> CaResult<Self> {
        let key_exists = persistence.key_path.exists();
        let cert_exists = persistence.cert_path.exists();
        match (key_exists, cert_exists) {
            (true, true) => {
                let key_pem = fs::read(&persistence.key_path)?;
                let cert_pem = fs::read(&persistence.cert_path)?;
                let ca = Self::from_pem(&key_pem, &cert_pem, persistence.passphrase.as_ref())?;
                info!(
                    cert_path = %persistence.cert_path.display(),
                    "Loaded Certificate Authority from disk"
                );
                Ok(ca)
            }
            (false, false) => {
                let ca = Self::generate(config)?;
                ca.save(persistence)?;
                Ok(ca)
            }
            _ => Err(CaError::Storage(format!(
                "Incomplete CA material: key {} exists={}, certificate {} exists={}",
                persistence.key_path.display(),
                key_exists,
                persistence.cert_path.display(),
                cert_exists
            ))),
        }
    }

    /// Write key and certificate to the configured paths, replacing existing files
    pub fn save(&self, persistence: &CaPersistence) -> CaResult<()> {
        let key_pem =
            key_material::private_key_to_pem(&self.private_key, persistence.passphrase.as_ref())?;
        write_private_file(&persistence.key_path, &key_pem)?;
        if let Some(parent) = persistence.cert_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&persistence.cert_path, self.certificate_pem.as_bytes())?;
        info!(
            key_path = %persistence.key_path.display(),
            cert_path = %persistence.cert_path.display(),
            "Certificate Authority material written to disk"
        );
        Ok(())
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub(crate) fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    /// Canonical hex serial of the CA certificate
    pub fn serial_number(&self) -> CaResult<String> {
        certificate_serial(&self.certificate)
    }

    pub fn common_name(&self) -> String {
        subject_entry(&self.certificate, Nid::COMMONNAME)
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("common_name", &self.common_name())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn write_private_file(path: &Path, contents: &[u8]) -> CaResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Remove existing file first so the new mode applies
    if path.exists() {
        fs::remove_file(path)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Where the CA identity lives on disk
pub struct CaPersistence {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub passphrase: Option<SecretString>,
}

impl CaPersistence {
    pub fn new(key_path: PathBuf, cert_path: PathBuf) -> Self {
        Self {
            key_path,
            cert_path,
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    /// Resolve from configuration, reading the passphrase from its environment variable
    ///
    /// Returns `Ok(None)` when no paths are configured.
    pub fn from_config(storage: &StorageConfig) -> CaResult<Option<Self>> {
        let (key_path, cert_path) = match (&storage.ca_key_path, &storage.ca_cert_path) {
            (Some(key), Some(cert)) => (key.clone(), cert.clone()),
            (None, None) => return Ok(None),
            _ => {
                return Err(CaError::Storage(
                    "CA key and certificate paths must be configured together".to_string(),
                ))
            }
        };
        let mut persistence = Self::new(key_path, cert_path);
        if let Some(var) = &storage.ca_key_passphrase_env {
            let value = std::env::var(var).map_err(|_| {
                CaError::Storage(format!("CA key passphrase variable {} is not set", var))
            })?;
            persistence = persistence.with_passphrase(SecretString::from(value));
        }
        Ok(Some(persistence))
    }
}

impl fmt::Debug for CaPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaPersistence")
            .field("key_path", &self.key_path)
            .field("cert_path", &self.cert_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Lazily-initialized, replaceable holder of the current CA identity
pub struct AuthorityCell {
    config: CaConfig,
    persistence: Option<CaPersistence>,
    current: RwLock<Option<Arc<CertificateAuthority>>>,
    init_lock: Mutex<()>,
}

impl AuthorityCell {
    /// Empty cell; the CA is created on first use
    pub fn new(config: CaConfig, persistence: Option<CaPersistence>) -> Self {
        if persistence.is_none() {
            warn!("No CA storage configured; CA identity will not survive a restart");
        }
        Self {
            config,
            persistence,
            current: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Cell pre-populated with an existing authority
    pub fn with_authority(config: CaConfig, authority: CertificateAuthority) -> Self {
        Self {
            config,
            persistence: None,
            current: RwLock::new(Some(Arc::new(authority))),
            init_lock: Mutex::new(()),
        }
    }

    /// Current authority, if one has been created
    pub fn current(&self) -> Option<Arc<CertificateAuthority>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current authority, creating (or loading) it on first use
    pub fn get_or_initialize(&self) -> CaResult<Arc<CertificateAuthority>> {
        if let Some(ca) = self.current() {
            return Ok(ca);
        }
        let _guard = self.init_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ca) = self.current() {
            return Ok(ca);
        }
        let ca = match &self.persistence {
            Some(persistence) => CertificateAuthority::load_or_create(&self.config, persistence)?,
            None => CertificateAuthority::generate(&self.config)?,
        };
        Ok(self.install(ca))
    }

    /// Generate a fresh CA identity, replacing any existing one
    ///
    /// Certificates issued under the previous identity no longer verify afterwards.
    pub fn initialize(&self) -> CaResult<Arc<CertificateAuthority>> {
        let _guard = self.init_lock.lock().unwrap_or_else(|e| e.into_inner());
        let ca = CertificateAuthority::generate(&self.config)?;
        if let Some(persistence) = &self.persistence {
            ca.save(persistence)?;
        }
        if self.current().is_some() {
            warn!("Replacing existing CA identity; previously issued certificates become unverifiable");
        }
        Ok(self.install(ca))
    }

    /// CA certificate PEM, creating the CA first if needed
    pub fn ca_certificate_pem(&self) -> CaResult<String> {
        Ok(self.get_or_initialize()?.certificate_pem().to_string())
    }

    fn install(&self, ca: CertificateAuthority) -> Arc<CertificateAuthority> {
        let ca = Arc::new(ca);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&ca));
        ca
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_lazy_init_and_idempotent_read() {
        let cell = AuthorityCell::new(CaConfig::default(), None);
        assert!(cell.current().is_none());

        let first = cell.ca_certificate_pem().unwrap();
        let second = cell.ca_certificate_pem().unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_initialize_replaces_identity() {
        let cell = AuthorityCell::new(CaConfig::default(), None);
        let before = cell.ca_certificate_pem().unwrap();
        cell.initialize().unwrap();
        let after = cell.ca_certificate_pem().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_concurrent_first_use_yields_one_identity() {
        let cell = Arc::new(AuthorityCell::new(CaConfig::default(), None));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.ca_certificate_pem().unwrap())
            })
            .collect();
        let pems: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pems.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_ca_serial_and_name() {
        let ca = CertificateAuthority::generate(&CaConfig::default()).unwrap();
        assert_eq!(ca.serial_number().unwrap(), "1");
        assert_eq!(ca.common_name(), "Secure Email CA");
        assert!(!format!("{:?}", ca).contains("BEGIN"));
    }

    #[test]
    fn test_persisted_identity_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = CaPersistence::new(dir.path().join("ca.key"), dir.path().join("ca.pem"))
            .with_passphrase(SecretString::from("s3cret".to_string()));

        let created = CertificateAuthority::load_or_create(&CaConfig::default(), &persistence)
            .unwrap();
        let key_text = fs::read_to_string(&persistence.key_path).unwrap();
        assert!(key_text.contains("ENCRYPTED PRIVATE KEY"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&persistence.key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = CertificateAuthority::load_or_create(&CaConfig::default(), &persistence)
            .unwrap();
        assert_eq!(created.certificate_pem(), loaded.certificate_pem());
    }

    #[test]
    fn test_incomplete_material_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = CaPersistence::new(dir.path().join("ca.key"), dir.path().join("ca.pem"));
        fs::write(&persistence.cert_path, b"orphan").unwrap();
        let result = CertificateAuthority::load_or_create(&CaConfig::default(), &persistence);
        assert!(matches!(result, Err(CaError::Storage(_))));
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let a = CertificateAuthority::generate(&CaConfig::default()).unwrap();
        let b = CertificateAuthority::generate(&CaConfig::default()).unwrap();
        let result = CertificateAuthority::from_parts(
            a.private_key().clone(),
            b.certificate().clone(),
        );
        assert!(matches!(result, Err(CaError::Parse(_))));
    }
}
