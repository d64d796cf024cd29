//! TLS configuration and certificate loading.
//!
//! Key material is read from fixed paths relative to the working directory.
//! A PKCS#8 `ENCRYPTED PRIVATE KEY` is decrypted in memory with the
//! configured passphrase before it reaches rustls. Encrypted keys without a
//! passphrase, and legacy `Proc-Type` encrypted keys, are rejected up front.

use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;
use pkcs8::der::pem::LineEnding;
use pkcs8::EncryptedPrivateKeyInfo;
use thiserror::Error;

use crate::config::schema::HttpsConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{kind} file not found: {path}")]
    NotFound { kind: &'static str, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("private key {0} is encrypted; set HTTPS_PASSPHRASE or provide an unencrypted PEM key")]
    EncryptedKey(PathBuf),

    #[error("failed to decrypt private key {path}: {reason}")]
    Decrypt { path: PathBuf, reason: String },

    #[error("invalid PEM in {path}: {reason}")]
    InvalidPem { path: PathBuf, reason: String },

    #[error("failed to build TLS config: {0}")]
    Config(std::io::Error),
}

fn read_pem(kind: &'static str, path: &Path) -> Result<Vec<u8>, TlsError> {
    if !path.exists() {
        return Err(TlsError::NotFound {
            kind,
            path: path.to_path_buf(),
        });
    }
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// True for PKCS#8 encrypted keys and legacy `Proc-Type: 4,ENCRYPTED` keys.
pub fn is_encrypted_key(pem: &[u8]) -> bool {
    let text = String::from_utf8_lossy(pem);
    text.contains("BEGIN ENCRYPTED PRIVATE KEY") || text.contains("Proc-Type: 4,ENCRYPTED")
}

/// Decrypt a PKCS#8 `ENCRYPTED PRIVATE KEY` into an unencrypted
/// `PRIVATE KEY` PEM.
pub fn decrypt_key(key: &[u8], key_path: &Path, passphrase: &str) -> Result<Vec<u8>, TlsError> {
    let failed = |reason: String| TlsError::Decrypt {
        path: key_path.to_path_buf(),
        reason,
    };

    let (label, der) = pkcs8::der::pem::decode_vec(key).map_err(|e| failed(e.to_string()))?;
    if label != "ENCRYPTED PRIVATE KEY" {
        return Err(failed(format!("unsupported key format {label}")));
    }
    let info = EncryptedPrivateKeyInfo::try_from(der.as_slice()).map_err(|e| failed(e.to_string()))?;
    let document = info.decrypt(passphrase).map_err(|e| failed(e.to_string()))?;
    let pem = document
        .to_pem("PRIVATE KEY", LineEnding::LF)
        .map_err(|e| failed(e.to_string()))?;
    Ok(pem.as_bytes().to_vec())
}

/// Resolve the key rustls will load: decrypted when it is encrypted and a
/// passphrase is configured, unchanged otherwise.
pub fn usable_key(key: Vec<u8>, key_path: &Path, passphrase: Option<&str>) -> Result<Vec<u8>, TlsError> {
    match (is_encrypted_key(&key), passphrase) {
        (true, Some(passphrase)) => decrypt_key(&key, key_path, passphrase),
        (true, None) => Err(TlsError::EncryptedKey(key_path.to_path_buf())),
        (false, Some(_)) => {
            tracing::warn!(service = "server", "HTTPS passphrase set but the key is unencrypted; ignoring it");
            Ok(key)
        }
        (false, None) => Ok(key),
    }
}

/// Check that the PEM blobs hold at least one certificate and a usable key.
pub fn validate_pem(cert: &[u8], cert_path: &Path, key: &[u8], key_path: &Path) -> Result<(), TlsError> {
    if is_encrypted_key(key) {
        return Err(TlsError::EncryptedKey(key_path.to_path_buf()));
    }

    let certs = rustls_pemfile::certs(&mut &cert[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidPem {
            path: cert_path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::InvalidPem {
            path: cert_path.to_path_buf(),
            reason: "no certificates found".to_string(),
        });
    }

    match rustls_pemfile::private_key(&mut &key[..]) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(TlsError::InvalidPem {
            path: key_path.to_path_buf(),
            reason: "no private key found".to_string(),
        }),
        Err(e) => Err(TlsError::InvalidPem {
            path: key_path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Load the rustls server configuration for `https`.
pub async fn load_tls_config(https: &HttpsConfig) -> Result<RustlsConfig, TlsError> {
    let cert_path = Path::new(&https.cert_path);
    let key_path = Path::new(&https.key_path);

    let cert = read_pem("certificate", cert_path)?;
    let key = read_pem("private key", key_path)?;
    let key = usable_key(key, key_path, https.passphrase.as_deref())?;
    validate_pem(&cert, cert_path, &key, key_path)?;

    // Both ring and aws-lc-rs are compiled in; pick one explicitly.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = RustlsConfig::from_pem(cert, key)
        .await
        .map_err(TlsError::Config)?;
    tracing::info!(service = "server", cert = %cert_path.display(), "TLS material loaded");
    Ok(config)
}
