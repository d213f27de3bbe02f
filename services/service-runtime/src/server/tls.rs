//! Server TLS material

use crate::config::TlsConfig;
use crate::error::RuntimeError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

fn open(path: &Path) -> Result<BufReader<File>, RuntimeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| RuntimeError::Tls {
            reason: format!("cannot read {}: {e}", path.display()),
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RuntimeError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RuntimeError::Tls {
            reason: format!("failed to parse certificates in {}: {e}", path.display()),
        })?;
    if certs.is_empty() {
        return Err(RuntimeError::Tls {
            reason: format!("no certificate found in {}", path.display()),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, RuntimeError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| RuntimeError::Tls {
            reason: format!("failed to parse private key in {}: {e}", path.display()),
        })?
        .ok_or_else(|| RuntimeError::Tls {
            reason: format!("no private key found in {}", path.display()),
        })
}

/// Build a server TLS configuration offering HTTP/2 and HTTP/1.1.
///
/// # Errors
///
/// Returns [`RuntimeError::Tls`] if the certificate chain or key cannot be
/// read, parsed, or do not match.
pub fn load_server_tls(config: &TlsConfig) -> Result<Arc<rustls::ServerConfig>, RuntimeError> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;

    let mut server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| RuntimeError::Tls {
        reason: e.to_string(),
    })?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| RuntimeError::Tls {
        reason: e.to_string(),
    })?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(server_config))
}
