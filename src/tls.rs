//! TLS acceptor construction
//!
//! The listener uses a certificate from the configured PEM files when both
//! are present; otherwise it falls back to a freshly generated self-signed
//! certificate, which is only suitable for development.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{ CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer };
use tracing::{ info, warn };

use crate::error::{ ChatError, Result };

/// Build the TLS acceptor from the configured certificate paths.
pub fn build_acceptor(cert_file: Option<&Path>, key_file: Option<&Path>) -> Result<TlsAcceptor> {
    let (certs, key) = match (cert_file, key_file) {
        (Some(cert), Some(key)) => {
            info!(cert = %cert.display(), "loading TLS certificate");
            load_from_files(cert, key)?
        }
        _ => {
            warn!("no TLS certificate configured, using a self-signed development certificate");
            self_signed()?
        }
    };

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ChatError::tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_from_files(
    cert_path: &Path,
    key_path: &Path
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(ChatError::tls(format!("no certificates in {}", cert_path.display())));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| ChatError::tls(format!("no private key in {}", key_path.display())))?;

    Ok((certs, key))
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ChatError::tls(e.to_string()))?;

    let cert = certified.cert.der().clone();
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
    Ok((vec![cert], PrivateKeyDer::from(key)))
}
