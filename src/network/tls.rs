//! TLS acceptor construction and client certificate fingerprints.

use crate::config::TlsConfig;
use rustls_pemfile::{certs, private_key};
use sha2::{Digest, Sha256};
use std::io::{BufReader, Cursor};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoKey(String),
    #[error("invalid client CA: {0}")]
    ClientCa(String),
    #[error("rustls: {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),
}

fn read_pem(path: &str) -> Result<BufReader<Cursor<Vec<u8>>>, TlsError> {
    let data = std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_string(),
        source,
    })?;
    Ok(BufReader::new(Cursor::new(data)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<CertificateDer> = certs(&mut read_pem(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

/// Load certificate material and build an acceptor. Client certificates
/// are requested, but optional, when a CA bundle is configured.
pub fn load_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&config.cert)?;
    let key: PrivateKeyDer = private_key(&mut read_pem(&config.key)?)
        .map_err(|source| TlsError::Read {
            path: config.key.clone(),
            source,
        })?
        .ok_or_else(|| TlsError::NoKey(config.key.clone()))?;

    let builder = ServerConfig::builder();
    let server_config = match &config.client_ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca)? {
                roots
                    .add(cert)
                    .map_err(|e| TlsError::ClientCa(e.to_string()))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|e| TlsError::ClientCa(e.to_string()))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Hex SHA-256 of a DER certificate.
pub fn certfp(cert: &[u8]) -> String {
    Sha256::digest(cert)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
