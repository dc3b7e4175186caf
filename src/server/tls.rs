use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use super::ServerError;
use crate::config::TlsConfig;

/// Build the acceptor used by TLS listeners from PEM files.
pub fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let certs = load_cert_chain(&config.certificate)?;
    let key = load_private_key(&config.private_key)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| ServerError::Tls(format!("{}: {:?}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|e| ServerError::Tls(format!("{}: {:?}", path.display(), e)))
}
