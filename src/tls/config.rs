use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::{ClientConfig, RootCertStore};

use crate::error::TraceError;
use crate::http::transport::TransportConfig;
use crate::tls::verifier::AcceptAnyServerCert;

/// rustls client configuration for the default transport. Only HTTP/1.1 is
/// offered over ALPN. Certificates are checked by rustls' webpki verifier
/// unless `insecure` is set.
pub fn client_config(config: &TransportConfig) -> Result<ClientConfig, TraceError> {
    let root_store = match config.ca_cert_path.as_deref() {
        Some(path) => load_ca_certs(path)?,
        None => {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            root_store
        }
    };

    let provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let mut tls_config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    if config.insecure {
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider)));
    }
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(tls_config)
}

fn load_ca_certs(path: &Path) -> Result<RootCertStore, TraceError> {
    let ca_error = |source| TraceError::CaCert {
        path: path.display().to_string(),
        source,
    };
    let f = std::fs::File::open(path).map_err(ca_error)?;
    let mut rd = std::io::BufReader::new(f);
    let mut root_store = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut rd) {
        root_store.add(cert.map_err(ca_error)?)?;
    }
    Ok(root_store)
}
