use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::debug;
use rustls::{Certificate, PrivateKey, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::config::Tls;

/// Builds the shared TLS context handed to every secure session.
pub fn load_acceptor(tls: &Tls) -> Result<TlsAcceptor> {
    let cert_chain = load_certs(&tls.cert)
        .with_context(|| format!("Failed to load certificates from {}", tls.cert.display()))?;
    let key = load_key(&tls.key)
        .with_context(|| format!("Failed to load private key from {}", tls.key.display()))?;

    let mut server_config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .context("Invalid certificate or key")?;

    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let pem = fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())?;

    if certs.is_empty() {
        bail!("No certificates found");
    }

    debug!("Loaded {} certificate(s) from {}", certs.len(), path.display());

    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey> {
    let pem = fs::read(path)?;

    let key = rustls_pemfile::pkcs8_private_keys(&mut pem.as_slice())?
        .into_iter()
        .chain(rustls_pemfile::rsa_private_keys(&mut pem.as_slice())?)
        .next();

    match key {
        Some(key) => Ok(PrivateKey(key)),
        None => bail!("No PKCS#8 or RSA private key found"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    use super::*;

    pub(crate) fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    pub(crate) fn test_acceptor() -> TlsAcceptor {
        let tls = Tls {
            cert: testdata("server.crt"),
            key: testdata("server.key"),
        };

        load_acceptor(&tls).unwrap()
    }

    /// Client trusting only the test CA that signed `server.crt`.
    pub(crate) fn test_connector() -> TlsConnector {
        let mut roots = RootCertStore::empty();
        for ca in load_certs(&testdata("ca.crt")).unwrap() {
            roots.add(&ca).unwrap();
        }

        let client_config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        TlsConnector::from(Arc::new(client_config))
    }

    #[test]
    fn loads_fixture_identity() {
        test_acceptor();
    }

    #[test]
    fn key_file_as_cert_is_rejected() {
        let tls = Tls {
            cert: testdata("server.key"),
            key: testdata("server.key"),
        };

        let err = match load_acceptor(&tls) {
            Ok(_) => panic!("key file accepted as certificate chain"),
            Err(err) => err,
        };
        assert!(format!("{:#}", err).contains("No certificates found"), "{:#}", err);
    }

    #[test]
    fn missing_key_is_rejected() {
        let tls = Tls {
            cert: testdata("server.crt"),
            key: testdata("ca.crt"),
        };

        assert!(load_acceptor(&tls).is_err());
    }
}
