//! TLS support for the ephemeral listener, built on rustls.

use std::io::{Error as IoError, Result as IoResult};
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::aws_lc_rs;
use tokio_rustls::rustls::pki_types::PrivateKeyDer;

/// Private key and certificate in PEM form.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Keycert {
    /// Private key.
    pub key: Vec<u8>,
    /// Certificate chain.
    pub cert: Vec<u8>,
}

impl Keycert {
    /// Create a new, empty keycert.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the TLS private key from a PEM file.
    #[inline]
    pub fn key_from_path(mut self, path: impl AsRef<Path>) -> IoResult<Self> {
        self.key = std::fs::read(path)?;
        Ok(self)
    }

    /// Set the TLS private key from PEM bytes.
    #[inline]
    #[must_use]
    pub fn key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    /// Load the TLS certificate chain from a PEM file.
    #[inline]
    pub fn cert_from_path(mut self, path: impl AsRef<Path>) -> IoResult<Self> {
        self.cert = std::fs::read(path)?;
        Ok(self)
    }

    /// Set the TLS certificate chain from PEM bytes.
    #[inline]
    #[must_use]
    pub fn cert(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.cert = cert.into();
        self
    }

    /// Build a server-side TLS acceptor from this keycert.
    pub(crate) fn build_acceptor(&self) -> IoResult<TlsAcceptor> {
        let certs = rustls_pemfile::certs(&mut self.cert.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| IoError::other("failed to parse tls certificates"))?;
        if certs.is_empty() {
            return Err(IoError::other("no tls certificate found"));
        }

        let key = {
            let mut ec = rustls_pemfile::ec_private_keys(&mut self.key.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| IoError::other("failed to parse tls private keys"))?;
            if !ec.is_empty() {
                PrivateKeyDer::Sec1(ec.remove(0))
            } else {
                let mut pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut self.key.as_slice())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| IoError::other("failed to parse tls private keys"))?;
                if !pkcs8.is_empty() {
                    PrivateKeyDer::Pkcs8(pkcs8.remove(0))
                } else {
                    let mut rsa = rustls_pemfile::rsa_private_keys(&mut self.key.as_slice())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| IoError::other("failed to parse tls private keys"))?;
                    if !rsa.is_empty() {
                        PrivateKeyDer::Pkcs1(rsa.remove(0))
                    } else {
                        return Err(IoError::other("failed to parse tls private keys"));
                    }
                }
            }
        };

        let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|err| IoError::other(format!("tls protocol configuration failed: {err}")))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| IoError::other(format!("invalid tls key/certificate: {err}")))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}
