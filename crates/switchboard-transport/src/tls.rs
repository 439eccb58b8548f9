//! TLS credentials for secure listeners and `wss://` dialing.
//!
//! The credentials are opaque PEM blobs supplied by the operator. They are
//! only parsed when a TLS configuration is built from them.

use std::fmt;

/// A PEM-encoded certificate chain and its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsCredentials {
    certificate_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
}

impl TlsCredentials {
    /// Wraps the given PEM blobs without validating them.
    pub fn new(certificate_pem: impl Into<Vec<u8>>, private_key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            certificate_pem: certificate_pem.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    /// Reads both PEM files from disk.
    pub fn from_pem_files(
        certificate: impl AsRef<std::path::Path>,
        private_key: impl AsRef<std::path::Path>,
    ) -> std::io::Result<Self> {
        Ok(Self::new(
            std::fs::read(certificate)?,
            std::fs::read(private_key)?,
        ))
    }

    /// The certificate chain, PEM-encoded.
    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    /// The private key, PEM-encoded.
    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key_pem
    }
}

// Keep key material out of logs.
impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("certificate_pem", &format_args!("{} bytes", self.certificate_pem.len()))
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[cfg(feature = "websocket")]
mod config {
    use std::sync::Arc;

    use rustls::{ClientConfig, RootCertStore, ServerConfig};
    use rustls_pki_types::pem::PemObject;
    use rustls_pki_types::{CertificateDer, PrivateKeyDer};

    use super::TlsCredentials;
    use crate::TransportError;

    impl TlsCredentials {
        fn certificates(&self) -> Result<Vec<CertificateDer<'static>>, TransportError> {
            let certs = CertificateDer::pem_slice_iter(&self.certificate_pem)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| TransportError::Tls(format!("certificate: {e}")))?;
            if certs.is_empty() {
                return Err(TransportError::Tls(
                    "certificate: no PEM certificate found".into(),
                ));
            }
            Ok(certs)
        }

        fn private_key(&self) -> Result<PrivateKeyDer<'static>, TransportError> {
            PrivateKeyDer::from_pem_slice(&self.private_key_pem)
                .map_err(|e| TransportError::Tls(format!("private key: {e}")))
        }

        /// Builds the configuration for a TLS listener presenting these
        /// credentials.
        pub fn server_config(&self) -> Result<Arc<ServerConfig>, TransportError> {
            let certs = self.certificates()?;
            let key = self.private_key()?;
            let config = ServerConfig::builder_with_provider(provider())
                .with_safe_default_protocol_versions()
                .map_err(|e| TransportError::Tls(e.to_string()))?
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            Ok(Arc::new(config))
        }

        /// Builds the configuration for dialing a TLS endpoint.
        ///
        /// The certificate chain is trusted as the root, so an operator can
        /// reach a server that uses a self-signed certificate. The private key
        /// must still parse.
        pub fn client_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
            self.private_key()?;
            let mut roots = RootCertStore::empty();
            for cert in self.certificates()? {
                roots
                    .add(cert)
                    .map_err(|e| TransportError::Tls(format!("trust root: {e}")))?;
            }
            let config = ClientConfig::builder_with_provider(provider())
                .with_safe_default_protocol_versions()
                .map_err(|e| TransportError::Tls(e.to_string()))?
                .with_root_certificates(roots)
                .with_no_client_auth();
            Ok(Arc::new(config))
        }
    }

    fn provider() -> Arc<rustls::crypto::CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }
}
