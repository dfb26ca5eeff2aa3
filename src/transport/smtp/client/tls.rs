use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use rustls::{pki_types::ServerName, ClientConfig, RootCertStore};

use crate::transport::smtp::{error, Error};

/// Parameters to use for secure clients
#[derive(Clone)]
pub struct TlsParameters {
    pub(crate) connector: Arc<ClientConfig>,
    pub(super) server_name: ServerName<'static>,
    /// The domain name which is expected in the TLS certificate from the server
    domain: String,
}

impl Debug for TlsParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsParameters")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl TlsParameters {
    /// Creates a new `TlsParameters` trusting the Mozilla roots shipped with
    /// `webpki-roots`
    pub fn new(domain: String) -> Result<Self, Error> {
        let mut root_cert_store = RootCertStore::empty();
        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(domain, root_cert_store)
    }

    /// Creates a new `TlsParameters` trusting only the given roots
    pub fn with_roots(domain: String, roots: RootCertStore) -> Result<Self, Error> {
        let provider = rustls::crypto::CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

        let tls = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(rustls::ALL_VERSIONS)
            .map_err(error::tls)?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(domain.clone()).map_err(error::tls)?;

        Ok(TlsParameters {
            connector: Arc::new(tls),
            server_name,
            domain,
        })
    }

    /// The domain name which is expected in the TLS certificate from the server
    pub fn domain(&self) -> &str {
        &self.domain
    }
}
