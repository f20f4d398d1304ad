//! Throwaway TLS identities for fixture servers.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

/// A freshly generated self-signed certificate and its key.
///
/// Clients reach a fixture using this identity either by disabling
/// verification or by trusting [`TestIdentity::certificate_pem`] as a root.
pub struct TestIdentity {
    certificate_pem: String,
    certificate_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl std::fmt::Debug for TestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestIdentity").finish_non_exhaustive()
    }
}

impl TestIdentity {
    /// Generates an identity valid for `localhost` and `127.0.0.1`.
    #[must_use]
    pub fn localhost() -> Self {
        Self::for_names(&["localhost", "127.0.0.1"])
    }

    /// Generates an identity valid for each of `names`.
    #[must_use]
    pub fn for_names(names: &[&str]) -> Self {
        let names: Vec<String> = names.iter().map(ToString::to_string).collect();
        let certified = rcgen::generate_simple_self_signed(names)
            .expect("self-signed certificate generation should succeed");

        Self {
            certificate_pem: certified.cert.pem(),
            certificate_der: certified.cert.der().clone(),
            key_der: certified.key_pair.serialize_der(),
        }
    }

    #[must_use]
    pub fn certificate_pem(&self) -> String {
        self.certificate_pem.clone()
    }

    /// A rustls server configuration presenting this identity.
    #[must_use]
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));

        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("ring supports the default protocol versions")
            .with_no_client_auth()
            .with_single_cert(vec![self.certificate_der.clone()], key)
            .expect("generated key should match its certificate");

        Arc::new(config)
    }
}
