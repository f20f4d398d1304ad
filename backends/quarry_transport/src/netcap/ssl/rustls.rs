//! Client-side TLS contexts built on rustls.
//!
//! WHY: Every secure connection to a target should share one `ClientConfig`
//! so session tickets issued by the server are reused across handshakes.
//!
//! WHAT: [`SecureContextProvider`] produces shareable `Arc<ClientConfig>`
//! values (verified, custom roots, or non-verifying for local fixtures) and
//! [`SecureContextFactory`] lets callers plug their own producer into the
//! client.

use crate::netcap::errors::{TlsError, TlsResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::Resumption;
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;

pub use rustls::ClientConfig;

/// Number of client sessions kept for handshake resumption.
pub const SESSION_CACHE_SIZE: usize = 128;

/// A TLS client configuration shared read-only by every secure connection
/// built from it.
pub type SecureContext = Arc<ClientConfig>;

/// Pluggable producer of [`SecureContext`] values.
pub type SecureContextFactory = Arc<dyn Fn() -> TlsResult<SecureContext> + Send + Sync>;

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

fn tune_sessions(config: &mut ClientConfig) {
    config.resumption = Resumption::in_memory_sessions(SESSION_CACHE_SIZE);
}

/// Builds TLS client contexts.
pub struct SecureContextProvider;

impl SecureContextProvider {
    /// Context that verifies peers against the system trust store.
    ///
    /// Falls back to the bundled webpki roots when the platform exposes no
    /// certificates (minimal containers, for example).
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::NoTrustAnchors`] if no anchors could be loaded at
    /// all, or a rustls error if the configuration cannot be built.
    pub fn verified() -> TlsResult<SecureContext> {
        let mut roots = RootCertStore::empty();

        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            tracing::debug!("Skipping native certificate source: {err}");
        }

        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!("Loaded {added} native trust anchors ({ignored} ignored)");

        if roots.is_empty() {
            tracing::debug!("No native trust anchors found, using bundled webpki roots");
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        if roots.is_empty() {
            return Err(TlsError::NoTrustAnchors);
        }

        Self::from_roots(roots)
    }

    /// Context that trusts exactly the certificates in `pem`.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::InvalidCertificate`] when the PEM data is malformed
    /// or holds no certificate.
    pub fn with_root_certificates(pem: &[u8]) -> TlsResult<SecureContext> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|err| TlsError::InvalidCertificate(err.to_string()))?;

        if certs.is_empty() {
            return Err(TlsError::InvalidCertificate(
                "no certificates found in PEM data".to_string(),
            ));
        }

        let mut roots = RootCertStore::empty();
        for cert in certs {
            roots.add(cert)?;
        }

        Self::from_roots(roots)
    }

    /// Context that accepts any server certificate.
    ///
    /// **Only for local test fixtures.** It is never used as a default.
    ///
    /// # Errors
    ///
    /// Returns a rustls error if the protocol versions cannot be configured.
    pub fn insecure() -> TlsResult<SecureContext> {
        let provider = crypto_provider();
        let mut config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider)))
            .with_no_client_auth();

        tune_sessions(&mut config);
        Ok(Arc::new(config))
    }

    /// The production factory: [`SecureContextProvider::verified`].
    #[must_use]
    pub fn default_factory() -> SecureContextFactory {
        Arc::new(Self::verified)
    }

    /// Factory producing [`SecureContextProvider::insecure`] contexts.
    #[must_use]
    pub fn insecure_factory() -> SecureContextFactory {
        Arc::new(Self::insecure)
    }

    /// Factory producing contexts that trust the given PEM certificates.
    #[must_use]
    pub fn root_certificates_factory(pem: Vec<u8>) -> SecureContextFactory {
        Arc::new(move || Self::with_root_certificates(&pem))
    }

    fn from_roots(roots: RootCertStore) -> TlsResult<SecureContext> {
        let mut config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        tune_sessions(&mut config);
        Ok(Arc::new(config))
    }
}

/// Accepts every certificate while still checking handshake signatures.
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// WHY: The test-only context must still be a usable client config
    /// WHAT: `insecure()` builds a plain HTTP/1.1 client config
    #[test]
    fn test_insecure_context_builds() {
        let ctx = SecureContextProvider::insecure().expect("insecure context");
        assert!(ctx.alpn_protocols.is_empty());
    }

    /// WHY: Production default must verify peers against real anchors
    /// WHAT: `verified()` yields a context from native or bundled roots
    #[test]
    fn test_verified_context_builds() {
        let ctx = SecureContextProvider::verified();
        assert!(ctx.is_ok(), "verified context failed: {:?}", ctx.err());
    }

    /// WHY: Garbage PEM must not silently produce an empty trust store
    /// WHAT: Malformed and empty inputs are rejected
    #[test]
    fn test_custom_roots_reject_bad_pem() {
        let bad = b"-----BEGIN CERTIFICATE-----\nINVALID\n-----END CERTIFICATE-----\n";
        assert!(SecureContextProvider::with_root_certificates(bad).is_err());

        let empty = SecureContextProvider::with_root_certificates(b"");
        assert!(matches!(empty, Err(TlsError::InvalidCertificate(_))));
    }

    /// WHY: Fixture certificates are trusted through the custom-roots path
    /// WHAT: A freshly generated self-signed certificate is accepted
    #[test]
    fn test_custom_roots_accept_self_signed() {
        let identity = quarry_testing::tls::TestIdentity::localhost();
        let ctx = SecureContextProvider::with_root_certificates(identity.certificate_pem().as_bytes());
        assert!(ctx.is_ok(), "custom roots failed: {:?}", ctx.err());
    }

    /// WHY: The facade stores factories, not contexts
    /// WHAT: Each factory call yields an independent, usable context
    #[test]
    fn test_factories_produce_contexts() {
        let factory = SecureContextProvider::insecure_factory();
        let first = factory().expect("first");
        let second = factory().expect("second");
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
