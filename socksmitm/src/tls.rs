use crate::cert_minter::CertMinter;
use crate::error::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Build a one-shot `rustls::ServerConfig` presenting a leaf minted for
/// `sni`. A fresh config per connection (rather than a shared
/// `ResolvesServerCert`) mirrors the teacher's `build_server_config`: by the
/// time this is called the SNI is already known from sniffing the
/// ClientHello ourselves, so there is nothing left for rustls to resolve
/// dynamically.
pub fn server_config_for(minter: &CertMinter, sni: &str) -> Result<ServerConfig> {
    let minted = minter.mint(sni)?;
    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(minted.chain.clone(), minted.private_key())
        .map_err(|e| Error::crypto(format!("failed to build TLS server config for {sni}: {e}")))
}

/// Terminate TLS on `stream` (normally the application side of a [`crate::pipe`]
/// splice) using a leaf minted for `sni`.
pub async fn terminate<S>(
    stream: S,
    minter: &CertMinter,
    sni: &str,
) -> Result<tokio_rustls::server::TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = server_config_for(minter, sni)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    acceptor
        .accept(stream)
        .await
        .map_err(|e| Error::crypto(format!("TLS handshake failed: {e}")))
}

/// Client config for dialing upstream servers without verifying their
/// certificate — the proxy already broke the chain of trust by
/// intercepting, so by the time a `NormalRoundTrip` dials out there is
/// nothing left to verify against; the client saw (and trusted) our minted
/// leaf, not the origin's real one.
pub fn insecure_upstream_client_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth()
}

pub fn insecure_upstream_connector() -> TlsConnector {
    TlsConnector::from(Arc::new(insecure_upstream_client_config()))
}

#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        // Accept whatever the upstream offers; we never inspect the
        // signature anyway.
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
