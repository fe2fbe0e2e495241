use crate::ca::CaStore;
use crate::error::{Error, Result};
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyUsagePurpose, SanType,
};
use rsa::pkcs8::EncodePrivateKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};

const LEAF_KEY_BITS: usize = 2048;
const NOT_BEFORE_SKEW: Duration = Duration::hours(1);
const VALIDITY: Duration = Duration::days(365);

/// A minted leaf certificate plus its signing key, ready to hand to
/// `rustls::ServerConfig::builder().with_single_cert(..)`.
pub struct MintedCert {
    pub chain: Vec<CertificateDer<'static>>,
    pub key_der: Vec<u8>,
}

impl MintedCert {
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::from(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

/// Mints and caches leaf certificates keyed by eTLD+1, signed by a [`CaStore`].
///
/// One instance is shared across all sessions; [`mint`](CertMinter::mint) is
/// synchronous and may block briefly on RSA key generation for a cache miss.
/// That's acceptable here: it happens once per eTLD+1 for the process
/// lifetime, and the session calling it has nothing else to do until the
/// leaf exists anyway.
pub struct CertMinter {
    ca: Arc<CaStore>,
    cache: Mutex<HashMap<String, Arc<MintedCert>>>,
}

impl CertMinter {
    pub fn new(ca: Arc<CaStore>) -> Self {
        Self {
            ca,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Mint (or return a cached) leaf certificate covering `sni`.
    ///
    /// Caching is keyed by [`etld_plus_one`], not the exact SNI, so that
    /// `a.example.com` and `b.example.com` share one leaf (a `*.example.com`
    /// SAN) and one RSA keygen.
    pub fn mint(&self, sni: &str) -> Result<Arc<MintedCert>> {
        let cache_key = etld_plus_one(sni);

        if let Some(hit) = self.cache.lock().unwrap().get(&cache_key).cloned() {
            return Ok(hit);
        }

        let minted = Arc::new(self.generate(&cache_key, sni)?);
        self.cache
            .lock()
            .unwrap()
            .insert(cache_key, minted.clone());
        Ok(minted)
    }

    fn generate(&self, cache_key: &str, sni: &str) -> Result<MintedCert> {
        let leaf_key_der = generate_rsa_pkcs8_der()?;
        let leaf_key = rcgen::KeyPair::from_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(leaf_key_der.clone()),
            &rcgen::PKCS_RSA_SHA256,
        )
        .map_err(|e| Error::crypto(format!("failed to load leaf key: {e}")))?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cache_key);
        params.distinguished_name = dn;

        params.subject_alt_names = subject_alt_names(cache_key, sni);

        let now = OffsetDateTime::now_utc();
        params.not_before = now - NOT_BEFORE_SKEW;
        params.not_after = now + VALIDITY;
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&random_serial()));

        let leaf_cert = params
            .signed_by(&leaf_key, self.ca.signing_cert(), self.ca.signing_key())
            .map_err(|e| Error::crypto(format!("failed to sign leaf cert for {cache_key}: {e}")))?;

        let chain = vec![
            CertificateDer::from(leaf_cert.der().to_vec()),
            self.ca.root_cert_der().clone(),
        ];

        Ok(MintedCert {
            chain,
            key_der: leaf_key_der,
        })
    }
}

fn subject_alt_names(cache_key: &str, sni: &str) -> Vec<SanType> {
    if let Ok(ip) = sni.parse::<IpAddr>() {
        return vec![SanType::IpAddress(ip)];
    }
    vec![
        SanType::DnsName(cache_key.try_into().expect("valid dns name")),
        SanType::DnsName(
            format!("*.{cache_key}")
                .try_into()
                .expect("valid wildcard dns name"),
        ),
    ]
}

fn generate_rsa_pkcs8_der() -> Result<Vec<u8>> {
    let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), LEAF_KEY_BITS)
        .map_err(|e| Error::crypto(format!("RSA keygen failed: {e}")))?;
    key.to_pkcs8_der()
        .map(|d| d.as_bytes().to_vec())
        .map_err(|e| Error::crypto(format!("PKCS#8 encode failed: {e}")))
}

fn random_serial() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Top bit clear keeps the big-endian value unambiguously positive.
    bytes[0] &= 0x7f;
    bytes
}

/// Approximate eTLD+1: the last two dot-separated labels of a hostname.
///
/// This is intentionally not a public-suffix-list lookup (`co.uk`-style
/// multi-label TLDs collapse to their last two labels just like everything
/// else) — it only needs to be a stable, collision-resistant cache key for
/// sibling subdomains of the same registrable domain, not a legally correct
/// registrable-domain computation.
pub fn etld_plus_one(host: &str) -> String {
    if host.parse::<IpAddr>().is_ok() {
        return host.to_string();
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ca() -> Arc<CaStore> {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let key_der = key.to_pkcs8_der().unwrap().as_bytes().to_vec();
        let keypair = rcgen::KeyPair::from_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(key_der.clone()),
            &rcgen::PKCS_RSA_SHA256,
        )
        .unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&keypair).unwrap();
        Arc::new(CaStore::from_der(cert.der().to_vec(), key_der).unwrap())
    }

    #[test]
    fn etld_plus_one_collapses_subdomains() {
        assert_eq!(etld_plus_one("a.example.com"), "example.com");
        assert_eq!(etld_plus_one("b.a.example.com"), "example.com");
        assert_eq!(etld_plus_one("example.com"), "example.com");
        assert_eq!(etld_plus_one("localhost"), "localhost");
    }

    #[test]
    fn etld_plus_one_leaves_ip_literals_alone() {
        assert_eq!(etld_plus_one("127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn mint_caches_by_etld_plus_one() {
        let minter = CertMinter::new(test_ca());
        let a = minter.mint("a.example.com").unwrap();
        let b = minter.mint("b.example.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn mint_distinguishes_unrelated_domains() {
        let minter = CertMinter::new(test_ca());
        let a = minter.mint("example.com").unwrap();
        let b = minter.mint("other.org").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn mint_produces_chain_ending_in_root() {
        let ca = test_ca();
        let minter = CertMinter::new(ca.clone());
        let minted = minter.mint("example.com").unwrap();
        assert_eq!(minted.chain.len(), 2);
        assert_eq!(&minted.chain[1], ca.root_cert_der());
    }
}
