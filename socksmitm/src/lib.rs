//! An intercepting SOCKS5 proxy: accepts `CONNECT`/`UDP ASSOCIATE` sessions,
//! TLS-terminates `CONNECT` sessions with certificates minted on the fly
//! from a loaded root CA, and routes the decrypted HTTP/1.x traffic through
//! user-pluggable handlers keyed by `Host`.

pub mod ca;
pub mod cert_minter;
pub mod error;
pub mod http;
pub mod mux;
pub mod pipe;
pub mod server;
pub mod session;
pub mod sniff;
pub mod socks5;
pub mod tls;
pub mod udp;

pub use ca::CaStore;
pub use cert_minter::{etld_plus_one, CertMinter};
pub use error::{Error, Result};
pub use http::{Dialer, DirectDialer, Handler};
pub use mux::Mux;
pub use server::Server;

/// Install `ring` as the process-wide default rustls `CryptoProvider`.
///
/// Must run once before any TLS handshake (server or client) is attempted.
/// Safe to call more than once; only the first call has an effect.
pub fn install_default_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
