//! End-to-end exercise of the full session state machine over a real loopback
//! socket: SOCKS5 handshake -> CONNECT -> plaintext HTTP pump -> NormalRoundTrip
//! dialing a fake origin server.

use rcgen::{BasicConstraints, CertificateParams, IsCa};
use rsa::pkcs8::EncodePrivateKey;
use rustls_pki_types::PrivatePkcs8KeyDer;
use socksmitm::http::{BoxFuture, Dialer};
use socksmitm::{CaStore, Server};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

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

/// Ignores the requested host and always connects to a fixed fake-origin
/// address, so the test doesn't depend on real DNS resolution.
struct FixedDialer(std::net::SocketAddr);

impl Dialer for FixedDialer {
    fn dial_tcp(
        &self,
        _host: &str,
        _port: u16,
    ) -> BoxFuture<std::io::Result<TcpStream>> {
        let addr = self.0;
        Box::pin(async move { TcpStream::connect(addr).await })
    }

    fn dial_udp(
        &self,
        _host: &str,
        _port: u16,
    ) -> BoxFuture<std::io::Result<tokio::net::UdpSocket>> {
        Box::pin(async move { tokio::net::UdpSocket::bind("0.0.0.0:0").await })
    }
}

async fn spawn_fake_origin() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let body = b"ok";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.write_all(body).await;
            let _ = stream.shutdown().await;
        }
    });
    addr
}

#[tokio::test]
async fn connect_session_proxies_plaintext_http_via_normal_round_trip() {
    let origin_addr = spawn_fake_origin().await;

    let ca = test_ca();
    let dialer: Arc<dyn Dialer> = Arc::new(FixedDialer(origin_addr));
    let server = Server::bind("127.0.0.1:0", ca, dialer, |_mux| {})
        .await
        .unwrap();
    let proxy_addr = server.local_addr().unwrap();

    let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(server.run(cancel_rx));

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    // Greeting: version 5, 1 method, no-auth.
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut auth_reply = [0u8; 2];
    client.read_exact(&mut auth_reply).await.unwrap();
    assert_eq!(auth_reply, [0x05, 0x00]);

    // CONNECT to example.com:80 (domain ATYP) — the dialer ignores the host.
    let mut request = vec![0x05, 0x01, 0x00, 0x03, 11];
    request.extend_from_slice(b"example.com");
    request.extend_from_slice(&80u16.to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply_header = [0u8; 4];
    client.read_exact(&mut reply_header).await.unwrap();
    assert_eq!(reply_header[..2], [0x05, 0x00]);
    match reply_header[3] {
        0x01 => {
            let mut rest = [0u8; 4 + 2];
            client.read_exact(&mut rest).await.unwrap();
        }
        0x03 => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await.unwrap();
            let mut rest = vec![0u8; len[0] as usize + 2];
            client.read_exact(&mut rest).await.unwrap();
        }
        other => panic!("unexpected ATYP {other}"),
    }

    // Plaintext HTTP request inside the "TLS" tunnel (never actually TLS
    // here since the first byte isn't 0x16 — the sniffer treats it as a
    // plain pass-through session, same as the Go original's behavior for
    // non-TLS CONNECT targets).
    let http_request =
        b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n";
    client.write_all(http_request).await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.contains("200 OK"));
    assert!(response.contains("ok"));
}
