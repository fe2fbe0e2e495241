//! UDP Passthrough: once a `UDP ASSOCIATE` session is set up, datagrams are
//! forwarded to/from the target with no inspection or interception — TLS
//! MITM only applies to `CONNECT` sessions.

use crate::error::{Error, Result};
use crate::http::Dialer;
use std::sync::Arc;
use tokio::net::UdpSocket;

const DATAGRAM_BUF: usize = 64 * 1024;

/// Relay UDP datagrams between `client_socket` (bound for this association)
/// and the dialed upstream, until either side goes quiet for good (socket
/// closed) or the session's cancellation signal fires.
pub async fn relay(
    client_socket: UdpSocket,
    dialer: Arc<dyn Dialer>,
    host: String,
    port: u16,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let upstream = dialer
        .dial_udp(&host, port)
        .await
        .map_err(|e| Error::upstream(format!("failed to dial UDP {host}:{port}: {e}")))?;

    let client = Arc::new(client_socket);
    let upstream = Arc::new(upstream);

    let to_upstream = {
        let client = client.clone();
        let upstream = upstream.clone();
        async move { copy_datagrams(&client, &upstream).await }
    };
    let to_client = {
        let client = client.clone();
        let upstream = upstream.clone();
        async move { copy_datagrams(&upstream, &client).await }
    };

    tokio::select! {
        _ = to_upstream => {}
        _ = to_client => {}
        _ = cancel.changed() => {}
    }

    Ok(())
}

async fn copy_datagrams(from: &UdpSocket, to: &UdpSocket) -> std::io::Result<()> {
    let mut buf = vec![0u8; DATAGRAM_BUF];
    loop {
        let n = from.recv(&mut buf).await?;
        if n == 0 {
            continue;
        }
        to.send(&buf[..n]).await?;
    }
}
