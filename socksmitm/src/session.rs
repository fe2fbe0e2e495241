//! Per-connection state machine: GREET -> AUTH_REPLY -> REQUEST ->
//! CONNECT_ACK -> SNIFF -> INTERCEPT -> CLOSED, tying the SOCKS5 codec, the
//! byte sniffer, the pipe splicer, the TLS terminator, the HTTP pump, and
//! the UDP passthrough together for one client connection.

use crate::cert_minter::CertMinter;
use crate::error::{Error, Result};
use crate::http::{self, Dialer};
use crate::mux::Mux;
use crate::pipe;
use crate::sniff;
use crate::socks5::{self, Command, Target};
use crate::tls;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

/// Everything a session needs that outlives the connection itself.
pub struct SessionContext {
    pub minter: Arc<CertMinter>,
    pub mux: Arc<Mux>,
    pub dialer: Arc<dyn Dialer>,
}

/// Drive one accepted TCP connection through the full state machine.
pub async fn handle(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<SessionContext>,
    cancel: tokio::sync::watch::Receiver<bool>,
) {
    // GREET / AUTH_REPLY
    if let Err(e) = socks5::negotiate_auth(&mut stream).await {
        debug!("session {peer_addr} failed auth negotiation: {e}");
        return;
    }

    // REQUEST
    let request = match socks5::read_request(&mut stream).await {
        Ok(r) => r,
        Err(e) => {
            debug!("session {peer_addr} sent an unparsable request: {e}");
            return;
        }
    };

    let result = match request.command {
        Command::Connect => handle_connect(stream, request.target, peer_addr, ctx).await,
        Command::UdpAssociate => {
            handle_udp_associate(stream, request.target, ctx, cancel).await
        }
    };

    if let Err(e) = result {
        debug!("session {peer_addr} ended: {e}");
    }
}

async fn handle_connect(
    mut stream: TcpStream,
    target: Target,
    peer_addr: SocketAddr,
    ctx: Arc<SessionContext>,
) -> Result<()> {
    // CONNECT_ACK: the reply echoes the requested destination, never an
    // actually-bound address — the proxy doesn't dial the real origin at
    // the SOCKS layer at all; interception happens entirely inside the
    // HTTP pump's handlers, which decide where (and whether) to dial out.
    socks5::write_success(&mut stream, &target).await?;

    // SNIFF
    let sniffed = sniff::sniff(&mut stream).await?;

    // INTERCEPT
    let app_side = pipe::splice(stream, sniffed.prefix);
    let socks_target = (target.host(), target.port());

    if sniffed.is_tls {
        let sni = sniffed
            .sni
            .ok_or_else(|| Error::protocol("TLS ClientHello carried no SNI"))?;
        let tls_stream = tls::terminate(app_side, &ctx.minter, &sni).await?;
        http::pump(tls_stream, ctx.mux.clone(), true, peer_addr, socks_target).await?;
    } else {
        http::pump(app_side, ctx.mux.clone(), false, peer_addr, socks_target).await?;
    }

    Ok(())
}

async fn handle_udp_associate(
    mut stream: TcpStream,
    target: Target,
    ctx: Arc<SessionContext>,
    cancel: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let client_socket = UdpSocket::bind("0.0.0.0:0").await?;
    socks5::write_success(&mut stream, &target).await?;

    let host = target.host();
    let port = target.port();

    // Hold the TCP control connection open; per RFC 1928 the association
    // lives as long as it does, and the client is expected to close it to
    // tear down the UDP relay.
    let mut buf = [0u8; 1];
    tokio::select! {
        result = crate::udp::relay(client_socket, ctx.dialer.clone(), host, port, cancel) => {
            result?;
        }
        _ = stream.readable() => {
            let _ = stream.try_read(&mut buf);
        }
    }

    Ok(())
}
