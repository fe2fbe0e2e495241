//! HTTP MITM Pump: serves the decrypted (or, for plaintext CONNECT targets,
//! never-encrypted) HTTP/1.x traffic inside an intercepted session, routing
//! each request by `Host` through the [`Mux`](crate::mux::Mux).

pub mod handlers;

use crate::error::Error;
use crate::mux::Mux;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The handler contract: given a normalized request (absolute-form URI,
/// `Host` already resolved), produce a response or fail.
///
/// Expressed as a boxed closure rather than a trait so built-in handlers
/// (`NormalRoundTrip`, `BlockRoundTrip`, `CopyRoundTrip`) and user-supplied
/// ones share one registration surface in [`Mux`] without needing
/// `async_trait`.
pub type Handler =
    dyn Fn(Request<Full<Bytes>>) -> BoxFuture<Result<Response<Full<Bytes>>, Error>> + Send + Sync;

/// Upstream dialing contract. The only thing a `NormalRoundTrip` or the UDP
/// passthrough actually depends on — swapping the `Dialer` is how a caller
/// redirects all intercepted traffic through a different egress path (a
/// corporate proxy, a test double, a rate limiter) without touching the
/// proxy's protocol logic.
pub trait Dialer: Send + Sync {
    fn dial_tcp(&self, host: &str, port: u16) -> BoxFuture<std::io::Result<TcpStream>>;

    fn dial_udp(&self, host: &str, port: u16) -> BoxFuture<std::io::Result<tokio::net::UdpSocket>>;
}

/// The default [`Dialer`]: plain direct TCP/UDP connections via the OS
/// resolver, exactly what `TcpStream::connect`/`UdpSocket::connect` give you.
pub struct DirectDialer;

impl Dialer for DirectDialer {
    fn dial_tcp(&self, host: &str, port: u16) -> BoxFuture<std::io::Result<TcpStream>> {
        let addr = format!("{host}:{port}");
        Box::pin(async move { TcpStream::connect(addr).await })
    }

    fn dial_udp(&self, host: &str, port: u16) -> BoxFuture<std::io::Result<tokio::net::UdpSocket>> {
        let addr = format!("{host}:{port}");
        Box::pin(async move {
            let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(addr).await?;
            Ok(socket)
        })
    }
}

/// Run the HTTP/1.x pump over `stream` until the peer closes the connection,
/// a protocol error ends it, or a handler returns `Err`. `is_tls` only
/// affects URL normalization (the scheme prepended ahead of forwarding to a
/// handler); the stream itself is already decrypted by the time it reaches
/// here. `socks_target` is the `(host, port)` negotiated at the SOCKS layer;
/// on the plaintext branch it is what `URL.Host` is built from, since a
/// plaintext CONNECT target never goes through a decrypted `Host` header the
/// way a TLS-terminated one does.
///
/// A handler `Err` propagates out of the service and ends the connection
/// without writing anything back to the client — the pump never synthesizes
/// an HTTP error response.
pub async fn pump<S>(
    stream: S,
    mux: Arc<Mux>,
    is_tls: bool,
    peer_addr: SocketAddr,
    socks_target: (String, u16),
) -> crate::error::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let scheme = if is_tls { "https" } else { "http" };

    let service = service_fn(move |req: Request<Incoming>| {
        let mux = mux.clone();
        let scheme = scheme.to_string();
        let socks_target = socks_target.clone();
        async move { serve_one_inner(req, &mux, &scheme, is_tls, &socks_target).await }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .serve_connection(io, service)
        .await
        .map_err(|e| {
            Error::protocol(format!("HTTP MITM pump failed for {peer_addr}: {e}"))
        })
}

async fn serve_one_inner(
    req: Request<Incoming>,
    mux: &Mux,
    scheme: &str,
    is_tls: bool,
    socks_target: &(String, u16),
) -> crate::error::Result<Response<Full<Bytes>>> {
    let normalized = normalize(req, scheme, is_tls, socks_target).await?;
    let host = host_of(&normalized)?;
    let handler = mux.handler_for(&host);
    handler(normalized).await
}

/// Normalize a request's URI to absolute-form (`scheme://host/path`) the way
/// the component design requires before handler dispatch, so handlers never
/// have to special-case origin-form requests produced by a client that
/// believes it's talking to the origin server directly (which, after TLS
/// interception, it does). Also buffers the body to `Full<Bytes>` so
/// handlers (which may need to inspect or replay it, per `CopyRoundTrip`)
/// never deal with a streaming body.
///
/// On the plaintext branch the authority always comes from `socks_target`,
/// never the client's `Host` header — a plaintext CONNECT session was never
/// decrypted, so the only host the proxy actually negotiated is the one the
/// SOCKS request named.
async fn normalize(
    req: Request<Incoming>,
    scheme: &str,
    is_tls: bool,
    socks_target: &(String, u16),
) -> crate::error::Result<Request<Full<Bytes>>> {
    let (mut parts, body) = req.into_parts();

    if parts.uri.authority().is_none() {
        let authority = if is_tls {
            parts
                .headers
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::protocol("request has no Host header"))?
                .to_string()
        } else {
            format!("{}:{}", socks_target.0, socks_target.1)
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let absolute = format!("{scheme}://{authority}{path_and_query}");
        parts.uri = absolute
            .parse()
            .map_err(|e| Error::protocol(format!("failed to normalize URI: {e}")))?;
    }

    let collected = body
        .collect()
        .await
        .map_err(|e| Error::protocol(format!("failed to read request body: {e}")))?
        .to_bytes();

    Ok(Request::from_parts(parts, Full::new(collected)))
}

fn host_of(req: &Request<Full<Bytes>>) -> crate::error::Result<String> {
    req.uri()
        .host()
        .map(str::to_string)
        .ok_or_else(|| Error::protocol("normalized request has no host"))
}
