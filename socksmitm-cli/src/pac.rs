//! PAC-file HTTP server: a small out-of-core collaborator that hands
//! browsers a `FindProxyForURL` script pointing them at the SOCKS proxy.

use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{info, warn};

const PAC_TEMPLATE: &str = r#"
function FindProxyForURL(url, host)
{
    var direct = 'DIRECT';
    var tunnel = 'SOCKS {socks_host}:{socks_port}';
    if (isPlainHostName(host) ||
        host.indexOf('127.') == 0 ||
        host.indexOf('192.168.') == 0 ||
        host.indexOf('10.') == 0 ||
        shExpMatch(host, 'localhost.*'))
    {
        return direct;
    }

    return tunnel;
}
"#;

/// Serve the PAC file on `bind_addr`, advertising `socks_addr` as the
/// `SOCKS` proxy clients should tunnel through.
pub async fn run(bind_addr: SocketAddr, socks_addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind PAC server on {bind_addr}"))?;

    info!("pac server listening on {bind_addr}");
    info!("pac url: http://{bind_addr}/");

    let body = PAC_TEMPLATE
        .replace("{socks_host}", &socks_addr.ip().to_string())
        .replace("{socks_port}", &socks_addr.port().to_string());

    loop {
        let (stream, peer) = listener.accept().await?;
        let body = body.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let body = body.clone();
                async move {
                    Ok::<_, std::convert::Infallible>(
                        Response::builder()
                            .status(200)
                            .header("content-type", "application/x-ns-proxy-autoconfig")
                            .body(Full::new(Bytes::from(body)))
                            .expect("static PAC response is always well-formed"),
                    )
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("pac connection from {peer} failed: {e}");
            }
        });
    }
}

/// First non-loopback IPv4 address of the host — the fallback used when no
/// explicit PAC bind host is configured, matching the original program's
/// `externalIP()` auto-detection.
pub fn external_ip() -> Result<IpAddr> {
    local_ip_address::local_ip().context("no non-loopback IPv4 interface found")
}
