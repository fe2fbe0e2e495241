//! Built-in handlers: the three round-trip strategies named in the
//! component design, plus the synthetic `root.ca` download host.

use super::{BoxFuture, Dialer, Handler};
use crate::ca::CaStore;
use crate::error::Error;
use crate::tls::insecure_upstream_connector;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tracing::warn;

/// Forward the request to its real origin over a connection obtained from
/// `dialer`, upgrading to TLS when the request's scheme is `https`.
///
/// Uses the low-level `hyper::client::conn::http1` handshake rather than
/// `hyper_util`'s pooled client so that `dialer` — not hyper's own connector
/// — is what actually determines the upstream TCP (or TLS-over-TCP)
/// connection; that's the one seam the component design calls out as
/// load-bearing for this handler.
pub fn normal_round_trip(dialer: Arc<dyn Dialer>) -> Arc<Handler> {
    Arc::new(move |req: Request<Full<Bytes>>| {
        let dialer = dialer.clone();
        Box::pin(async move { normal_round_trip_inner(req, dialer.as_ref()).await })
            as BoxFuture<Result<Response<Full<Bytes>>, Error>>
    })
}

async fn normal_round_trip_inner(
    req: Request<Full<Bytes>>,
    dialer: &dyn Dialer,
) -> Result<Response<Full<Bytes>>, Error> {
    let uri = req.uri().clone();
    let host = uri
        .host()
        .ok_or_else(|| Error::protocol("request has no host to dial"))?
        .to_string();
    let is_tls = uri.scheme_str() == Some("https");
    let port = uri.port_u16().unwrap_or(if is_tls { 443 } else { 80 });

    let tcp = dialer
        .dial_tcp(&host, port)
        .await
        .map_err(|e| Error::upstream(format!("failed to dial {host}:{port}: {e}")))?;

    let response = if is_tls {
        let connector = insecure_upstream_connector();
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| Error::upstream(format!("invalid server name {host}: {e}")))?;
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::upstream(format!("upstream TLS handshake failed: {e}")))?;
        send_over(TokioIo::new(tls_stream), req).await?
    } else {
        send_over(TokioIo::new(tcp), req).await?
    };

    Ok(response)
}

async fn send_over<IO>(
    io: IO,
    req: Request<Full<Bytes>>,
) -> Result<Response<Full<Bytes>>, Error>
where
    IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| Error::upstream(format!("upstream handshake failed: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!("upstream connection task ended: {e}");
        }
    });

    let upstream_resp = sender
        .send_request(req)
        .await
        .map_err(|e| Error::upstream(format!("upstream request failed: {e}")))?;

    let (parts, body) = upstream_resp.into_parts();
    let bytes = http_body_util::BodyExt::collect(body)
        .await
        .map_err(|e| Error::upstream(format!("failed to read upstream body: {e}")))?
        .to_bytes();

    Ok(Response::from_parts(parts, Full::new(bytes)))
}

/// Refuse the request outright. Writes nothing upstream and nothing to the
/// client — the pump ends the connection on `Error::Blocked` without
/// emitting any response.
pub fn block_round_trip() -> Arc<Handler> {
    Arc::new(|_req: Request<Full<Bytes>>| {
        Box::pin(async move { Err(Error::Blocked) })
            as BoxFuture<Result<Response<Full<Bytes>>, Error>>
    })
}

/// Forward like [`normal_round_trip`], but when the request's path matches
/// `path`, hand both the buffered request and response to `observer`
/// afterward — fire-and-forget, never blocking the client on whatever the
/// observer does with them. Requests for any other path delegate straight
/// to [`normal_round_trip`] with no observation.
pub fn copy_round_trip<F>(
    dialer: Arc<dyn Dialer>,
    path: impl Into<String>,
    observer: F,
) -> Arc<Handler>
where
    F: Fn(Request<Full<Bytes>>, Response<Full<Bytes>>) + Send + Sync + 'static,
{
    let path = path.into();
    let observer = Arc::new(observer);
    Arc::new(move |req: Request<Full<Bytes>>| {
        let dialer = dialer.clone();
        let observer = observer.clone();
        let path = path.clone();
        Box::pin(async move {
            if req.uri().path() != path {
                return normal_round_trip_inner(req, dialer.as_ref()).await;
            }
            let req_copy = clone_request(&req);
            let resp = normal_round_trip_inner(req, dialer.as_ref()).await?;
            let resp_copy = clone_response(&resp);
            observer(req_copy, resp_copy);
            Ok(resp)
        }) as BoxFuture<Result<Response<Full<Bytes>>, Error>>
    })
}

fn clone_request(req: &Request<Full<Bytes>>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().method(req.method()).uri(req.uri());
    for (name, value) in req.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(req.body().clone())
        .expect("cloned request has the same well-formed parts as the original")
}

fn clone_response(resp: &Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(resp.status());
    for (name, value) in resp.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(resp.body().clone())
        .expect("cloned response has the same well-formed parts as the original")
}

/// The synthetic `root.ca` host: serves the root certificate's PEM encoding
/// regardless of path or method, so a device can be pointed at
/// `http://root.ca/` to install the trust anchor.
pub fn root_ca_handler(ca: Arc<CaStore>) -> Arc<Handler> {
    Arc::new(move |_req: Request<Full<Bytes>>| {
        let pem = ca.root_cert_pem().to_string();
        Box::pin(async move {
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/octet-stream")
                .header("content-disposition", "attachment; filename=\"rootca.pem\"")
                .header("connection", "close")
                .body(Full::new(Bytes::from(pem)))
                .expect("static root.ca response is always well-formed"))
        }) as BoxFuture<Result<Response<Full<Bytes>>, Error>>
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_round_trip_always_errs() {
        let handler = block_round_trip();
        let req = Request::builder()
            .uri("https://blocked.example/")
            .body(Full::default())
            .unwrap();
        let result = handler(req).await;
        assert!(matches!(result, Err(Error::Blocked)));
    }

    #[tokio::test]
    async fn root_ca_handler_serves_pem() {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let key_der = rsa::pkcs8::EncodePrivateKey::to_pkcs8_der(&key)
            .unwrap()
            .as_bytes()
            .to_vec();
        let keypair = rcgen::KeyPair::from_der_and_sign_algo(
            &rustls_pki_types::PrivatePkcs8KeyDer::from(key_der.clone()),
            &rcgen::PKCS_RSA_SHA256,
        )
        .unwrap();
        let mut params = rcgen::CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&keypair).unwrap();
        let ca = Arc::new(CaStore::from_der(cert.der().to_vec(), key_der).unwrap());

        let handler = root_ca_handler(ca);
        let req = Request::builder()
            .uri("http://root.ca/")
            .body(Full::default())
            .unwrap();
        let resp = handler(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert!(String::from_utf8(body.to_vec())
            .unwrap()
            .contains("BEGIN CERTIFICATE"));
    }
}
