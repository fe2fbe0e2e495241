//! Listener: the top-level accept loop, analogous to the teacher's
//! `proxy::tls_mitm::run`/`run_inner` shape, but driving the SOCKS5 session
//! state machine instead of a fixed TLS-then-copy pipeline.

use crate::ca::CaStore;
use crate::cert_minter::CertMinter;
use crate::error::{Error, Result};
use crate::http::handlers::root_ca_handler;
use crate::http::{Dialer, DirectDialer};
use crate::mux::Mux;
use crate::session::{self, SessionContext};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Builds and runs the SOCKS5 MITM proxy. One instance owns the listening
/// socket and the shared collaborators (cert minter, handler registry,
/// dialer) handed to every session.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl Server {
    /// Bind `addr` and assemble the shared session context.
    ///
    /// `configure_mux` receives a [`Mux`] pre-seeded with `root.ca` already
    /// registered and `NormalRoundTrip` as the default, so callers only need
    /// to add their own host-specific handlers.
    pub async fn bind(
        addr: &str,
        ca: Arc<CaStore>,
        dialer: Arc<dyn Dialer>,
        configure_mux: impl FnOnce(&mut Mux),
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::config(format!("failed to bind {addr}: {e}")))?;

        let minter = Arc::new(CertMinter::new(ca.clone()));

        let default_handler = crate::http::handlers::normal_round_trip(dialer.clone());
        let mut mux = Mux::new(default_handler);
        mux.register("root.ca", root_ca_handler(ca));
        configure_mux(&mut mux);

        let ctx = Arc::new(SessionContext {
            minter,
            mux: Arc::new(mux),
            dialer,
        });

        Ok(Self { listener, ctx })
    }

    /// Convenience constructor using the default direct dialer and no extra
    /// handler registrations, matching `examples/original_source/cmd/example/main.go`'s
    /// minimal wiring.
    pub async fn bind_default(addr: &str, ca: Arc<CaStore>) -> Result<Self> {
        Self::bind(addr, ca, Arc::new(DirectDialer), |_| {}).await
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires, spawning one session task
    /// per connection.
    pub async fn run(self, mut cancel: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        info!("socksmitm listening on {}", self.listener.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer_addr) = result?;
                    let ctx = self.ctx.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        session::handle(stream, peer_addr, ctx, cancel).await;
                    });
                }
                _ = cancel.changed() => {
                    info!("socksmitm received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }
}
