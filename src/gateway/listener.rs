//! TLS accept loop and per-connection pass-through.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, copy_bidirectional};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::filter::{ConnectionFilter, Decision};

/// Client bytes buffered while a decision is pending.
pub const MAX_EARLY_DATA: usize = 64 * 1024;

/// Everything a connection task needs, shared by all of them.
pub(crate) struct ConnectionHandler {
    pub(crate) acceptor: TlsAcceptor,
    pub(crate) filter: Arc<ConnectionFilter>,
    pub(crate) upstream: SocketAddr,
    pub(crate) handshake_timeout: Duration,
    pub(crate) connect_timeout: Duration,
}

/// Accept connections until `shutdown` fires, one task per connection.
pub(crate) async fn serve_connections(
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handler = Arc::clone(&handler);
                    let span = info_span!("connection", id = %connection_id(), %peer);
                    tokio::spawn(async move { handler.handle(stream).await }.instrument(span));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    // Back off briefly on e.g. EMFILE instead of spinning
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.recv() => {
                info!("Listener stopped accepting connections");
                break;
            }
        }
    }
}

fn connection_id() -> String {
    format!("conn-{}", Uuid::new_v4())
}

impl ConnectionHandler {
    async fn handle(&self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let mut tls = match tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => {
                debug!(error = %e, "TLS handshake failed");
                return;
            }
            Err(_) => {
                debug!(timeout = ?self.handshake_timeout, "TLS handshake timed out");
                return;
            }
        };

        let peer = tls
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|chain| chain.first())
            .cloned();

        let mut early = BytesMut::with_capacity(4096);
        let Some(decision) = self.decide(&mut tls, peer.as_ref(), &mut early).await else {
            // Client closed first; the pending decision was dropped uncounted
            return;
        };

        match decision {
            Decision::Permitted { .. } => self.pass_through(tls, early).await,
            Decision::Denied(_) => drop(tls),
        }
    }

    /// Run the filter while buffering whatever the client sends meanwhile.
    ///
    /// Returns `None` if the client closes or errors before a decision.
    async fn decide(
        &self,
        tls: &mut TlsStream<TcpStream>,
        peer: Option<&rustls::pki_types::CertificateDer<'static>>,
        early: &mut BytesMut,
    ) -> Option<Decision> {
        let evaluation = self.filter.evaluate(peer);
        tokio::pin!(evaluation);

        loop {
            tokio::select! {
                decision = &mut evaluation => return Some(decision),
                read = tls.read_buf(early), if early.len() < MAX_EARLY_DATA => match read {
                    Ok(0) => {
                        debug!("Client closed before a decision");
                        return None;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Client read failed before a decision");
                        return None;
                    }
                },
            }
        }
    }

    /// Splice a permitted client to the upstream.
    ///
    /// The attempt is already counted as allowed; an upstream failure here
    /// closes the client without touching the counters.
    async fn pass_through(&self, mut tls: TlsStream<TcpStream>, early: BytesMut) {
        let connect = TcpStream::connect(self.upstream);
        let mut upstream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) => {
                warn!(upstream = %self.upstream, error = %e, "Upstream connect failed");
                return;
            }
            Err(_) => {
                warn!(upstream = %self.upstream, timeout = ?self.connect_timeout, "Upstream connect timed out");
                return;
            }
        };
        if let Err(e) = upstream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on upstream");
        }

        if !early.is_empty() {
            if let Err(e) = upstream.write_all(&early).await {
                debug!(error = %e, "Failed to forward buffered client data");
                return;
            }
        }

        match copy_bidirectional(&mut tls, &mut upstream).await {
            Ok((to_upstream, to_client)) => {
                debug!(
                    bytes_to_upstream = to_upstream + early.len() as u64,
                    bytes_to_client = to_client,
                    "Connection closed"
                );
            }
            Err(e) => debug!(error = %e, "Connection closed with error"),
        }
    }
}
