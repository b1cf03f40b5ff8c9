use std::{io, net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::{forwarder::Forwarder, tunnel::TunnelError};

/// A tunnel whose credentials are resolved and whose local endpoint is bound.
pub struct BoundTunnel {
    listener: TcpListener,
    forwarder: Arc<Forwarder>,
}

impl BoundTunnel {
    pub(super) fn new(listener: TcpListener, forwarder: Forwarder) -> Self {
        BoundTunnel {
            listener,
            forwarder: Arc::new(forwarder),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until accepting fails.
    ///
    /// Every connection is forwarded on its own task, a stuck one never holds
    /// up the next accept. Any accept error is fatal and ends the tunnel; that
    /// path has no test, a loopback listener cannot be made to fail on demand.
    pub async fn run(self) -> Result<(), TunnelError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!("accepting connections on {}", addr);
        }
        loop {
            let (stream, peer) = self.listener.accept().await.map_err(|e| {
                error!("accept failed, stopping tunnel: {}", e);
                TunnelError::Accept(e)
            })?;
            debug!("incoming connection: {peer}");

            let forwarder = Arc::clone(&self.forwarder);
            tokio::spawn(async move {
                if let Err(e) = forwarder.forward(stream, peer).await {
                    warn!("{peer}: {e}");
                }
            });
        }
    }
}
