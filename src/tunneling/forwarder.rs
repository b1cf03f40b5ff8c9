use std::{fmt, io, net::SocketAddr, sync::Arc, time::Duration};

use russh::{
    Disconnect,
    client::{self, Handle},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::host_keys::{self, HostKeyPolicy, HostKeyStore};

use super::{auth::Credentials, endpoint::Endpoint, handler::ClientHandler, tunnel::TunnelError};

/// Which way bytes are flowing through a forwarded connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// inbound client -> remote endpoint
    Upstream,
    /// remote endpoint -> inbound client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("local -> remote"),
            Direction::Downstream => f.write_str("remote -> local"),
        }
    }
}

/// How one relay direction ended.
#[derive(Debug)]
pub enum DirectionOutcome {
    /// source hit EOF, the destination got a write shutdown
    Finished(u64),
    Failed(io::Error),
    /// torn down because the opposite direction failed
    Aborted,
}

#[derive(Debug)]
pub struct RelayReport {
    pub upstream: DirectionOutcome,
    pub downstream: DirectionOutcome,
}

/// Everything a forwarded connection needs, shared read-only between the
/// connection tasks of one tunnel.
pub(crate) struct Forwarder {
    server: Endpoint,
    remote: Endpoint,
    credentials: Credentials,
    ssh_config: Arc<client::Config>,
    host_keys: Arc<dyn HostKeyStore>,
    trust_on_first_use: bool,
    connect_timeout: Option<Duration>,
}

impl Forwarder {
    pub fn new(
        server: Endpoint,
        remote: Endpoint,
        credentials: Credentials,
        host_key_policy: &HostKeyPolicy,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Forwarder {
            server,
            remote,
            credentials,
            ssh_config: Arc::new(client::Config::default()),
            host_keys: host_keys::get_store(host_key_policy),
            trust_on_first_use: host_key_policy.trust_on_first_use(),
            connect_timeout,
        }
    }

    /// Bridges one accepted connection to the remote endpoint through a
    /// fresh SSH session. Every failure here only concerns this connection.
    pub async fn forward(&self, inbound: TcpStream, peer: SocketAddr) -> Result<(), TunnelError> {
        let session = self.dial().await?;

        let channel = match session
            .channel_open_direct_tcpip(
                self.remote.host.clone(),
                u32::from(self.remote.port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                disconnect(&session).await;
                return Err(TunnelError::ChannelOpen {
                    target: self.remote.to_string(),
                    source: e,
                });
            }
        };
        debug!("{peer}: channel to {} open", self.remote);

        inbound.set_nodelay(true).ok();
        let report = relay(inbound, channel.into_stream()).await;
        log_direction(peer, Direction::Upstream, report.upstream);
        log_direction(peer, Direction::Downstream, report.downstream);

        disconnect(&session).await;
        Ok(())
    }

    async fn dial(&self) -> Result<Handle<ClientHandler>, TunnelError> {
        let address = self.server.to_string();
        let handler = ClientHandler::new(
            self.server.clone(),
            Arc::clone(&self.host_keys),
            self.trust_on_first_use,
        );
        let connect = async {
            let mut session = client::connect(Arc::clone(&self.ssh_config), address.as_str(), handler)
                .await
                .map_err(|e| match e {
                    TunnelError::Ssh(e) => TunnelError::SshDial {
                        address: address.clone(),
                        reason: e.to_string(),
                    },
                    other => other,
                })?;
            self.credentials.authenticate(&mut session, &self.server).await?;
            Ok::<_, TunnelError>(session)
        };

        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                TunnelError::SshDial {
                    address: address.clone(),
                    reason: format!("timed out after {limit:?}"),
                }
            })?,
            None => connect.await,
        }
    }
}

async fn disconnect(session: &Handle<ClientHandler>) {
    if let Err(e) = session.disconnect(Disconnect::ByApplication, "", "en").await {
        debug!("ssh disconnect: {e}");
    }
}

fn log_direction(peer: SocketAddr, direction: Direction, outcome: DirectionOutcome) {
    match outcome {
        DirectionOutcome::Finished(bytes) => debug!("{peer}: {direction} closed after {bytes} bytes"),
        DirectionOutcome::Aborted => debug!("{peer}: {direction} aborted"),
        DirectionOutcome::Failed(source) => {
            warn!("{peer}: {}", TunnelError::Relay { direction, source });
        }
    }
}

/// Copies bytes both ways between `local` and `remote`, each direction in its
/// own task.
///
/// A direction reaching EOF shuts down the write side it was feeding and the
/// other direction keeps going (half-close). A direction failing aborts the
/// other one, so both ends get closed.
pub(crate) async fn relay<L, R>(local: L, remote: R) -> RelayReport
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut local_rx, mut local_tx) = tokio::io::split(local);
    let (mut remote_rx, mut remote_tx) = tokio::io::split(remote);

    let mut upstream = tokio::spawn(async move { pump(&mut local_rx, &mut remote_tx).await });
    let mut downstream = tokio::spawn(async move { pump(&mut remote_rx, &mut local_tx).await });

    tokio::select! {
        first = &mut upstream => {
            let upstream = outcome(first);
            let downstream = settle(&upstream, downstream).await;
            RelayReport { upstream, downstream }
        }
        first = &mut downstream => {
            let downstream = outcome(first);
            let upstream = settle(&downstream, upstream).await;
            RelayReport { upstream, downstream }
        }
    }
}

async fn pump<Rd, Wr>(reader: &mut Rd, writer: &mut Wr) -> io::Result<u64>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(reader, writer).await?;
    // the peer may already be gone, EOF was still reached cleanly
    writer.shutdown().await.ok();
    Ok(copied)
}

async fn settle(first: &DirectionOutcome, other: JoinHandle<io::Result<u64>>) -> DirectionOutcome {
    if matches!(first, DirectionOutcome::Failed(_)) {
        other.abort();
    }
    outcome(other.await)
}

fn outcome(joined: Result<io::Result<u64>, tokio::task::JoinError>) -> DirectionOutcome {
    match joined {
        Ok(Ok(bytes)) => DirectionOutcome::Finished(bytes),
        Ok(Err(e)) => DirectionOutcome::Failed(e),
        Err(e) if e.is_cancelled() => DirectionOutcome::Aborted,
        Err(e) => DirectionOutcome::Failed(io::Error::other(e.to_string())),
    }
}
