use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{config::ConfigError, host_keys::HostKeyPolicy};

use super::{
    auth::AuthConfig,
    endpoint::Endpoint,
    forwarder::{Direction, Forwarder},
    listener::BoundTunnel,
};

/// One local port forward: `local` is bound here, `server` is the SSH host,
/// `remote` is what the server dials for every forwarded connection.
#[derive(Debug, Clone)]
pub struct Tunnel {
    local: Endpoint,
    server: Endpoint,
    remote: Endpoint,
    auth: Option<AuthConfig>,
    host_keys: HostKeyPolicy,
    connect_timeout: Option<Duration>,
}

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("no authentication configured")]
    MissingCredentials,
    #[error("private key error for {path:?}: {source}")]
    KeyLoad {
        path: PathBuf,
        source: russh::keys::Error,
    },
    #[error("cannot bind {address}: {source}")]
    Bind { address: String, source: io::Error },
    #[error("accept error: {0}")]
    Accept(io::Error),
    #[error("server dial error ({address}): {reason}")]
    SshDial { address: String, reason: String },
    #[error("{address} rejected authentication for {username}")]
    AuthenticationRejected { username: String, address: String },
    #[error("remote dial error ({target}): {source}")]
    ChannelOpen {
        target: String,
        source: russh::Error,
    },
    #[error("copy error ({direction}): {source}")]
    Relay {
        direction: Direction,
        source: io::Error,
    },
    #[error("{address} host key has changed!")]
    HostKeyChanged { address: String },
    #[error("host key store error: {0}")]
    HostKeyStore(String),
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Tunnel {
    pub fn new(
        local_host: impl Into<String>,
        server_host: impl Into<String>,
        remote_host: impl Into<String>,
        local_port: u16,
        server_port: u16,
        remote_port: u16,
    ) -> Tunnel {
        Tunnel {
            local: Endpoint::new(local_host, local_port),
            server: Endpoint::new(server_host, server_port),
            remote: Endpoint::new(remote_host, remote_port),
            auth: None,
            host_keys: HostKeyPolicy::default(),
            connect_timeout: None,
        }
    }

    /// Authenticate with the private key at `key_path`, replacing any
    /// previously selected method. The key is only read by [`Tunnel::bind`].
    pub fn with_key_auth(mut self, username: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        self.auth = Some(AuthConfig::Key {
            username: username.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Authenticate with a password, replacing any previously selected method.
    pub fn with_password_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::Password {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    /// Upper bound for dialing, handshaking and authenticating against the
    /// server, per forwarded connection.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn server(&self) -> &Endpoint {
        &self.server
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    pub fn auth(&self) -> Option<&AuthConfig> {
        self.auth.as_ref()
    }

    pub fn host_key_policy(&self) -> &HostKeyPolicy {
        &self.host_keys
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Resolves the credentials, then binds the local endpoint.
    ///
    /// Nothing touches the network before the credentials are resolved.
    pub async fn bind(self) -> Result<BoundTunnel, TunnelError> {
        let credentials = self
            .auth
            .as_ref()
            .ok_or(TunnelError::MissingCredentials)?
            .resolve()?;
        if self.host_keys == HostKeyPolicy::AcceptAny {
            warn!("server host keys for {} are not verified", self.server);
        }

        let address = self.local.to_string();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TunnelError::Bind {
                address: address.clone(),
                source,
            })?;
        info!(
            "{} -> {} -> {} as {}",
            address,
            self.server,
            self.remote,
            credentials.username()
        );

        let forwarder = Forwarder::new(
            self.server,
            self.remote,
            credentials,
            &self.host_keys,
            self.connect_timeout,
        );
        Ok(BoundTunnel::new(listener, forwarder))
    }

    /// Sets the tunnel up and serves it. Only returns on a fatal error.
    pub async fn setup(self) -> Result<(), TunnelError> {
        self.bind().await?.run().await
    }
}
