use std::{fmt, path::PathBuf, sync::Arc};

use russh::{
    client::Handle,
    keys::{PrivateKey, PrivateKeyWithHashAlg, load_secret_key},
};

use super::{endpoint::Endpoint, handler::ClientHandler, tunnel::TunnelError};

/// How the tunnel authenticates against the SSH server.
///
/// Exactly one method is active; selecting a method on a [`Tunnel`](super::tunnel::Tunnel)
/// replaces whatever was selected before.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// the private key is read and parsed once, when the tunnel is set up
    Key { username: String, key_path: PathBuf },
    Password { username: String, password: String },
}

impl AuthConfig {
    pub fn username(&self) -> &str {
        match self {
            AuthConfig::Key { username, .. } | AuthConfig::Password { username, .. } => username,
        }
    }

    /// Turns the configuration into ready-to-use credentials.
    ///
    /// This is the only place the key file is touched. It runs before the
    /// listener binds, so a bad key never lets the tunnel accept traffic.
    pub fn resolve(&self) -> Result<Credentials, TunnelError> {
        if self.username().is_empty() {
            return Err(TunnelError::MissingCredentials);
        }
        let method = match self {
            AuthConfig::Key { key_path, .. } => {
                let key = load_secret_key(key_path, None).map_err(|e| TunnelError::KeyLoad {
                    path: key_path.clone(),
                    source: e,
                })?;
                AuthMethod::PublicKey(Arc::new(key))
            }
            AuthConfig::Password { password, .. } => AuthMethod::Password(password.clone()),
        };
        Ok(Credentials {
            username: self.username().to_string(),
            method,
        })
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::Key { username, key_path } => f
                .debug_struct("Key")
                .field("username", username)
                .field("key_path", key_path)
                .finish(),
            AuthConfig::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Clone)]
enum AuthMethod {
    PublicKey(Arc<PrivateKey>),
    Password(String),
}

/// Resolved credentials, shared by every forwarded connection of a tunnel.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    method: AuthMethod,
}

impl Credentials {
    pub fn username(&self) -> &str {
        &self.username
    }

    #[cfg(test)]
    fn is_public_key(&self) -> bool {
        matches!(self.method, AuthMethod::PublicKey(_))
    }

    pub(super) async fn authenticate(
        &self,
        session: &mut Handle<ClientHandler>,
        server: &Endpoint,
    ) -> Result<(), TunnelError> {
        let dial_error = |e: russh::Error| TunnelError::SshDial {
            address: server.to_string(),
            reason: e.to_string(),
        };
        let result = match &self.method {
            AuthMethod::PublicKey(key) => {
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(dial_error)?
                    .flatten();
                session
                    .authenticate_publickey(
                        self.username.clone(),
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await
                    .map_err(dial_error)?
            }
            AuthMethod::Password(password) => session
                .authenticate_password(self.username.clone(), password.clone())
                .await
                .map_err(dial_error)?,
        };
        if !result.success() {
            return Err(TunnelError::AuthenticationRejected {
                username: self.username.clone(),
                address: server.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self.method {
            AuthMethod::PublicKey(_) => "publickey",
            AuthMethod::Password(_) => "password",
        };
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("method", &method)
            .finish()
    }
}
