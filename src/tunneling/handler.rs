use std::sync::Arc;

use russh::{client::Handler, keys::PublicKey};
use tracing::info;

use crate::host_keys::{HostKeyError, HostKeyStatus, HostKeyStore};

use super::{endpoint::Endpoint, tunnel::TunnelError};

/// russh client callbacks for one forwarded connection's SSH session.
pub(crate) struct ClientHandler {
    /// needed for the server validation callback
    server: Endpoint,
    store: Arc<dyn HostKeyStore>,
    trust_on_first_use: bool,
}

impl ClientHandler {
    pub fn new(server: Endpoint, store: Arc<dyn HostKeyStore>, trust_on_first_use: bool) -> Self {
        ClientHandler {
            server,
            store,
            trust_on_first_use,
        }
    }

    /// Runs a store operation on the blocking pool, known_hosts lookups read
    /// and append to a file.
    async fn with_store<T, F>(&self, key: &PublicKey, op: F) -> Result<T, TunnelError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HostKeyStore, &str, u16, &PublicKey) -> Result<T, HostKeyError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let server = self.server.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || op(store.as_ref(), &server.host, server.port, &key))
            .await
            .map_err(|e| TunnelError::HostKeyStore(e.to_string()))?
            .map_err(|e| TunnelError::HostKeyStore(e.to_string()))
    }
}

impl Handler for ClientHandler {
    type Error = TunnelError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "{} got server key: {}",
            self.server,
            server_public_key.fingerprint(Default::default())
        );
        let status = self
            .with_store(server_public_key, |store, host, port, key| {
                store.check(host, port, key)
            })
            .await?;

        match status {
            HostKeyStatus::Trusted => Ok(true),
            HostKeyStatus::Changed => {
                tracing::error!("{} host key has changed!", self.server);
                Err(TunnelError::HostKeyChanged {
                    address: self.server.to_string(),
                })
            }
            HostKeyStatus::Unknown if self.trust_on_first_use => {
                tracing::warn!(
                    "trust on first use: accepting unknown host key for {}",
                    self.server
                );
                self.with_store(server_public_key, |store, host, port, key| {
                    store.learn(host, port, key)
                })
                .await?;
                Ok(true)
            }
            HostKeyStatus::Unknown => {
                tracing::warn!("unknown host key for {}, refusing", self.server);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::host_keys::MockHostKeyStore;
    use mockall::predicate::*;

    fn create_public_key() -> PublicKey {
        PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti foo@bar.com",
        ).unwrap()
    }

    fn handler(store: MockHostKeyStore, trust_on_first_use: bool) -> ClientHandler {
        ClientHandler::new(
            Endpoint::new("0.0.0.0", 5050),
            Arc::new(store),
            trust_on_first_use,
        )
    }

    #[tokio::test]
    async fn trusted_key_test() {
        let mut mock_store = MockHostKeyStore::new();
        mock_store
            .expect_check()
            .with(eq("0.0.0.0"), eq(5050), always())
            .times(1)
            .returning(|_, _, _| Ok(HostKeyStatus::Trusted));
        mock_store.expect_learn().never();

        let result = handler(mock_store, false)
            .check_server_key(&create_public_key())
            .await;
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn nasty_key_test() {
        let mut mock_store = MockHostKeyStore::new();
        mock_store
            .expect_check()
            .times(1)
            .returning(|_, _, _| Ok(HostKeyStatus::Changed));
        mock_store.expect_learn().never();

        // even with tofu on, a changed key is never learned
        let result = handler(mock_store, true)
            .check_server_key(&create_public_key())
            .await;
        assert!(matches!(
            result,
            Err(TunnelError::HostKeyChanged { address }) if address == "0.0.0.0:5050"
        ));
    }

    #[tokio::test]
    async fn unknown_key_with_tofu_test() {
        let public_key = create_public_key();
        let expected = public_key.clone();
        let mut mock_store = MockHostKeyStore::new();
        mock_store
            .expect_check()
            .times(1)
            .returning(|_, _, _| Ok(HostKeyStatus::Unknown));
        mock_store
            .expect_learn()
            .withf(move |host, port, key| host == "0.0.0.0" && *port == 5050 && *key == expected)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let result = handler(mock_store, true)
            .check_server_key(&public_key)
            .await;
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn unknown_key_without_tofu_test() {
        let mut mock_store = MockHostKeyStore::new();
        mock_store
            .expect_check()
            .times(1)
            .returning(|_, _, _| Ok(HostKeyStatus::Unknown));
        mock_store.expect_learn().never();

        let result = handler(mock_store, false)
            .check_server_key(&create_public_key())
            .await;
        assert!(!result.unwrap());
    }

    #[tokio::test]
    async fn store_failure_test() {
        let mut mock_store = MockHostKeyStore::new();
        mock_store.expect_check().times(1).returning(|_, _, _| {
            Err(HostKeyError::KnownHosts {
                path: String::from("/tmp/known_hosts"),
                reason: String::from("permission denied"),
            })
        });

        let result = handler(mock_store, false)
            .check_server_key(&create_public_key())
            .await;
        assert!(matches!(result, Err(TunnelError::HostKeyStore(_))));
    }

    #[tokio::test]
    async fn slow_store_does_not_stall_the_runtime() {
        let mut mock_store = MockHostKeyStore::new();
        mock_store.expect_check().times(1).returning(|_, _, _| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(HostKeyStatus::Trusted)
        });

        // single threaded runtime: the ticker only runs if the lookup is off it
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let result = handler(mock_store, false)
            .check_server_key(&create_public_key())
            .await;
        ticker.abort();
        assert!(result.unwrap());
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }
}
