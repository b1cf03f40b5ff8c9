use std::path::PathBuf;

use russh::keys::{
    PublicKey,
    known_hosts::{check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path},
};

use super::{HostKeyError, HostKeyStatus, HostKeyStore};

pub(crate) struct KnownHostsFile {
    path: Option<PathBuf>,
}

impl KnownHostsFile {
    pub fn new(path: Option<PathBuf>) -> Self {
        KnownHostsFile { path }
    }

    fn display_path(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| String::from("~/.ssh/known_hosts"))
    }

    fn error(&self, e: russh::keys::Error) -> HostKeyError {
        HostKeyError::KnownHosts {
            path: self.display_path(),
            reason: e.to_string(),
        }
    }
}

impl HostKeyStore for KnownHostsFile {
    fn check(&self, host: &str, port: u16, key: &PublicKey) -> Result<HostKeyStatus, HostKeyError> {
        let result = match &self.path {
            Some(path) => check_known_hosts_path(host, port, key, path),
            None => check_known_hosts(host, port, key),
        };
        match result {
            Ok(true) => Ok(HostKeyStatus::Trusted),
            Ok(false) => Ok(HostKeyStatus::Unknown),
            Err(russh::keys::Error::KeyChanged { .. }) => Ok(HostKeyStatus::Changed),
            Err(e) => Err(self.error(e)),
        }
    }

    fn learn(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), HostKeyError> {
        tracing::info!("storing host key for {}:{} in {}", host, port, self.display_path());
        match &self.path {
            Some(path) => learn_known_hosts_path(host, port, key, path),
            None => learn_known_hosts(host, port, key),
        }
        .map_err(|e| self.error(e))
    }
}
