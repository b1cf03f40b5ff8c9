use std::{path::PathBuf, sync::Arc};

use known_hosts::KnownHostsFile;
use pinned::{AcceptAny, PinnedFingerprint};
use russh::keys::PublicKey;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub(crate) mod known_hosts;
pub(crate) mod pinned;

#[derive(Error, Debug)]
pub enum HostKeyError {
    #[error("known_hosts error for {path}: {reason}")]
    KnownHosts { path: String, reason: String },
}

/// Outcome of looking a server key up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyStatus {
    Trusted,
    Unknown,
    Changed,
}

/// Where trusted server keys come from.
#[cfg_attr(test, automock)]
pub trait HostKeyStore: Send + Sync {
    fn check(&self, host: &str, port: u16, key: &PublicKey) -> Result<HostKeyStatus, HostKeyError>;
    fn learn(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), HostKeyError>;
}

/// Host key verification policy of a tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// any key is accepted (only its fingerprint is logged)
    #[default]
    AcceptAny,
    /// the server must present exactly this SHA-256 fingerprint
    Fingerprint(String),
    /// OpenSSH known_hosts file, `~/.ssh/known_hosts` when no path is given
    KnownHosts {
        path: Option<PathBuf>,
        trust_on_first_use: bool,
    },
}

impl HostKeyPolicy {
    pub fn trust_on_first_use(&self) -> bool {
        match self {
            HostKeyPolicy::KnownHosts {
                trust_on_first_use, ..
            } => *trust_on_first_use,
            _ => false,
        }
    }
}

pub fn get_store(policy: &HostKeyPolicy) -> Arc<dyn HostKeyStore> {
    match policy {
        HostKeyPolicy::AcceptAny => Arc::new(AcceptAny),
        HostKeyPolicy::Fingerprint(fingerprint) => Arc::new(PinnedFingerprint::new(fingerprint)),
        HostKeyPolicy::KnownHosts { path, .. } => Arc::new(KnownHostsFile::new(path.clone())),
    }
}
