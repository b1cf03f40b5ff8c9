use russh::keys::PublicKey;

use super::{HostKeyError, HostKeyStatus, HostKeyStore};

pub(crate) struct AcceptAny;

impl HostKeyStore for AcceptAny {
    fn check(&self, _host: &str, _port: u16, _key: &PublicKey) -> Result<HostKeyStatus, HostKeyError> {
        Ok(HostKeyStatus::Trusted)
    }
    fn learn(&self, _host: &str, _port: u16, _key: &PublicKey) -> Result<(), HostKeyError> {
        Ok(())
    }
}

pub(crate) struct PinnedFingerprint {
    /// base64 part only, `SHA256:` is stripped
    expected: String,
}

impl PinnedFingerprint {
    pub fn new(fingerprint: &str) -> Self {
        let fingerprint = fingerprint.trim();
        PinnedFingerprint {
            expected: fingerprint
                .strip_prefix("SHA256:")
                .unwrap_or(fingerprint)
                .to_string(),
        }
    }
}

impl HostKeyStore for PinnedFingerprint {
    fn check(&self, _host: &str, _port: u16, key: &PublicKey) -> Result<HostKeyStatus, HostKeyError> {
        let fingerprint = key.fingerprint(Default::default()).to_string();
        let presented = fingerprint.strip_prefix("SHA256:").unwrap_or(&fingerprint);
        if presented == self.expected {
            Ok(HostKeyStatus::Trusted)
        } else {
            Ok(HostKeyStatus::Changed)
        }
    }
    fn learn(&self, _host: &str, _port: u16, _key: &PublicKey) -> Result<(), HostKeyError> {
        Ok(())
    }
}
