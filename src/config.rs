use std::{env::VarError, path::PathBuf, time::Duration};

use serde::{
    Deserialize,
    de::{self, Visitor},
};
use thiserror::Error;

use crate::{host_keys::HostKeyPolicy, tunneling::Tunnel};

pub const DEFAULT_PATH: &str = "burrow.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error while reading config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("env variable error: {0}")]
    Env(String),
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct BurrowConfig {
    pub local: EndpointConfig,
    pub server: EndpointConfig,
    pub remote: EndpointConfig,
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub host_key: HostKeyConfig,
    /// bounds the ssh dial of every forwarded connection
    pub connect_timeout_secs: Option<u64>,
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthFileConfig {
    #[serde(alias = "KEY")]
    Key { username: String, key_path: String },
    #[serde(alias = "PASSWORD")]
    Password {
        username: String,
        password: EnvOrValue,
    },
}
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostKeyConfig {
    #[default]
    #[serde(alias = "ANY")]
    Any,
    #[serde(alias = "FINGERPRINT")]
    Fingerprint { fingerprint: String },
    #[serde(alias = "KNOWN_HOSTS")]
    KnownHosts {
        path: Option<String>,
        #[serde(default)]
        trust_on_first_use: bool,
    },
}
/// A secret that is either written in the config file (`value`) or read
/// from an environment variable (`from_env`).
#[derive(Clone, PartialEq, Debug)]
pub struct EnvOrValue {
    from_env: Option<String>,
    value: Option<String>,
}

impl EnvOrValue {
    pub fn resolve(&self) -> Result<String, ConfigError> {
        match (&self.value, &self.from_env) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(env_var)) => std::env::var(env_var).map_err(|e| match e {
                VarError::NotPresent => {
                    ConfigError::Env(format!("{env_var} not found in the environment!"))
                }
                VarError::NotUnicode(_) => ConfigError::Env(format!("{env_var} is not unicode!")),
            }),
            (None, None) => Err(ConfigError::Env(String::from(
                "neither `value` nor `from_env` is set",
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EnvOrValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EnvOrValueVisitor;
        impl<'de> Visitor<'de> for EnvOrValueVisitor {
            type Value = EnvOrValue;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter
                    .write_str("a map with at least one between `from_env` or `value` set to Some")
            }
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut from_env = None;
                let mut value = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "from_env" => from_env = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        _ => return Err(de::Error::unknown_field(&key, &["from_env", "value"])),
                    }
                }

                if from_env.is_none() && value.is_none() {
                    return Err(de::Error::custom(
                        "at least one between `from_env` or `value` must be provided!",
                    ));
                }
                if from_env.is_some() && value.is_some() {
                    from_env = None; // value takes precedence
                }
                Ok(EnvOrValue { value, from_env })
            }
        }
        deserializer.deserialize_map(EnvOrValueVisitor)
    }
}

impl BurrowConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn into_tunnel(self) -> Result<Tunnel, ConfigError> {
        let mut tunnel = Tunnel::new(
            self.local.host,
            self.server.host,
            self.remote.host,
            self.local.port,
            self.server.port,
            self.remote.port,
        );
        tunnel = match self.auth {
            AuthFileConfig::Key { username, key_path } => {
                tunnel.with_key_auth(username, expand_home(&key_path))
            }
            AuthFileConfig::Password { username, password } => {
                tunnel.with_password_auth(username, password.resolve()?)
            }
        };
        tunnel = tunnel.with_host_key_policy(match self.host_key {
            HostKeyConfig::Any => HostKeyPolicy::AcceptAny,
            HostKeyConfig::Fingerprint { fingerprint } => HostKeyPolicy::Fingerprint(fingerprint),
            HostKeyConfig::KnownHosts {
                path,
                trust_on_first_use,
            } => HostKeyPolicy::KnownHosts {
                path: path.as_deref().map(expand_home),
                trust_on_first_use,
            },
        });
        if let Some(secs) = self.connect_timeout_secs {
            tunnel = tunnel.with_connect_timeout(Duration::from_secs(secs));
        }
        Ok(tunnel)
    }
}

/// `~/x` -> `$HOME/x`, anything else untouched
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
