//! Server configuration read from the environment.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `PORT` | `8080` | plain listener port |
//! | `HOST` | `0.0.0.0` | bind host |
//! | `SECURE_PORT` | `8443` | TLS listener port |
//! | `TLS_CERT` / `TLS_KEY` | unset | PEM files; both set enables TLS |
//! | `ECHO_TO_SENDER` | `false` | relay chat back to its author |
//! | `OUTBOX_CAPACITY` | `64` | per-session queue depth |

use std::path::PathBuf;
use std::str::FromStr;

use switchboard_transport::TlsCredentials;

use crate::RelayPolicy;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SECURE_PORT: u16 = 8443;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Rejected configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used.
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// Only one of `TLS_CERT` and `TLS_KEY` is set.
    #[error("TLS_CERT and TLS_KEY must be set together")]
    IncompleteTls,

    /// A credential file could not be read.
    #[error("cannot read TLS credentials: {0}")]
    Credentials(#[source] std::io::Error),
}

/// Where the secure listener's PEM files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

impl TlsPaths {
    /// Reads both files.
    pub fn load(&self) -> Result<TlsCredentials, ConfigError> {
        TlsCredentials::from_pem_files(&self.certificate, &self.private_key)
            .map_err(ConfigError::Credentials)
    }
}

/// Everything the server needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub secure_port: u16,
    /// `None` runs the plain listener only.
    pub tls: Option<TlsPaths>,
    pub relay: RelayPolicy,
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            secure_port: DEFAULT_SECURE_PORT,
            tls: None,
            relay: RelayPolicy::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from any variable lookup. Unset and empty variables
    /// take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let tls = match (get("TLS_CERT"), get("TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                certificate: PathBuf::from(cert),
                private_key: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        let outbox_capacity = parse(&get, "OUTBOX_CAPACITY", defaults.outbox_capacity)?;
        if outbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "OUTBOX_CAPACITY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port)?,
            secure_port: parse(&get, "SECURE_PORT", defaults.secure_port)?,
            tls,
            relay: RelayPolicy {
                echo_to_sender: parse_flag(&get, "ECHO_TO_SENDER")?,
            },
            outbox_capacity,
        })
    }

    /// `host:port` for the plain listener.
    pub fn plain_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:secure_port` for the TLS listener.
    pub fn secure_addr(&self) -> String {
        format!("{}:{}", self.host, self.secure_port)
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_flag<G>(get: &G, var: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(var) else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected true or false".into(),
        }),
    }
}
