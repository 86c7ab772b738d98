//! Relay and client settings.
//!
//! Both binaries map their command-line flags onto these structs; every
//! field has a default so a bare invocation works on localhost.

use crate::net::error::HostnameError;
use crate::net::wire;
use crate::protocols::bb84::{DEFAULT_CHECK_SAMPLES, DEFAULT_SESSION_LENGTH};
use thiserror::Error;

/// Port the relay listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8484;

/// Longest session a client will prepare; keeps a serialized stream well
/// inside one wire frame.
pub const MAX_SESSION_QUBITS: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Bind host is empty")]
    EmptyHost,

    #[error("Relay address is empty")]
    EmptyRelay,

    #[error("Invalid hostname: {0}")]
    Hostname(#[from] HostnameError),

    #[error("A session needs at least one qubit")]
    NoQubits,

    #[error("Sessions are limited to {max} qubits, {requested} requested")]
    TooManyQubits { requested: usize, max: usize },

    #[error("The check needs at least one sample")]
    NoCheckSamples,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interface to bind.
    pub host: String,
    pub port: u16,
    /// Run every relayed qubit stream through an intercept-resend attack.
    pub eavesdrop: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            eavesdrop: false,
        }
    }
}

impl RelayConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name this client registers under.
    pub hostname: String,
    /// `host:port` of the relay.
    pub relay: String,
    /// Qubits prepared when a peer asks this client for a stream.
    pub qubits: usize,
    /// Sifted bits sacrificed when this client initiates a check.
    pub check_samples: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            relay: format!("127.0.0.1:{DEFAULT_PORT}"),
            qubits: DEFAULT_SESSION_LENGTH,
            check_samples: DEFAULT_CHECK_SAMPLES,
        }
    }
}

impl ClientConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        wire::validate_hostname(&self.hostname)?;
        if self.relay.trim().is_empty() {
            return Err(ConfigError::EmptyRelay);
        }
        if self.qubits == 0 {
            return Err(ConfigError::NoQubits);
        }
        if self.qubits > MAX_SESSION_QUBITS {
            return Err(ConfigError::TooManyQubits {
                requested: self.qubits,
                max: MAX_SESSION_QUBITS,
            });
        }
        if self.check_samples == 0 {
            return Err(ConfigError::NoCheckSamples);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_localhost() {
        let relay = RelayConfig::default();
        assert_eq!(relay.bind_address(), "0.0.0.0:8484");
        assert!(!relay.eavesdrop);
        assert!(relay.validate().is_ok());

        let client = ClientConfig::new("alice");
        assert_eq!(client.relay, "127.0.0.1:8484");
        assert_eq!(client.qubits, 16);
        assert_eq!(client.check_samples, 4);
        assert!(client.validate().is_ok());
    }

    #[test]
    fn client_validation() {
        assert_eq!(
            ClientConfig::default().validate(),
            Err(ConfigError::Hostname(HostnameError::Empty))
        );

        let mut config = ClientConfig::new("alice");
        config.qubits = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoQubits));

        config.qubits = MAX_SESSION_QUBITS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyQubits { .. })
        ));

        let mut config = ClientConfig::new("alice");
        config.check_samples = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoCheckSamples));
    }

    #[test]
    fn relay_needs_a_host() {
        let config = RelayConfig {
            host: " ".into(),
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));
    }
}
