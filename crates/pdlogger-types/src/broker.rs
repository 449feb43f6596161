//! Broker credentials.
//!
//! [`BrokerConfigDocument`] mirrors the JSON document persisted by the
//! config store (`server`, `port`, `user`, `pass`) and accepts anything the
//! web UI might send. [`BrokerConfig`] is the validated value the
//! connectivity manager applies; two configs are the same broker setup iff
//! every field compares equal.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default MQTT port offered when no document exists yet.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Raw broker configuration as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BrokerConfigDocument {
    pub server: String,
    pub port: i64,
    pub user: String,
    pub pass: String,
}

impl Default for BrokerConfigDocument {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: i64::from(DEFAULT_MQTT_PORT),
            user: String::new(),
            pass: String::new(),
        }
    }
}

impl BrokerConfigDocument {
    /// Check that the port lies in `1..=65535`.
    ///
    /// This is the only rule enforced when the document is saved; an empty
    /// server is accepted on save and rejected when the config is applied.
    pub fn validate_port(&self) -> ConfigResult<u16> {
        u16::try_from(self.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or(ConfigError::PortOutOfRange(self.port))
    }

    /// Validate the document into an applicable [`BrokerConfig`].
    pub fn validate(&self) -> ConfigResult<BrokerConfig> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        let port = self.validate_port()?;
        Ok(BrokerConfig {
            host: self.server.clone(),
            port,
            username: self.user.clone(),
            password: self.pass.clone(),
        })
    }
}

/// Validated broker configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl BrokerConfig {
    /// Credentials to present to the broker, if a username is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }

    /// Convert back into the on-disk document form.
    #[must_use]
    pub fn to_document(&self) -> BrokerConfigDocument {
        BrokerConfigDocument {
            server: self.host.clone(),
            port: i64::from(self.port),
            user: self.username.clone(),
            pass: self.password.clone(),
        }
    }
}

// The password never shows up in logs.
impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = if self.username.is_empty() {
            "(none)"
        } else {
            self.username.as_str()
        };
        write!(f, "{}:{} user={}", self.host, self.port, user)
    }
}
