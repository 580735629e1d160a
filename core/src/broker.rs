//! Broker identity and caller-supplied configuration.
//!
//! A `Broker` is an immutable value owned by one client. Credentials are
//! never read from ambient process state; two clients talking to two
//! brokers share nothing.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

pub const DEFAULT_API_VERSION: &str = "2.17";

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

/// Location and credentials of a service broker.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Broker {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Broker {
    pub fn new(url: &str, username: &str, password: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            api_version: default_api_version(),
        }
    }

    pub fn with_api_version(mut self, version: &str) -> Self {
        self.api_version = version.to_string();
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Settings for the blocking HTTP transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// Upper bound on a single round trip. A call that exceeds it fails with
    /// a transport error; the broker may still have acted on the request.
    #[serde(default, with = "opt_secs")]
    pub timeout: Option<Duration>,
}

/// How the lifecycle driver treats a 202 that carries no operation token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTokenPolicy {
    /// Keep the operation in flight and poll last-operation without a token;
    /// it becomes terminal only once a poll reports so.
    #[default]
    PollWithoutToken,
    /// Treat the acceptance itself as success.
    AssumeSucceeded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub missing_token: MissingTokenPolicy,
}

mod opt_secs {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_is_basic_base64() {
        let broker = Broker::new("http://broker", "user", "pass");
        assert_eq!(broker.authorization(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let broker = Broker::new("http://broker:8080/", "u", "p");
        assert_eq!(broker.base_url(), "http://broker:8080");
    }

    #[test]
    fn deserialized_broker_defaults_version() {
        let broker: Broker =
            serde_json::from_str(r#"{"url":"http://b/","username":"u","password":"p"}"#).unwrap();
        assert_eq!(broker.api_version, DEFAULT_API_VERSION);
        assert_eq!(broker.base_url(), "http://b");
    }

    #[test]
    fn debug_redacts_password() {
        let broker = Broker::new("http://b", "u", "hunter2").with_api_version("2.16");
        let debug = format!("{broker:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("2.16"));
    }

    #[test]
    fn config_values_deserialize() {
        let cfg: TransportConfig = serde_json::from_str(r#"{"timeout":2.5}"#).unwrap();
        assert_eq!(cfg.timeout, Some(Duration::from_millis(2500)));
        let cfg: TransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.timeout, None);
        assert!(serde_json::from_str::<TransportConfig>(r#"{"timeout":-1}"#).is_err());
        assert!(serde_json::from_str::<TransportConfig>(r#"{"timeout":1e300}"#).is_err());

        let cfg: LifecycleConfig = serde_json::from_str(r#"{"missing_token":"assume_succeeded"}"#).unwrap();
        assert_eq!(cfg.missing_token, MissingTokenPolicy::AssumeSucceeded);
        assert_eq!(LifecycleConfig::default().missing_token, MissingTokenPolicy::PollWithoutToken);
    }
}
