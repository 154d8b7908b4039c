use crate::{QnxtainerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_HOST: &str = "192.168.222.110";
pub const DEFAULT_PORT: u16 = 8080;

/// Where the QNXtainer server lives.
///
/// `host` is a bare host name or address, optionally prefixed with `http://`
/// or `https://`. Older settings files stored the same value under
/// `serverUrl`, which is still accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(alias = "serverUrl")]
    pub host: String,
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.host.trim().starts_with("https://") {
            "https"
        } else {
            "http"
        }
    }

    /// Host with any scheme prefix and trailing slash removed.
    pub fn authority_host(&self) -> &str {
        let host = self.host.trim();
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host);
        host.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<()> {
        let host = self.authority_host();
        if host.is_empty() {
            return Err(QnxtainerError::InvalidConfig("host is empty".to_string()));
        }
        if host.contains("://") {
            return Err(QnxtainerError::InvalidConfig(format!(
                "unsupported scheme in host '{}'",
                self.host
            )));
        }
        if host
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@'))
        {
            return Err(QnxtainerError::InvalidConfig(format!(
                "host '{}' must not contain a path, query or credentials",
                self.host
            )));
        }
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(QnxtainerError::InvalidConfig(format!(
                "host '{}' must not carry a port; set the port separately",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(QnxtainerError::InvalidConfig("port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// `{scheme}://{host}:{port}` without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.authority_host(), self.port)
    }
}

impl fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}
