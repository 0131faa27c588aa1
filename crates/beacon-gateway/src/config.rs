//! Client configuration

use beacon_core::{GatewayError, Result};
use std::time::Duration;

/// Default gateway port
pub const DEFAULT_PORT: u16 = 28545;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Upper bound on a single inbound frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Configuration for a gateway connection
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret sent in the handshake
    pub token: String,
    /// Client identifier sent in the handshake
    pub client_id: String,
    /// Used by `request()` when no explicit timeout is given
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// How long `connect()` waits for `handshake_ack`
    pub handshake_timeout: Duration,
    pub max_frame_len: usize,
    /// Send pings at the interval announced in the ack
    pub keepalive: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            token: "change-me".to_string(),
            client_id: format!("beacon-probe-{}", std::process::id()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            keepalive: true,
        }
    }
}

impl GatewayConfig {
    /// `host:port` for `TcpStream::connect`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GatewayError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(GatewayError::Config("port must not be 0".into()));
        }
        if self.token.is_empty() {
            return Err(GatewayError::Config("token must not be empty".into()));
        }
        if self.client_id.is_empty() {
            return Err(GatewayError::Config("client id must not be empty".into()));
        }
        for (name, value) in [
            ("request timeout", self.request_timeout),
            ("connect timeout", self.connect_timeout),
            ("handshake timeout", self.handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(GatewayError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.max_frame_len == 0 {
            return Err(GatewayError::Config("max frame length must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.address(), "127.0.0.1:28545");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert!(config.client_id.starts_with("beacon-probe-"));
        assert!(config.keepalive);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            GatewayConfig {
                host: " ".into(),
                ..Default::default()
            },
            GatewayConfig {
                port: 0,
                ..Default::default()
            },
            GatewayConfig {
                token: String::new(),
                ..Default::default()
            },
            GatewayConfig {
                request_timeout: Duration::ZERO,
                ..Default::default()
            },
            GatewayConfig {
                handshake_timeout: Duration::ZERO,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(GatewayError::Config(_))),
                "{:?} should be rejected",
                config
            );
        }
    }
}
