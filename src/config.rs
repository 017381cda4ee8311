//! Layered driver configuration.
//!
//! Defaults are overridden by an optional TOML file, which is in turn overridden by
//! `PRODIGY_*` environment variables — the same precedence order the areaDetector IOC
//! shell expects for `PRODIGY_HOST`/`PRODIGY_PORT`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{DriverResult, ProdigyError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Prodigy server host.
    pub host: String,
    /// Prodigy server port (default Prodigy Remote In port).
    pub port: u16,
    /// Timeout for establishing the TCP connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Timeout for a single request-reply exchange, in milliseconds.
    pub request_timeout_ms: u64,
    /// Interval between `GetAcquisitionStatus` polls during a session, in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound on doubles requested in a single `GetAcquisitionData` call.
    pub max_values_per_read: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7010,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            poll_interval_ms: 100,
            max_values_per_read: 1_000_000,
        }
    }
}

impl DriverConfig {
    /// Load configuration by layering defaults, an optional TOML file, then
    /// `PRODIGY_`-prefixed environment variables.
    pub fn load(toml_path: Option<&str>) -> DriverResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(DriverConfig::default()));
        if let Some(path) = toml_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("PRODIGY_"));
        figment
            .extract()
            .map_err(|e| ProdigyError::Config(e.to_string()))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.port, 7010);
        assert_eq!(cfg.poll_interval_ms, 100);
        assert_eq!(cfg.max_values_per_read, 1_000_000);
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("PRODIGY_HOST", "10.0.0.5");
            jail.set_env("PRODIGY_PORT", "9999");
            let cfg = DriverConfig::load(None).unwrap();
            assert_eq!(cfg.host, "10.0.0.5");
            assert_eq!(cfg.port, 9999);
            Ok(())
        });
    }
}
