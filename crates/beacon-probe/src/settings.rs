//! Probe settings from the environment
//!
//! Values come from the process environment first, then from a `.env` file in
//! the working directory. The file never overrides a variable that is already
//! set.

use anyhow::{Context, Result};
use beacon_gateway::GatewayConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DIMENSION: &str = "minecraft:overworld";
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Parameters for the MTR actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtrParams {
    /// `None` asks for every dimension
    pub dimension: Option<String>,
    pub route_id: i64,
    pub station_id: Option<String>,
    pub platform_id: Option<String>,
    pub depot_id: i64,
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub gateway: GatewayConfig,
    pub output_dir: PathBuf,
    pub mtr: MtrParams,
}

impl ProbeSettings {
    /// Read settings from the process environment and `./.env`.
    ///
    /// `output_arg` (the first command-line argument) wins over `OUTPUT_DIR`.
    pub fn load(output_arg: Option<String>) -> Result<Self> {
        let dotenv = match std::fs::read_to_string(".env") {
            Ok(text) => parse_dotenv(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).context("Failed to read .env"),
        };
        Self::from_lookup(
            |key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()),
            output_arg,
        )
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        output_arg: Option<String>,
    ) -> Result<Self> {
        let mut gateway = GatewayConfig::default();
        if let Some(host) = non_empty(lookup("PROVIDER_HOST")) {
            gateway.host = host;
        }
        if let Some(port) = non_empty(lookup("PROVIDER_PORT")) {
            gateway.port = port
                .parse()
                .with_context(|| format!("Invalid PROVIDER_PORT: {}", port))?;
        }
        if let Some(token) = non_empty(lookup("PROVIDER_TOKEN")) {
            gateway.token = token;
        }
        if let Some(ms) = non_empty(lookup("REQUEST_TIMEOUT_MS")) {
            let ms: u64 = ms
                .parse()
                .with_context(|| format!("Invalid REQUEST_TIMEOUT_MS: {}", ms))?;
            gateway.request_timeout = Duration::from_millis(ms);
        }
        gateway.validate()?;

        let output_dir = output_arg
            .or_else(|| non_empty(lookup("OUTPUT_DIR")))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let dimension = match lookup("PROVIDER_MTR_DIMENSION") {
            None => Some(DEFAULT_DIMENSION.to_string()),
            Some(value) => non_empty(Some(value)),
        };

        let mtr = MtrParams {
            dimension,
            route_id: parse_id(&lookup, "PROVIDER_MTR_ROUTE_ID")?,
            station_id: non_empty(lookup("PROVIDER_MTR_STATION_ID")),
            platform_id: non_empty(lookup("PROVIDER_MTR_PLATFORM_ID")),
            depot_id: parse_id(&lookup, "PROVIDER_MTR_DEPOT_ID")?,
        };

        Ok(Self {
            gateway,
            output_dir,
            mtr,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and lines without `=`
/// are skipped; the first occurrence of a key wins.
pub fn parse_dotenv(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in text.lines() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.entry(key.to_string())
            .or_insert_with(|| value.trim().to_string());
    }
    vars
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_id(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<i64> {
    match non_empty(lookup(key)) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, value)),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(vars: &[(&str, &str)], arg: Option<&str>) -> Result<ProbeSettings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProbeSettings::from_lookup(|key| vars.get(key).cloned(), arg.map(String::from))
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[], None).unwrap();
        assert_eq!(settings.gateway.address(), "127.0.0.1:28545");
        assert_eq!(settings.gateway.token, "change-me");
        assert_eq!(settings.gateway.request_timeout, Duration::from_millis(15_000));
        assert_eq!(settings.output_dir, PathBuf::from("output"));
        assert_eq!(
            settings.mtr,
            MtrParams {
                dimension: Some(DEFAULT_DIMENSION.into()),
                route_id: 0,
                station_id: None,
                platform_id: None,
                depot_id: 0,
            }
        );
    }

    #[test]
    fn test_overrides() {
        let settings = settings(
            &[
                ("PROVIDER_HOST", "10.0.0.5"),
                ("PROVIDER_PORT", "3000"),
                ("PROVIDER_TOKEN", "s3cret"),
                ("REQUEST_TIMEOUT_MS", "500"),
                ("OUTPUT_DIR", "/tmp/from-env"),
                ("PROVIDER_MTR_DIMENSION", ""),
                ("PROVIDER_MTR_ROUTE_ID", "42"),
                ("PROVIDER_MTR_STATION_ID", " 9007199254740993 "),
                ("PROVIDER_MTR_PLATFORM_ID", ""),
                ("PROVIDER_MTR_DEPOT_ID", "7"),
            ],
            Some("/tmp/from-arg"),
        )
        .unwrap();

        assert_eq!(settings.gateway.address(), "10.0.0.5:3000");
        assert_eq!(settings.gateway.token, "s3cret");
        assert_eq!(settings.gateway.request_timeout, Duration::from_millis(500));
        assert_eq!(settings.output_dir(), Path::new("/tmp/from-arg"));
        assert_eq!(settings.mtr.dimension, None);
        assert_eq!(settings.mtr.route_id, 42);
        assert_eq!(settings.mtr.station_id.as_deref(), Some("9007199254740993"));
        assert_eq!(settings.mtr.platform_id, None);
        assert_eq!(settings.mtr.depot_id, 7);
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        assert!(settings(&[("PROVIDER_PORT", "http")], None).is_err());
        assert!(settings(&[("PROVIDER_PORT", "0")], None).is_err());
        assert!(settings(&[("REQUEST_TIMEOUT_MS", "soon")], None).is_err());
        assert!(settings(&[("PROVIDER_MTR_ROUTE_ID", "abc")], None).is_err());
    }

    #[test]
    fn test_parse_dotenv() {
        let vars = parse_dotenv(
            "# gateway\n\
             PROVIDER_HOST = 192.168.1.20\n\
             \n\
             PROVIDER_TOKEN=a=b\n\
             not a pair\n\
             =orphan\n\
             PROVIDER_HOST=ignored\n",
        );
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["PROVIDER_HOST"], "192.168.1.20");
        assert_eq!(vars["PROVIDER_TOKEN"], "a=b");
    }
}
