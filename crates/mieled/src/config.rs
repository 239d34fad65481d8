//! Configuration for mieled

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// mieled - REST gateway to Miele appliances on the local network
#[derive(Parser, Debug, Clone)]
#[command(name = "mieled")]
#[command(about = "Provides a RESTful interface to locally controlled Miele appliances")]
pub struct Config {
    /// IP address to bind to (local only by default)
    #[arg(short, long, default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port to bind to
    #[arg(short, long, default_value = "5001")]
    pub port: u16,

    /// Path to the endpoint configuration file
    #[arg(short, long, default_value = "/etc/mieled.yaml", env = "MIELED_CONFIG")]
    pub config: PathBuf,

    /// Per-request appliance timeout in seconds
    #[arg(long, default_value = "8")]
    pub timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// One appliance stanza in the endpoint file.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "groupKey")]
    pub group_key: String,
    #[serde(default)]
    pub route: Option<String>,
}

impl EndpointConfig {
    /// The configured device route; `"auto"` (or nothing) means resolve
    /// it from the device on first use.
    pub fn effective_route(&self) -> Option<String> {
        self.route
            .as_deref()
            .filter(|route| !route.is_empty() && *route != "auto")
            .map(str::to_string)
    }
}

/// The endpoint file: `endpoints: {name: {host, groupId, groupKey, route}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsFile {
    pub endpoints: HashMap<String, EndpointConfig>,
}

/// Load and parse the YAML endpoint file.
pub fn load_endpoints(path: &Path) -> anyhow::Result<EndpointsFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read config file {}: {e}", path.display()))?;
    let file: EndpointsFile = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid config file {}: {e}", path.display()))?;
    if file.endpoints.is_empty() {
        anyhow::bail!("config file {} defines no endpoints", path.display());
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_endpoints() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "endpoints:\n    washer:\n        host: 10.0.0.11\n        \
             groupId: 1234567890ABCDEF\n        groupKey: \"{}\"\n        \
             route: \"000123456789\"\n",
            "A".repeat(128)
        )
        .unwrap();

        let parsed = load_endpoints(file.path()).unwrap();
        let washer = &parsed.endpoints["washer"];
        assert_eq!(washer.host, "10.0.0.11");
        assert_eq!(washer.effective_route().as_deref(), Some("000123456789"));
    }

    #[test]
    fn test_auto_route_resolves_to_none() {
        let config = EndpointConfig {
            host: "10.0.0.11".into(),
            group_id: String::new(),
            group_key: String::new(),
            route: Some("auto".into()),
        };
        assert!(config.effective_route().is_none());

        let config = EndpointConfig { route: None, ..config };
        assert!(config.effective_route().is_none());
    }

    #[test]
    fn test_empty_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "endpoints: {{}}\n").unwrap();
        assert!(load_endpoints(file.path()).is_err());
    }
}
