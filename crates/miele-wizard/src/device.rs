//! Device-side commissioning steps: availability probes, key and Wi-Fi
//! provisioning pushes, and endpoint config generation.

use miele_local_core::provision::ProvisioningInfo;
use miele_local_net::transport::Transport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, TcpStream};
use std::time::Duration;
use tracing::{debug, info};

/// Security values a device treats as an open network.
const OPEN_SECURITY_VALUES: &[&str] = &["", "open", "none", "--"];

/// Payload for `PUT /WLAN`.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct WifiPayload {
    #[serde(rename = "SSID")]
    pub ssid: String,
    #[serde(rename = "Sec")]
    pub security: String,
    #[serde(rename = "Key")]
    pub key: String,
}

/// Normalize an appliance name into an endpoint key: lower-case, runs of
/// anything but letters, digits, `_` and `-` collapse to one `_`.
pub fn normalize_endpoint_name(appliance_type: &str) -> anyhow::Result<String> {
    let mut normalized = String::new();
    let mut gap = false;
    for ch in appliance_type.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-' {
            normalized.push(ch);
            gap = false;
        } else if !gap {
            normalized.push('_');
            gap = true;
        }
    }
    let normalized = normalized.trim_matches('_').to_string();
    if normalized.is_empty() {
        anyhow::bail!("appliance name must contain letters or digits");
    }
    Ok(normalized)
}

/// Validate an IPv4 host address.
pub fn validate_ipv4(host: &str) -> anyhow::Result<Ipv4Addr> {
    host.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| anyhow::anyhow!("only IPv4 addresses are currently supported"))
}

pub fn is_open_security(security: &str) -> bool {
    let normalized = security.trim().to_lowercase();
    if OPEN_SECURITY_VALUES.contains(&normalized.as_str()) {
        return true;
    }
    normalized.contains("open") && !normalized.contains("wpa")
}

/// Unknown or unreported security defaults to WPA2, the common case for
/// home networks.
pub fn normalize_security(security: &str) -> String {
    let value = security.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
        "WPA2".to_string()
    } else {
        value.to_string()
    }
}

/// Build the `PUT /WLAN` payload; open networks send an empty key.
pub fn build_wifi_payload(ssid: &str, security: &str, wifi_key: &str) -> WifiPayload {
    let security = normalize_security(security);
    let key = if is_open_security(&security) {
        String::new()
    } else {
        wifi_key.to_string()
    };
    WifiPayload { ssid: ssid.to_string(), security, key }
}

#[derive(Serialize)]
struct ConfigEndpoint {
    host: String,
    #[serde(rename = "groupId")]
    group_id: String,
    #[serde(rename = "groupKey")]
    group_key: String,
    route: String,
}

#[derive(Serialize)]
struct ConfigFile {
    endpoints: BTreeMap<String, ConfigEndpoint>,
}

/// Render a server endpoint config stanza as YAML.
pub fn build_config_yaml(
    endpoint_name: &str,
    host: &str,
    group_id: &str,
    group_key: &str,
    route: &str,
) -> anyhow::Result<String> {
    let mut endpoints = BTreeMap::new();
    endpoints.insert(
        endpoint_name.to_string(),
        ConfigEndpoint {
            host: host.to_string(),
            group_id: group_id.to_string(),
            group_key: group_key.to_string(),
            route: route.to_string(),
        },
    );
    serde_yaml::to_string(&ConfigFile { endpoints })
        .map_err(|e| anyhow::anyhow!("cannot render config: {e}"))
}

/// Whether the device answers on TCP port 80 at all.
pub fn tcp_port_open(host: &str, timeout: Duration) -> bool {
    format!("{host}:80")
        .parse()
        .ok()
        .map(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
        .unwrap_or(false)
}

/// Probe a device resource with a bare GET (no signing; un-commissioned
/// devices answer these in setup mode).
pub async fn check_uri_available(host: &str, path: &str) -> (bool, String) {
    let url = format!("http://{host}{path}");
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(8)).build() {
        Ok(client) => client,
        Err(e) => return (false, format!("client setup failed: {e}")),
    };
    match client.get(&url).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            (response.status().is_success(), format!("GET {url} -> HTTP {status}"))
        }
        Err(e) => (false, format!("GET {url} failed: {e}")),
    }
}

/// Push the pairing payload to `/Security/Commissioning`.
///
/// Setup-mode firmware varies: plain HTTP first, then HTTPS with the
/// pairing authorization header and certificate validation disabled (the
/// device presents a self-signed certificate). Returns the attempt log.
pub async fn provision_keys(host: &str, keys_payload: &[u8]) -> (bool, Vec<String>) {
    let mut attempts = Vec::new();
    let path = "/Security/Commissioning";

    let http_url = format!("http://{host}{path}");
    match reqwest::Client::builder()
        .timeout(Duration::from_secs(8))
        .build()
    {
        Ok(client) => match client.put(&http_url).body(keys_payload.to_vec()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                attempts.push(format!("PUT {http_url} -> HTTP {status}"));
                if response.status().is_success() {
                    return (true, attempts);
                }
            }
            Err(e) => attempts.push(format!("PUT {http_url} failed: {e}")),
        },
        Err(e) => attempts.push(format!("client setup failed: {e}")),
    }

    let https_url = format!("https://{host}{path}");
    match reqwest::Client::builder()
        .timeout(Duration::from_secs(8))
        .danger_accept_invalid_certs(true)
        .build()
    {
        Ok(client) => {
            match client
                .put(&https_url)
                .header("Authorization", "MielePairing:Pairing")
                .body(keys_payload.to_vec())
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status().as_u16();
                    attempts.push(format!("PUT {https_url} -> HTTP {status}"));
                    if response.status().is_success() {
                        return (true, attempts);
                    }
                }
                Err(e) => attempts.push(format!("PUT {https_url} failed: {e}")),
            }
        }
        Err(e) => attempts.push(format!("client setup failed: {e}")),
    }

    (false, attempts)
}

/// Push Wi-Fi credentials to `/WLAN` on the device's setup access point.
pub async fn provision_wifi(host: &str, payload: &WifiPayload) -> (bool, String) {
    let url = format!("http://{host}/WLAN");
    let body = match serde_json::to_vec(payload) {
        Ok(body) => body,
        Err(e) => return (false, format!("cannot serialize payload: {e}")),
    };
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(8)).build() {
        Ok(client) => client,
        Err(e) => return (false, format!("client setup failed: {e}")),
    };
    match client
        .put(&url)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
    {
        Ok(response) => {
            let status = response.status().as_u16();
            let message = format!("PUT {url} -> HTTP {status}");
            debug!(%message);
            (response.status().is_success(), message)
        }
        Err(e) => (false, format!("PUT {url} failed: {e}")),
    }
}

/// Fetch the device route over the freshly commissioned encrypted
/// transport: the single key of the device listing.
pub async fn fetch_device_route(
    info: ProvisioningInfo,
    host: &str,
) -> anyhow::Result<String> {
    let transport = Transport::new(info)?;
    let response = transport.request("GET", host, "/Devices", None).await?;
    let text = response.text()?;
    let listing: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("device listing is not JSON: {e}"))?;
    let object = listing
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("device listing is not a JSON object"))?;
    if object.len() != 1 {
        anyhow::bail!("cannot autodetect device route: {} devices listed", object.len());
    }
    let route = object.keys().next().cloned().unwrap_or_default();
    info!(%route, "resolved device route");
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint_name() {
        assert_eq!(normalize_endpoint_name("Coffee Maker").unwrap(), "coffee_maker");
        assert_eq!(normalize_endpoint_name("Washer #2!").unwrap(), "washer_2");
        assert!(normalize_endpoint_name("***").is_err());
    }

    #[test]
    fn test_validate_ipv4() {
        assert!(validate_ipv4("10.0.0.11").is_ok());
        assert!(validate_ipv4(" 10.0.0.11 ").is_ok());
        assert!(validate_ipv4("fe80::1").is_err());
        assert!(validate_ipv4("washer.local").is_err());
    }

    #[test]
    fn test_open_network_sends_empty_key() {
        let payload = build_wifi_payload("Guest", "OPEN", "ignored");
        assert_eq!(payload.key, "");
        assert_eq!(payload.security, "OPEN");
    }

    #[test]
    fn test_unknown_security_defaults_to_wpa2() {
        let payload = build_wifi_payload("Home", "UNKNOWN", "secret");
        assert_eq!(payload.security, "WPA2");
        assert_eq!(payload.key, "secret");

        let payload = build_wifi_payload("Home", "", "secret");
        assert_eq!(payload.security, "WPA2");
    }

    #[test]
    fn test_is_open_security() {
        assert!(is_open_security("open"));
        assert!(is_open_security("OPEN (enhanced)"));
        assert!(!is_open_security("WPA2"));
        assert!(!is_open_security("open-wpa mixed"));
    }

    #[test]
    fn test_config_yaml_matches_server_schema() {
        let yaml = build_config_yaml(
            "washer",
            "10.0.0.11",
            "1234567890ABCDEF",
            &"A".repeat(128),
            "000123456789",
        )
        .unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let stanza = &parsed["endpoints"]["washer"];
        assert_eq!(stanza["host"].as_str(), Some("10.0.0.11"));
        assert_eq!(stanza["groupId"].as_str(), Some("1234567890ABCDEF"));
        assert_eq!(stanza["route"].as_str(), Some("000123456789"));
    }

    #[test]
    fn test_wifi_payload_field_names() {
        let payload = build_wifi_payload("Home", "WPA2", "secret");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["SSID"].as_str(), Some("Home"));
        assert_eq!(json["Sec"].as_str(), Some("WPA2"));
        assert_eq!(json["Key"].as_str(), Some("secret"));
    }
}
