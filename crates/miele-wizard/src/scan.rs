//! Wi-Fi network discovery by parsing scan output from whichever tool
//! the host has: `nmcli`, `iw`, or `iwlist`.

use std::collections::HashMap;
use std::process::Command;
use tracing::debug;

/// One discovered network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Network {
    pub ssid: String,
    /// Signal strength; nmcli reports a percentage, iw/iwlist report dBm
    pub rssi: Option<i32>,
    /// Security descriptor as reported; empty or "UNKNOWN" when the
    /// scanner could not tell
    pub security: String,
}

/// Parse `nmcli -t -f SSID,SIGNAL,SECURITY device wifi list` output.
/// Terse-mode fields are `:`-separated with `\:` escapes inside values.
pub fn parse_nmcli_scan_output(output: &str) -> Vec<Network> {
    let mut networks: HashMap<String, Network> = HashMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = split_unescaped(line, ':');
        if fields.len() != 3 {
            continue;
        }
        let ssid = unescape_nmcli(&fields[0]);
        if ssid.is_empty() {
            continue;
        }
        let candidate = Network {
            ssid: ssid.clone(),
            rssi: fields[1].trim().parse().ok(),
            security: fields[2].trim().to_string(),
        };
        merge_network(&mut networks, candidate);
    }
    sort_networks(networks)
}

/// Parse `iw dev <interface> scan` output: `BSS`-delimited blocks with
/// `signal:` and `SSID:` lines; an `RSN:` element means WPA2, a `WPA:`
/// element WPA1.
pub fn parse_iw_scan_output(output: &str) -> Vec<Network> {
    let mut networks: HashMap<String, Network> = HashMap::new();
    for block in output.split("BSS ").skip(1) {
        let mut ssid = None;
        let mut rssi = None;
        for line in block.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("SSID:") {
                let value = rest.trim();
                if !value.is_empty() {
                    ssid = Some(value.to_string());
                }
            } else if let Some(rest) = line.strip_prefix("signal:") {
                rssi = rest
                    .trim()
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|v| v.round() as i32);
            }
        }
        let Some(ssid) = ssid else { continue };
        let security = if block.contains("RSN:") {
            "WPA2".to_string()
        } else if block.contains("WPA:") {
            "WPA".to_string()
        } else {
            "UNKNOWN".to_string()
        };
        merge_network(&mut networks, Network { ssid, rssi, security });
    }
    sort_networks(networks)
}

/// Parse `iwlist <interface> scan` output: `Cell`-delimited blocks with
/// quoted `ESSID`, `Signal level=`, `Encryption key:` and WPA IE lines.
pub fn parse_iwlist_scan_output(output: &str) -> Vec<Network> {
    let mut networks: HashMap<String, Network> = HashMap::new();
    for block in output.split("Cell ").skip(1) {
        let mut ssid = None;
        let mut rssi = None;
        let mut encrypted = false;
        let mut wpa = None;
        for line in block.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("ESSID:") {
                let value = rest.trim().trim_matches('"');
                if !value.is_empty() {
                    ssid = Some(value.to_string());
                }
            } else if let Some(pos) = line.find("Signal level=") {
                rssi = line[pos + "Signal level=".len()..]
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|v| v.round() as i32);
            } else if line.starts_with("Encryption key:on") {
                encrypted = true;
            } else if line.contains("WPA2") || line.contains("802.11i") {
                wpa = Some("WPA2");
            } else if line.contains("WPA") && wpa.is_none() {
                wpa = Some("WPA");
            }
        }
        let Some(ssid) = ssid else { continue };
        let security = match (encrypted, wpa) {
            (_, Some(wpa)) => wpa.to_string(),
            (true, None) => "WEP".to_string(),
            (false, None) => "OPEN".to_string(),
        };
        merge_network(&mut networks, Network { ssid, rssi, security });
    }
    sort_networks(networks)
}

/// Run the first available scanner and parse its output.
pub fn scan_networks(prefix: Option<&str>) -> anyhow::Result<Vec<Network>> {
    let attempts: [(&str, Vec<&str>, fn(&str) -> Vec<Network>); 3] = [
        (
            "nmcli",
            vec!["-t", "-f", "SSID,SIGNAL,SECURITY", "device", "wifi", "list"],
            parse_nmcli_scan_output,
        ),
        ("iw", vec!["dev"], parse_iw_via_interfaces),
        ("iwlist", vec!["scan"], parse_iwlist_scan_output),
    ];
    for (program, args, parse) in attempts {
        match Command::new(program).args(&args).output() {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let mut networks = parse(&stdout);
                if let Some(prefix) = prefix {
                    let prefix = prefix.to_lowercase();
                    networks.retain(|n| n.ssid.to_lowercase().starts_with(&prefix));
                }
                if !networks.is_empty() {
                    return Ok(networks);
                }
                debug!(%program, "scanner returned no networks, trying next");
            }
            Ok(output) => {
                debug!(%program, status = ?output.status, "scanner failed, trying next");
            }
            Err(e) => {
                debug!(%program, error = %e, "scanner unavailable, trying next");
            }
        }
    }
    anyhow::bail!("no usable Wi-Fi scanner found (tried nmcli, iw, iwlist)")
}

// `iw dev` lists interfaces; scan each and merge. Only used through
// scan_networks, where nmcli was unavailable.
fn parse_iw_via_interfaces(dev_output: &str) -> Vec<Network> {
    let mut merged: HashMap<String, Network> = HashMap::new();
    for line in dev_output.lines() {
        let line = line.trim();
        let Some(interface) = line.strip_prefix("Interface ") else { continue };
        if let Ok(output) = Command::new("iw").args(["dev", interface, "scan"]).output() {
            if output.status.success() {
                let stdout = String::from_utf8_lossy(&output.stdout);
                for network in parse_iw_scan_output(&stdout) {
                    merge_network(&mut merged, network);
                }
            }
        }
    }
    sort_networks(merged)
}

fn split_unescaped(line: &str, separator: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in line.chars() {
        if escaped {
            current.push('\\');
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == separator {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if escaped {
        current.push('\\');
    }
    fields.push(current);
    fields
}

fn unescape_nmcli(value: &str) -> String {
    value.replace(r"\:", ":").replace(r"\\", "\\")
}

/// Keep the record with the stronger signal; fill in security from
/// whichever record knows it.
fn merge_network(networks: &mut HashMap<String, Network>, candidate: Network) {
    match networks.get_mut(&candidate.ssid) {
        None => {
            networks.insert(candidate.ssid.clone(), candidate);
        }
        Some(existing) => {
            let stronger = match (existing.rssi, candidate.rssi) {
                (None, Some(_)) => true,
                (Some(old), Some(new)) => new > old,
                _ => false,
            };
            if stronger {
                let security = if candidate.security.is_empty()
                    || candidate.security == "UNKNOWN"
                {
                    existing.security.clone()
                } else {
                    candidate.security.clone()
                };
                *existing = Network { security, ..candidate };
            } else if (existing.security.is_empty() || existing.security == "UNKNOWN")
                && !candidate.security.is_empty()
                && candidate.security != "UNKNOWN"
            {
                existing.security = candidate.security;
            }
        }
    }
}

/// Strongest signal first, unknown signal last, name as tie-breaker.
fn sort_networks(networks: HashMap<String, Network>) -> Vec<Network> {
    let mut networks: Vec<Network> = networks.into_values().collect();
    networks.sort_by(|a, b| {
        match (a.rssi, b.rssi) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.ssid.to_lowercase().cmp(&b.ssid.to_lowercase()))
    });
    networks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nmcli_with_escaped_ssid() {
        let output = "Home\\:Net:70:WPA2\nOffice:40:WPA3\nOffice:10:\n";
        let networks = parse_nmcli_scan_output(output);
        assert_eq!(
            networks[0],
            Network { ssid: "Home:Net".into(), rssi: Some(70), security: "WPA2".into() }
        );
        assert_eq!(
            networks[1],
            Network { ssid: "Office".into(), rssi: Some(40), security: "WPA3".into() }
        );
        assert_eq!(networks.len(), 2);
    }

    #[test]
    fn test_parse_iw_scan() {
        let output = "BSS aa:bb:cc:dd:ee:ff(on wlan0)\n\
                      \tsignal: -45.00 dBm\n\
                      \tSSID: StrongNet\n\
                      \tRSN: * Version: 1\n\
                      BSS 11:22:33:44:55:66(on wlan0)\n\
                      \tsignal: -70.00 dBm\n\
                      \tSSID: Guest\n";
        let networks = parse_iw_scan_output(output);
        assert_eq!(networks[0].ssid, "StrongNet");
        assert_eq!(networks[0].rssi, Some(-45));
        assert_eq!(networks[0].security, "WPA2");
        assert_eq!(networks[1].ssid, "Guest");
        assert_eq!(networks[1].security, "UNKNOWN");
    }

    #[test]
    fn test_parse_iwlist_scan() {
        let output = "Cell 01 - Address: AA\nESSID:\"Kitchen\"\nSignal level=-55 dBm\n\
                      Encryption key:on\nIE: WPA Version 1\n\
                      Cell 02 - Address: BB\nESSID:\"Guest\"\nQuality=30/70\n\
                      Encryption key:off\n";
        let networks = parse_iwlist_scan_output(output);
        assert_eq!(
            networks.iter().find(|n| n.ssid == "Kitchen").unwrap().security,
            "WPA"
        );
        assert_eq!(
            networks.iter().find(|n| n.ssid == "Guest").unwrap().security,
            "OPEN"
        );
    }

    #[test]
    fn test_stronger_record_wins_merge() {
        let output = "Net:20:\nNet:80:WPA2\n";
        let networks = parse_nmcli_scan_output(output);
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].rssi, Some(80));
        assert_eq!(networks[0].security, "WPA2");
    }

    #[test]
    fn test_unknown_signal_sorts_last() {
        let mut map = HashMap::new();
        merge_network(
            &mut map,
            Network { ssid: "a".into(), rssi: None, security: String::new() },
        );
        merge_network(
            &mut map,
            Network { ssid: "b".into(), rssi: Some(-90), security: String::new() },
        );
        let sorted = sort_networks(map);
        assert_eq!(sorted[0].ssid, "b");
        assert_eq!(sorted[1].ssid, "a");
    }

    #[test]
    fn test_split_unescaped() {
        assert_eq!(split_unescaped("a:b:c", ':'), vec!["a", "b", "c"]);
        assert_eq!(split_unescaped("a\\:b:c:d", ':'), vec!["a\\:b", "c", "d"]);
    }
}
