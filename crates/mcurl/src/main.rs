//! mcurl - one-shot encrypted HTTP client for Miele devices
//!
//! Speaks the signed-and-encrypted device protocol with curl-flavored
//! flags: `mcurl -X PUT -d '{"ProcessAction":1}' -k keys.json
//! http://192.168.1.50/Devices/000123456789/State`

use clap::Parser;
use miele_local_core::cipher::strip_trailing_zeros;
use miele_local_core::error::Error;
use miele_local_core::provision::ProvisioningInfo;
use miele_local_net::transport::Transport;
use std::path::PathBuf;
use std::process::ExitCode;
use url::Url;

const KNOWN_URLS: &[&str] = &[
    "/",
    "/Devices",
    "/Devices/{Device-Route}",
    "/Devices/{Device-Route}/Ident",
    "/Devices/{Device-Route}/State",
    "/Devices/{Device-Route}/Settings",
    "/Diagnose",
    "/Security",
    "/Security/Commissioning",
    "/Security/HAN",
    "/Security/Cloud",
    "/Settings",
    "/Subscriptions",
    "/Update",
    "/WLAN",
];

fn format_epilog() -> String {
    let mut epilog = String::from("Known Miele device URLs:\n");
    for url in KNOWN_URLS {
        epilog.push_str("  ");
        epilog.push_str(url);
        epilog.push('\n');
    }
    epilog
}

/// Minimal encrypted HTTP client for Miele devices
#[derive(Parser, Debug)]
#[command(name = "mcurl", version)]
#[command(about = "Minimal encrypted HTTP client for Miele devices")]
#[command(after_help = format_epilog())]
struct Args {
    /// HTTP method
    #[arg(short = 'X', long = "request", default_value = "GET")]
    method: String,

    /// Request body (string payload)
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Include response status and headers in output
    #[arg(short = 'i', short_alias = 'v', long = "include")]
    include_response_info: bool,

    /// Path to the keys JSON file
    #[arg(short = 'k', long = "keys", default_value = "keys.json")]
    keys: PathBuf,

    /// Target URL (http://host/path)
    url: String,
}

/// Host and resource path of a device URL; only plain http is spoken.
fn parse_url(raw: &str) -> Result<(String, String), String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;
    match url.scheme() {
        "http" => {}
        "https" => return Err("https:// URLs are not supported; use http://".into()),
        _ => return Err("URL must start with http://".into()),
    }
    let host = url
        .host_str()
        .ok_or_else(|| "URL must include a host, e.g. http://192.168.1.50/State".to_string())?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok((host, path))
}

fn load_keys(path: &PathBuf) -> Result<ProvisioningInfo, String> {
    let raw = std::fs::read(path)
        .map_err(|e| format!("unable to read keys file {}: {e}", path.display()))?;
    ProvisioningInfo::from_pairing_json(&raw)
        .map_err(|e| format!("invalid provisioning data in {}: {e}", path.display()))
}

fn print_headers(status: u16, headers: &[(String, String)]) {
    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown");
    println!("HTTP {status} {reason}");
    for (name, value) in headers {
        println!("{name}: {value}");
    }
    println!();
}

fn print_body(body: &[u8]) {
    let body = strip_trailing_zeros(body);
    if body.is_empty() {
        return;
    }
    match std::str::from_utf8(body) {
        Ok(text) => println!("{text}"),
        Err(_) => {
            println!("<binary payload: {} bytes>", body.len());
            let spaced: Vec<String> = body.iter().map(|b| format!("{b:02x}")).collect();
            println!("{}", spaced.join(" "));
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let (host, path) = match parse_url(&args.url) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::from(2);
        }
    };
    let info = match load_keys(&args.keys) {
        Ok(info) => info,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::from(2);
        }
    };
    let transport = match Transport::new(info) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    let body = args.data.as_deref().map(str::as_bytes);
    match transport.request(&args.method, &host, &path, body).await {
        Ok(response) => {
            if args.include_response_info {
                print_headers(response.meta.status, &response.meta.headers);
            }
            print_body(&response.body);
            ExitCode::SUCCESS
        }
        Err(Error::Usage(message)) => {
            eprintln!("Error: {message}");
            ExitCode::from(2)
        }
        Err(Error::Device { status, body }) => {
            if args.include_response_info {
                print_headers(status, &[]);
            }
            if let Some(body) = body {
                print_body(&body);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("Request failed: {e}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_http() {
        let (host, path) = parse_url("http://127.0.0.1/State?x=1").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(path, "/State?x=1");
    }

    #[test]
    fn test_parse_url_with_port() {
        let (host, path) = parse_url("http://127.0.0.1:8080/Devices").unwrap();
        assert_eq!(host, "127.0.0.1:8080");
        assert_eq!(path, "/Devices");
    }

    #[test]
    fn test_parse_url_https_rejected() {
        let error = parse_url("https://127.0.0.1/State").unwrap_err();
        assert!(error.contains("use http://"));
    }

    #[test]
    fn test_parse_url_other_scheme_rejected() {
        assert!(parse_url("ftp://127.0.0.1/State").is_err());
        assert!(parse_url("127.0.0.1/State").is_err());
    }

    #[test]
    fn test_bare_host_path_is_root() {
        let (_, path) = parse_url("http://192.168.1.50").unwrap();
        assert_eq!(path, "/");
    }
}
