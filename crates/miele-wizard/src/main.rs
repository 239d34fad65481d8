//! miele-wizard - appliance commissioning from the command line
//!
//! Walks the setup flow step by step: scan for the appliance's setup
//! access point, push Wi-Fi credentials, push freshly generated pairing
//! keys, and emit a server config stanza.

use clap::{Parser, Subcommand};
use miele_local_core::provision::ProvisioningInfo;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod device;
mod scan;

/// Commissioning wizard for Miele appliances
#[derive(Parser, Debug)]
#[command(name = "miele-wizard", version)]
#[command(about = "Commissions Miele appliances onto the local network")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover nearby Wi-Fi networks
    Scan {
        /// Only list networks whose name starts with this prefix
        /// (appliance setup APs usually start with "Miele")
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Push Wi-Fi credentials to a device in setup mode
    Wifi {
        /// Device setup-AP host (usually 192.168.1.1 on the appliance AP)
        #[arg(long)]
        device_host: String,
        /// Target network name
        #[arg(long)]
        ssid: String,
        /// Target network security (WPA2 when omitted)
        #[arg(long, default_value = "")]
        security: String,
        /// Network passphrase (ignored for open networks)
        #[arg(long, default_value = "")]
        key: String,
    },
    /// Generate pairing keys and push them to a device in setup mode
    Commission {
        /// Device host
        #[arg(long)]
        device_host: String,
        /// Where to save the pairing JSON
        #[arg(long, default_value = "keys.json")]
        out: PathBuf,
    },
    /// Resolve the device route and emit a server config stanza
    Config {
        /// Endpoint name for the config stanza
        #[arg(long)]
        name: String,
        /// Device host on the home network
        #[arg(long)]
        host: String,
        /// Pairing JSON saved by the commission step
        #[arg(long, default_value = "keys.json")]
        keys: PathBuf,
        /// Write the stanza here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "miele_wizard=debug" } else { "miele_wizard=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().without_time())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Scan { prefix } => {
            let networks = scan::scan_networks(prefix.as_deref())?;
            println!("{:<32} {:>8}  {}", "SSID", "SIGNAL", "SECURITY");
            for network in networks {
                let signal = network
                    .rssi
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!("{:<32} {:>8}  {}", network.ssid, signal, network.security);
            }
            Ok(())
        }
        Command::Wifi { device_host, ssid, security, key } => {
            device::validate_ipv4(&device_host)?;
            preflight(&device_host, "/WLAN").await?;
            let payload = device::build_wifi_payload(&ssid, &security, &key);
            let (ok, message) = device::provision_wifi(&device_host, &payload).await;
            println!("{message}");
            if !ok {
                anyhow::bail!("Wi-Fi provisioning failed");
            }
            println!("Device will now join {:?}; watch for it on your home network.", ssid);
            Ok(())
        }
        Command::Commission { device_host, out } => {
            device::validate_ipv4(&device_host)?;
            preflight(&device_host, "/Security/Commissioning").await?;

            let info = ProvisioningInfo::generate_random();
            let payload = info.to_pairing_json();
            let (ok, attempts) = device::provision_keys(&device_host, &payload).await;
            for attempt in &attempts {
                println!("{attempt}");
            }
            if !ok {
                anyhow::bail!("key provisioning failed on all attempts");
            }
            std::fs::write(&out, &payload)
                .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", out.display()))?;
            println!("Pairing keys accepted; saved to {}.", out.display());
            println!("Keep this file: it is the only copy of the group key.");
            Ok(())
        }
        Command::Config { name, host, keys, out } => {
            let name = device::normalize_endpoint_name(&name)?;
            device::validate_ipv4(&host)?;
            let raw = std::fs::read(&keys)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", keys.display()))?;
            let info = ProvisioningInfo::from_pairing_json(&raw)?;
            let payload = info.to_pairing_payload();

            let route = device::fetch_device_route(info, &host).await?;
            let yaml = device::build_config_yaml(
                &name,
                &host,
                &payload.group_id,
                &payload.group_key,
                &route,
            )?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &yaml)
                        .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", path.display()))?;
                    println!("Config written to {}.", path.display());
                }
                None => print!("{yaml}"),
            }
            Ok(())
        }
    }
}

/// Shared pre-flight: the device must answer on port 80 and serve the
/// setup resource.
async fn preflight(host: &str, path: &str) -> anyhow::Result<()> {
    if !device::tcp_port_open(host, Duration::from_secs(3)) {
        anyhow::bail!("{host} does not answer on TCP port 80; is the device in setup mode?");
    }
    let (ok, message) = device::check_uri_available(host, path).await;
    println!("{message}");
    if !ok {
        anyhow::bail!("{path} did not look available on {host}");
    }
    Ok(())
}
