//! mieled - RESTful gateway to Miele appliances on the local network
//!
//! Loads the endpoint registry once at startup, then serves the REST
//! surface until interrupted.

use clap::Parser;
use miele_local_core::provision::ProvisioningInfo;
use miele_local_net::session::EndpointSession;
use miele_local_net::transport::Transport;
use mieled::config::{load_endpoints, Config};
use mieled::routes::{router, AppState};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let default_filter = if config.verbose {
        "mieled=debug,miele_local_net=debug"
    } else {
        "mieled=info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("mieled v{}", env!("CARGO_PKG_VERSION"));

    let endpoints_file = match load_endpoints(&config.config) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let timeout = Duration::from_secs(config.timeout_secs);
    let mut endpoints = HashMap::new();
    for (name, endpoint) in endpoints_file.endpoints {
        let info = match ProvisioningInfo::from_hex(&endpoint.group_id, &endpoint.group_key)
        {
            Ok(info) => info,
            Err(e) => {
                error!("Endpoint {name:?}: {e}");
                return ExitCode::FAILURE;
            }
        };
        let transport = match Transport::with_timeout(info, timeout) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Endpoint {name:?}: {e}");
                return ExitCode::FAILURE;
            }
        };
        let session = EndpointSession::with_transport(
            endpoint.host.clone(),
            transport,
            endpoint.effective_route(),
        );
        info!(endpoint = %name, host = %endpoint.host, "registered endpoint");
        endpoints.insert(name, Mutex::new(session));
    }

    let app = router(Arc::new(AppState { endpoints }));
    let addr = std::net::SocketAddr::from((config.bind, config.port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Listening on http://{addr}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
    });

    if let Err(e) = serve.await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
