use clap::Parser;
use prompter_relay::cli::{run_tail, Cli, Commands};
use prompter_relay::config::Config;
use prompter_relay::relay::RelayState;
use prompter_relay::relay_router;
use std::net::SocketAddr;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Some(Commands::Tail { url, key }) = cli.command {
        if let Err(err) = run_tail(url, key).await {
            error!("tail client error: {err:#}");
            std::process::exit(1);
        }
        return;
    }

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(key) = cli.access_key {
        config.access_key = Some(key);
    }

    let state = RelayState::new(config.access_key.clone());
    let app = relay_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!("prompter relay listening on {addr}");
    if let Some(ip) = local_network_ip() {
        info!("devices on this network can reach ws://{ip}:{}/ws", config.port);
    }
    if config.access_key.is_some() {
        info!("access key required for connections");
    } else {
        info!("no access key configured, accepting everyone");
    }

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!("server error: {err}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}

/// First non-loopback IPv4 address, for the startup banner other
/// devices pair against.
fn local_network_ip() -> Option<String> {
    if_addrs::get_if_addrs()
        .ok()?
        .into_iter()
        .find(|iface| !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| iface.ip().to_string())
}
