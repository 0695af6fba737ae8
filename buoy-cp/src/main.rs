use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use buoy_cp::flow::FlowConfig;
use buoy_cp::manager::{Manager, run_events};
use buoy_cp::openflow::listener;
use buoy_cp::rest::{AppState, create_router};

#[derive(Parser)]
#[command(name = "buoy-cp")]
#[command(about = "buoy floating-IP control plane - load-balanced NAT over OpenFlow switches")]
struct Args {
    /// Listen address for the REST API (client)
    #[arg(short, long, default_value = "[::1]:8080")]
    listen: String,

    /// Listen address for switch connections
    #[arg(long, default_value = "0.0.0.0:6633")]
    openflow_listen: String,

    /// Switch port facing the public network
    #[arg(long, default_value = "1")]
    northbound_port: u16,

    /// Switch port facing the private backends
    #[arg(long, default_value = "2")]
    southbound_port: u16,

    /// Idle timeout for ephemeral drop flows, seconds
    #[arg(long, default_value = "1000")]
    drop_idle_timeout_sec: u32,

    /// Hard timeout for ephemeral drop flows, seconds
    #[arg(long, default_value = "120000")]
    drop_hard_timeout_sec: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("buoy_cp=info".parse()?))
        .init();

    let args = Args::parse();

    let config = FlowConfig {
        northbound_port: args.northbound_port,
        southbound_port: args.southbound_port,
        drop_idle_timeout_sec: args.drop_idle_timeout_sec,
        drop_hard_timeout_sec: args.drop_hard_timeout_sec,
    };

    info!(
        "Starting buoy-cp - REST: {}, OpenFlow: {}, ports north/south: {}/{}",
        args.listen, args.openflow_listen, config.northbound_port, config.southbound_port
    );

    let manager = Arc::new(Manager::new(config));

    // Switch transport: connections feed events into the dispatcher.
    let (event_tx, event_rx) = mpsc::channel(64);
    let switch_listener = TcpListener::bind(&args.openflow_listen).await?;
    info!("Switch listener on {}", args.openflow_listen);
    tokio::spawn(listener::run(switch_listener, event_tx));
    tokio::spawn(run_events(manager.clone(), event_rx));

    // REST API
    let app_state = Arc::new(AppState {
        manager: manager.clone(),
    });
    let router = create_router(app_state);

    let rest_listener = TcpListener::bind(&args.listen).await?;
    info!("REST API listening on {}", args.listen);

    // Run server with graceful shutdown
    axum::serve(rest_listener, router)
        .with_graceful_shutdown(async {
            let ctrl_c = signal::ctrl_c();
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
