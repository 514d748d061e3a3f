mod app;
mod config;
mod http;
mod metrics;
mod presence;
mod registry;
mod session;
mod wire;

use app::AppState;
use std::env;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tokio::signal;
use tracing::{error, info, warn};

fn main() {
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .json()
        .init();

    let config_path = env::var("COURIER_CONFIG").unwrap_or_else(|_| "courier.toml".to_string());
    let config = config::load_configuration(Path::new(&config_path)).expect("configuration");

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");
    if let Err(err) = runtime.block_on(run(config)) {
        error!("server stopped: {}", err);
        std::process::exit(1);
    }
}

async fn run(config: config::ServerConfig) -> Result<(), Box<dyn Error>> {
    let state = AppState::init(config).await?;
    let live_listener = TcpListener::bind(&state.config.bind).await?;
    let http_listener = TcpListener::bind(&state.config.http_bind).await?;
    info!(address = %state.config.bind, "courier live channel listening");
    info!(address = %state.config.http_bind, "courier api listening");
    tokio::spawn(http::serve(Arc::clone(&state), http_listener));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            accepted = live_listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        tokio::spawn(session::run_session(Arc::clone(&state), stream, remote));
                    }
                    Err(err) => warn!("accept failed: {}", err),
                }
            }
        }
    }
    Ok(())
}
