//! Demo server running a Fast RPC echo listener and a WebSocket echo
//! listener side by side.

mod cli;

use std::{error::Error, fs, net::SocketAddr};

use clap::Parser;
use sockframe::{
    MiddlewareChain,
    ServerConfig,
    SocketServer,
    fast::{DispatchError, FastContext, FastMiddleware, FastRouter},
    http::{HttpMiddleware, HttpRequest, HttpResponse},
    websocket::{EchoHandler, WebSocketMiddleware},
};
use tracing_subscriber::EnvFilter;

/// Command answered with its first parameter.
const ECHO_COMMAND: i32 = 1;

fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();
    let mut config = match &cli.config {
        Some(path) => serde_json::from_str::<ServerConfig>(&fs::read_to_string(path)?)?,
        None => ServerConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(cli, config))
}

async fn serve(cli: cli::Cli, config: ServerConfig) -> Result<(), Box<dyn Error>> {
    if let Some(addr) = cli.metrics {
        install_exporter(addr)?;
    }

    let router = FastRouter::builder()
        .route_raw(ECHO_COMMAND, |ctx: FastContext| async move {
            ctx.params()?
                .into_iter()
                .next()
                .ok_or_else(|| DispatchError::BadArguments("missing parameter".into()))
        })
        .build()?;
    let fast_chain = MiddlewareChain::builder()
        .push(FastMiddleware::server(router, config.fast.clone()))
        .build();

    let ws_chain = MiddlewareChain::builder()
        .push(WebSocketMiddleware::new(EchoHandler, config.websocket.clone()))
        .push(HttpMiddleware::new(|_: &HttpRequest| {
            HttpResponse::new(200).text("sockframe: connect with a WebSocket client")
        }))
        .build();

    let fast = SocketServer::from_config(fast_chain, &config).bind(cli.fast)?;
    let ws = SocketServer::from_config(ws_chain, &config).bind(cli.ws)?;
    tracing::info!(fast = ?fast.local_addr(), ws = ?ws.local_addr(), "sockframe listening");

    let (fast_done, ws_done) = tokio::join!(fast.run(), ws.run());
    fast_done?;
    ws_done?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_exporter(addr: SocketAddr) -> Result<(), Box<dyn Error>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_exporter(addr: SocketAddr) -> Result<(), Box<dyn Error>> {
    tracing::warn!(%addr, "built without the `metrics` feature; exporter disabled");
    Ok(())
}
