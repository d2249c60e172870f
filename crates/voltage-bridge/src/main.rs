use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_core::VoltageState;
use bridge_dispatch::{DeviceToolGateway, Dispatcher, OutboundQueue};
use tokio_util::sync::CancellationToken;

mod http;
mod pidfile;
mod tcp;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = bridge_config::Config::from_env().context("failed to load configuration")?;

    pidfile::write(&config.pid_path).await?;

    let voltage_state = VoltageState::new();
    let gateway = Arc::new(DeviceToolGateway::new(
        config.device_tool_path.clone(),
        voltage_state.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        gateway,
        voltage_state,
        config.subprocess_timeout,
        config.ramp_step_delay_floor,
        config.ramp_smoothing,
    ));
    let queue = Arc::new(
        OutboundQueue::open(&config.queue_db_path)
            .with_context(|| format!("failed to open queue db at {}", config.queue_db_path.display()))?,
    );

    let shutdown = CancellationToken::new();

    let tcp_addr = format!("{}:{}", config.host, config.port);
    let tcp_listener = tcp::bind(&tcp_addr).await?;
    let tcp_shutdown = shutdown.clone();
    let tcp_dispatcher = dispatcher.clone();
    let tcp_task = tokio::spawn(async move {
        if let Err(err) = tcp::serve(tcp_listener, tcp_dispatcher, tcp_shutdown).await {
            tracing::error!(error = %err, "tcp frontend stopped with error");
        }
    });

    let http_bind_addr = format!("{}:{}", config.http_host, config.http_port)
        .parse::<std::net::SocketAddr>()
        .context("invalid HTTP bind address")?;
    let http_listener = tokio::net::TcpListener::bind(http_bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP frontend at {http_bind_addr}"))?;
    let http_router = http::router(dispatcher.clone(), queue.clone());
    let http_shutdown = shutdown.clone();
    let http_task = tokio::spawn(async move {
        let result = axum::serve(http_listener, http_router)
            .with_graceful_shutdown(async move {
                http_shutdown.cancelled().await;
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "http frontend stopped with error");
        }
    });

    let flusher_shutdown = shutdown.clone();
    let flusher_dispatcher = dispatcher.clone();
    let flusher_queue = queue.clone();
    let flush_interval = config.flush_interval;
    let flusher_task = tokio::spawn(async move {
        bridge_dispatch::flusher::run(
            flusher_dispatcher,
            flusher_queue,
            flush_interval,
            flusher_shutdown,
        )
        .await;
    });

    println!(
        "voltage-bridge listening on tcp://{}:{} and http://{}/send",
        config.host, config.port, http_bind_addr
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    let _ = tokio::join!(tcp_task, http_task, flusher_task);

    pidfile::remove(&config.pid_path, true).await;
    Ok(())
}
