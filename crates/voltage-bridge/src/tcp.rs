//! Line-oriented TCP frontend. One accept loop, one spawned task per
//! connection; a 1s read timeout exists purely to re-check the shutdown
//! signal between reads, not as a protocol idle timeout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge_dispatch::{DispatchOutcome, Dispatcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_MESSAGE_CHARS: usize = 300;

pub async fn bind(bind_addr: &str) -> Result<TcpListener> {
    TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind TCP frontend at {bind_addr}"))
}

pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Result<()> {
    tracing::info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "tcp frontend listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("tcp accept loop shutting down");
                return Ok(());
            }
            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "failed to accept tcp connection");
                        continue;
                    }
                };
                let dispatcher = dispatcher.clone();
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, dispatcher, conn_shutdown).await {
                        warn!(peer = %peer, error = %err, "tcp connection ended with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let read = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(result) => result.context("tcp read failed")?,
            Err(_) => continue, // timed out; loop back to re-check shutdown
        };

        if read == 0 {
            return Ok(()); // peer closed
        }

        buf.extend_from_slice(&chunk[..read]);

        while let Some(pos) = buf.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            let outcome = dispatcher.submit(tokens).await;
            let response = format_response(&outcome);
            stream.write_all(response.as_bytes()).await.context("tcp write failed")?;
        }
    }
}

fn format_response(outcome: &DispatchOutcome) -> String {
    if outcome.rc == 0 {
        return format!("OK:{}\n", outcome.rc);
    }

    let raw = if !outcome.stderr.is_empty() {
        &outcome.stderr
    } else {
        &outcome.stdout
    };
    let message: String = raw
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(MAX_MESSAGE_CHARS)
        .collect();
    format!("ERR:{}:{}\n", outcome.rc, message)
}
