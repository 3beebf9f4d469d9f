//! WebSocket lifecycle log stream
//!
//! Serves `/ws/logs`: every lifecycle transition as one JSON line. Slow
//! consumers lag the broadcast channel and miss events; they never hold the
//! engine back.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use transfer_manager::TransferManager;

/// Bind the log stream server; returns the bound address and the task
pub async fn spawn_log_stream(
    manager: Arc<TransferManager>,
    addr: SocketAddr,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    info!("lifecycle log stream on ws://{bound}/ws/logs");

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("log stream client from {peer}");
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, manager).await {
                            debug!("log stream client {peer} gone: {e}");
                        }
                    });
                }
                Err(e) => {
                    warn!("log stream accept failed: {e}");
                }
            }
        }
    });
    Ok((bound, task))
}

async fn serve_client(stream: TcpStream, manager: Arc<TransferManager>) -> anyhow::Result<()> {
    // Only the documented path upgrades.
    let check_path = |req: &Request, response: Response| {
        if req.uri().path() == "/ws/logs" {
            Ok(response)
        } else {
            Err(ErrorResponse::new(Some("expected /ws/logs".to_string())))
        }
    };
    let mut socket = tokio_tungstenite::accept_hdr_async(stream, check_path).await?;
    let mut events = manager.subscribe_events();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let line = format!("{}\n", serde_json::to_string(&event)?);
                    socket.send(Message::Text(line)).await?;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("log stream consumer lagging; {missed} events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            // Drain client frames so pings are answered and closes are seen.
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}
