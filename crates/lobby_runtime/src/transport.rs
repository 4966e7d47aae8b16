//! WebSocket transport
//!
//! Handles WebSocket connections: the handshake, identity assignment, and the
//! reader/writer pair that bridges a socket to the [`LobbyManager`].
//!
//! Each connection gets a bounded outbound queue. A writer task drains it into
//! the socket as JSON text frames, so a slow client only ever delays itself.
//! The reader loop hands every text frame to the manager and waits for it to
//! be handled before reading the next one, which keeps one connection's
//! requests in order.

use crate::manager::LobbyManager;
use futures::{SinkExt, StreamExt};
use lobby_types::ServerMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

/// Serves one TCP connection until the client goes away.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, manager: Arc<LobbyManager>, outbound_buffer: usize) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sink, mut ws_receiver) = ws_stream.split();
    let (outbound, mut queue) = mpsc::channel::<ServerMessage>(outbound_buffer.max(1));
    let connection_id = manager.connect(outbound);
    info!(connection = %connection_id, "🔗 Connection established from {}", addr);

    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound '{}': {}", message.event_name, e);
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::text(text)).await {
                debug!("Outbound socket closed: {}", e);
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                trace!(connection = %connection_id, "Inbound frame: {}", text.as_str());
                manager.handle_text(connection_id, text.as_str()).await;
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %connection_id, "Client requested close");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                warn!(connection = %connection_id, "Ignoring binary frame");
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                debug!(connection = %connection_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Dropping the registry entry drops the last sender, which ends the writer.
    manager.disconnect(connection_id);
    let _ = writer.await;
    info!(connection = %connection_id, "Connection from {} closed", addr);
}
