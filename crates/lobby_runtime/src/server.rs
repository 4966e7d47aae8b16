//! Core lobby server implementation.
//!
//! [`LobbyServer`] binds the WebSocket listener, accepts connections and hands
//! each one to the transport, and coordinates graceful shutdown with the
//! [`LobbyManager`].

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::manager::LobbyManager;
use crate::module::GameRegistry;
use crate::transport::handle_connection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The lobby server.
///
/// Owns the listener loop and the [`LobbyManager`]. All game behavior lives in
/// the registered game modules; the server only provides connections, lobbies
/// and routing.
pub struct LobbyServer {
    config: ServerConfig,
    manager: Arc<LobbyManager>,
    shutdown_sender: broadcast::Sender<()>,
}

impl LobbyServer {
    /// Creates a server that will offer the games in `games`.
    pub fn new(config: ServerConfig, games: GameRegistry) -> Self {
        let manager = Arc::new(LobbyManager::new(&config, games));
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config,
            manager,
            shutdown_sender,
        }
    }

    pub fn manager(&self) -> Arc<LobbyManager> {
        self.manager.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address and serves until [`LobbyServer::shutdown`].
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind to {}: {}", self.config.bind_address, e)))?;
        self.serve(listener).await
    }

    /// Accepts connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        info!("🚀 Lobby server listening on {}", local_addr);
        info!("🎲 {} game module(s) available", self.manager.games().len());

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("🧹 Ending live lobbies...");
        self.manager.shutdown().await;
        info!("Server stopped");
        Ok(())
    }

    fn accept(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let connections = self.manager.registry().len();
        if connections >= self.config.max_connections {
            warn!("Rejecting {}: {} connections already open", addr, connections);
            return;
        }

        let manager = self.manager.clone();
        let outbound_buffer = self.config.outbound_buffer;
        tokio::spawn(async move {
            handle_connection(stream, addr, manager, outbound_buffer).await;
        });
    }

    /// Signals the accept loop to stop. Live lobbies are ended with reason
    /// `"server shutdown"` before `start` returns.
    pub fn shutdown(&self) {
        info!("🛑 Shutting down lobby server...");
        let _ = self.shutdown_sender.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = Arc::new(LobbyServer::new(ServerConfig::default(), GameRegistry::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.shutdown();

        let result = timeout(Duration::from_secs(1), running).await.expect("serve returns after shutdown");
        assert!(result.unwrap().is_ok());
    }
}
