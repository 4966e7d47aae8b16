//! Runtime configuration types and defaults.
//!
//! This module contains the configuration structure used to initialize the
//! lobby server: network settings, per-connection buffering and join code
//! generation.

use lobby_types::{DEFAULT_CODE_ALPHABET, DEFAULT_CODE_LENGTH};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for the lobby server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the WebSocket listener to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Messages buffered per connection before further pushes are dropped
    pub outbound_buffer: usize,

    /// Upper bound on live lobbies
    pub max_lobbies: usize,

    /// Length of generated join codes
    pub code_length: usize,

    /// Characters join codes are drawn from
    pub code_alphabet: String,

    /// A lobby that receives no command for this long is ended. `None` disables reaping.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".parse().expect("Attempted to use ServerConfig.default(), but field `bind_address` is not parsable in the source code"),
            max_connections: 1000,
            outbound_buffer: 256,
            max_lobbies: 500,
            code_length: DEFAULT_CODE_LENGTH,
            code_alphabet: DEFAULT_CODE_ALPHABET.to_string(),
            idle_timeout: Some(Duration::from_secs(60 * 60)),
        }
    }
}
